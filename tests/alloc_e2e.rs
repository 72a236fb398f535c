#![allow(missing_docs)]

//! Tasks placed in caller-supplied frame memory.

#[macro_use]
mod common;

use coframe::frame::{FrameAllocator, StackArena};
use coframe::{AllocError, LazyTask, SharedTask, UniqueTask, blocking};
use common::{DropProbe, Trigger};
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn arena(capacity: usize) -> (Arc<StackArena>, Arc<dyn FrameAllocator>) {
    let arena = Arc::new(StackArena::with_capacity(capacity).expect("arena buffer"));
    let alloc: Arc<dyn FrameAllocator> = arena.clone();
    (arena, alloc)
}

/// Counts calls and refuses once `budget` blocks are live.
struct Budgeted {
    budget: usize,
    live: AtomicUsize,
    released: AtomicUsize,
}

impl FrameAllocator for Budgeted {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if self.live.fetch_add(1, Ordering::SeqCst) >= self.budget {
            self.live.fetch_sub(1, Ordering::SeqCst);
            return Err(AllocError {
                size: layout.size(),
                align: layout.align(),
            });
        }
        coframe::frame::GlobalFrameAlloc.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.released.fetch_add(1, Ordering::SeqCst);
        unsafe { coframe::frame::GlobalFrameAlloc.deallocate(ptr, layout) };
    }
}

#[test]
fn e2e_nested_unique_tasks_share_one_arena() {
    common::init_test_logging();
    coframe::test_phase!("e2e_nested_unique_tasks_share_one_arena");
    let (arena, alloc) = arena(64 * 1024);
    let inner_alloc = Arc::clone(&alloc);
    let outer = UniqueTask::new_in(
        async move {
            let mut total = 0_u64;
            for i in 0..8_u64 {
                let inner = UniqueTask::new_in(async move { i * i }, Arc::clone(&inner_alloc))
                    .expect("arena has room");
                total += inner.await.unwrap_or(0);
            }
            total
        },
        alloc,
    )
    .expect("arena has room");
    assert_eq!(blocking::get(outer), Ok(140));
    let stats = arena.stats();
    assert_eq!(stats.arena_allocations, 9);
    assert_eq!(stats.fallback_allocations, 0);
    assert_eq!(stats.live, 0);
    coframe::test_complete!("e2e_nested_unique_tasks_share_one_arena");
}

#[test]
fn e2e_lazy_task_holds_block_until_finished() {
    common::init_test_logging();
    coframe::test_phase!("e2e_lazy_task_holds_block_until_finished");
    let (arena, alloc) = arena(4096);
    let lazy = LazyTask::new_in(async { "lazy" }, alloc).expect("arena has room");
    assert!(!lazy.is_started());
    assert_eq!(arena.stats().live, 1, "the block is taken at construction");
    assert_eq!(blocking::get(lazy), Ok("lazy"));
    assert_eq!(arena.stats().live, 0);
    coframe::test_complete!("e2e_lazy_task_holds_block_until_finished");
}

#[test]
fn e2e_shared_task_block_released_once_on_cancel() {
    common::init_test_logging();
    coframe::test_phase!("e2e_shared_task_block_released_once_on_cancel");
    let allocator = Arc::new(Budgeted {
        budget: 4,
        live: AtomicUsize::new(0),
        released: AtomicUsize::new(0),
    });
    let alloc: Arc<dyn FrameAllocator> = allocator.clone();
    let probe = DropProbe::new();
    let guard = probe.guard();
    let trigger = Trigger::<u8>::new();
    let wait = trigger.clone();
    let shared = SharedTask::new_in(
        async move {
            let _guard = guard;
            wait.await.unwrap_or(0)
        },
        alloc,
    )
    .expect("within budget");
    let follower = shared.clone();
    assert_eq!(allocator.live.load(Ordering::SeqCst), 1);

    drop(shared);
    assert_eq!(probe.dropped(), 0, "a handle is still alive");
    drop(follower);
    assert_eq!(probe.dropped(), 1);
    assert_eq!(allocator.live.load(Ordering::SeqCst), 0);
    assert_eq!(allocator.released.load(Ordering::SeqCst), 1);
    // The stale continuation left in the trigger no longer owns the block.
    trigger.fire(0);
    assert_eq!(allocator.released.load(Ordering::SeqCst), 1);
    coframe::test_complete!("e2e_shared_task_block_released_once_on_cancel");
}

#[test]
fn e2e_exhausted_allocator_is_reported_to_caller() {
    common::init_test_logging();
    coframe::test_phase!("e2e_exhausted_allocator_is_reported_to_caller");
    let allocator = Arc::new(Budgeted {
        budget: 1,
        live: AtomicUsize::new(0),
        released: AtomicUsize::new(0),
    });
    let alloc: Arc<dyn FrameAllocator> = allocator.clone();
    let trigger = Trigger::<u8>::new();
    let wait = trigger.clone();
    let held = UniqueTask::new_in(async move { wait.await.unwrap_or(0) }, Arc::clone(&alloc))
        .expect("first block fits");
    let err = UniqueTask::new_in(async { 0_u8 }, alloc).unwrap_err();
    assert!(err.size > 0);
    assert!(trigger.fire(5));
    assert_eq!(blocking::get(held), Ok(5));
    assert_eq!(allocator.live.load(Ordering::SeqCst), 0);
    coframe::test_complete!("e2e_exhausted_allocator_is_reported_to_caller");
}
