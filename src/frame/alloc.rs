//! Frame storage and pluggable frame allocators.
//!
//! A frame body is a type-erased `Future<Output = ()> + Send`. By default it
//! lives in an ordinary `Box`; latency-sensitive call sites can instead hand
//! the constructor a [`FrameAllocator`], in which case the body is placed in
//! memory obtained from that allocator and released back to it exactly once
//! when the frame finishes or unwinds.

#![allow(unsafe_code)]

use crate::error::AllocError;
use parking_lot::Mutex;
use std::alloc::Layout;
use std::future::Future;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Source of frame memory.
///
/// # Safety contract for implementors
///
/// `allocate` must return memory valid for `layout` (size and alignment)
/// until the matching `deallocate` call with the same layout.
pub trait FrameAllocator: Send + Sync + 'static {
    /// Allocates a block for a frame body. `layout.size()` is never zero.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Returns a block obtained from [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this allocator with the
    /// same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process global allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalFrameAlloc;

impl FrameAllocator for GlobalFrameAlloc {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: callers never request zero-sized layouts.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(AllocError::for_layout(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded caller contract.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

const ARENA_ALIGN: usize = 16;

/// Allocation counters for a [`StackArena`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Blocks served from the arena buffer.
    pub arena_allocations: u64,
    /// Blocks that did not fit and were served by the global allocator.
    pub fallback_allocations: u64,
    /// Arena blocks currently outstanding.
    pub live: usize,
    /// Highest arena offset reached.
    pub high_water: usize,
}

#[derive(Debug, Default)]
struct Cursor {
    top: usize,
    stats: ArenaStats,
}

/// A bump arena for short-lived frames.
///
/// Blocks are carved from one pre-allocated buffer. Releasing the most
/// recent block rewinds the bump pointer, and the buffer resets completely
/// once no blocks are outstanding, so strictly nested frame lifetimes reuse
/// the same bytes. Requests that do not fit fall back to the global
/// allocator.
pub struct StackArena {
    base: NonNull<u8>,
    capacity: usize,
    cursor: Mutex<Cursor>,
}

// SAFETY: the buffer is only carved up under `cursor`'s lock and blocks are
// handed to exactly one frame each.
unsafe impl Send for StackArena {}
// SAFETY: see above.
unsafe impl Sync for StackArena {}

impl StackArena {
    /// Creates an arena with a buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Result<Self, AllocError> {
        let base = if capacity == 0 {
            NonNull::<u8>::dangling()
        } else {
            let layout = Self::buffer_layout(capacity)?;
            GlobalFrameAlloc.allocate(layout)?
        };
        Ok(Self {
            base,
            capacity,
            cursor: Mutex::new(Cursor::default()),
        })
    }

    fn buffer_layout(capacity: usize) -> Result<Layout, AllocError> {
        Layout::from_size_align(capacity, ARENA_ALIGN).map_err(|_| AllocError {
            size: capacity,
            align: ARENA_ALIGN,
        })
    }

    /// Returns the buffer size in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a snapshot of the allocation counters.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        self.cursor.lock().stats
    }

    fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let base = self.base.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        (self.capacity != 0 && addr >= base && addr < base + self.capacity).then(|| addr - base)
    }
}

impl FrameAllocator for StackArena {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        {
            let mut cursor = self.cursor.lock();
            let base = self.base.as_ptr() as usize;
            let align = layout.align();
            let start = (base + cursor.top).next_multiple_of(align) - base;
            if self.capacity != 0 && start + layout.size() <= self.capacity {
                cursor.top = start + layout.size();
                cursor.stats.arena_allocations += 1;
                cursor.stats.live += 1;
                cursor.stats.high_water = cursor.stats.high_water.max(cursor.top);
                // SAFETY: `start + size <= capacity`, so the block is in bounds.
                let ptr = unsafe { self.base.as_ptr().add(start) };
                // SAFETY: offset from a non-null base within its allocation.
                return Ok(unsafe { NonNull::new_unchecked(ptr) });
            }
            cursor.stats.fallback_allocations += 1;
        }
        GlobalFrameAlloc.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let Some(offset) = self.offset_of(ptr) else {
            // SAFETY: blocks outside the buffer came from the fallback path.
            unsafe { GlobalFrameAlloc.deallocate(ptr, layout) };
            return;
        };
        let mut cursor = self.cursor.lock();
        cursor.stats.live -= 1;
        if cursor.stats.live == 0 {
            cursor.top = 0;
        } else if offset + layout.size() == cursor.top {
            cursor.top = offset;
        }
    }
}

impl Drop for StackArena {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.cursor.get_mut().stats.live,
            0,
            "stack arena dropped with live frames"
        );
        if self.capacity != 0 {
            if let Ok(layout) = Self::buffer_layout(self.capacity) {
                // SAFETY: the buffer was allocated with this layout in `with_capacity`.
                unsafe { GlobalFrameAlloc.deallocate(self.base, layout) };
            }
        }
    }
}

impl std::fmt::Debug for StackArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackArena")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

type DynBody = dyn Future<Output = ()> + Send;

/// A type-erased frame body.
pub(crate) struct FrameBox {
    repr: Repr,
}

enum Repr {
    Boxed(Pin<Box<DynBody>>),
    Placed(Placed),
}

struct Placed {
    ptr: NonNull<DynBody>,
    layout: Layout,
    alloc: Arc<dyn FrameAllocator>,
}

// SAFETY: the body is `Send` and the allocator is `Send + Sync`.
unsafe impl Send for Placed {}

impl FrameBox {
    pub(crate) fn new<F>(body: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            repr: Repr::Boxed(Box::pin(body)),
        }
    }

    /// Places `body` in memory obtained from `alloc`.
    pub(crate) fn new_in<F>(body: F, alloc: Arc<dyn FrameAllocator>) -> Result<Self, AllocError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let layout = Layout::new::<F>();
        let raw = if layout.size() == 0 {
            NonNull::<F>::dangling()
        } else {
            alloc.allocate(layout)?.cast::<F>()
        };
        // SAFETY: `raw` is valid and aligned for `F` (or dangling for a ZST).
        unsafe { raw.as_ptr().write(body) };
        let ptr: NonNull<DynBody> = raw;
        Ok(Self {
            repr: Repr::Placed(Placed { ptr, layout, alloc }),
        })
    }

    pub(crate) fn poll(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        match &mut self.repr {
            Repr::Boxed(body) => body.as_mut().poll(cx),
            Repr::Placed(placed) => {
                // SAFETY: the body never moves out of its block until dropped.
                let body = unsafe { Pin::new_unchecked(placed.ptr.as_mut()) };
                body.poll(cx)
            }
        }
    }
}

impl Drop for Placed {
    fn drop(&mut self) {
        struct Release<'a>(&'a Placed);

        impl Drop for Release<'_> {
            fn drop(&mut self) {
                if self.0.layout.size() != 0 {
                    // SAFETY: the block came from this allocator with this layout.
                    unsafe {
                        self.0
                            .alloc
                            .deallocate(self.0.ptr.cast::<u8>(), self.0.layout);
                    }
                }
            }
        }

        // The block is returned even if a destructor in the body panics.
        let release = Release(self);
        // SAFETY: the body was initialized in `new_in` and is dropped once.
        unsafe { std::ptr::drop_in_place(release.0.ptr.as_ptr()) };
    }
}

impl std::fmt::Debug for FrameBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let placement = match &self.repr {
            Repr::Boxed(_) => "boxed",
            Repr::Placed(_) => "placed",
        };
        f.debug_struct("FrameBox")
            .field("placement", &placement)
            .finish_non_exhaustive()
    }
}
