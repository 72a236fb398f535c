//! Aggregation of a fixed set of tasks.
//!
//! `when_all` adds no synchronization of its own: the aggregate task awaits
//! each member in order. Members run concurrently only to the extent their
//! producers already do. Every member is awaited to completion before the
//! aggregate resolves; if any failed, the first failure in member order is
//! reported and the other values are dropped.

use crate::error::TaskError;
use crate::task::UniqueTask;

/// Awaits every task in `tasks` and collects the values in order.
pub fn when_all<T, I>(tasks: I) -> UniqueTask<Vec<T>>
where
    T: Send + 'static,
    I: IntoIterator<Item = UniqueTask<T>>,
{
    let tasks: Vec<_> = tasks.into_iter().collect();
    UniqueTask::from_outcome(async move {
        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            outcomes.push(task.await);
        }
        outcomes.into_iter().collect::<Result<Vec<T>, TaskError>>()
    })
}

/// Awaits two tasks of different types.
pub fn when_all2<A, B>(a: UniqueTask<A>, b: UniqueTask<B>) -> UniqueTask<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    UniqueTask::from_outcome(async move {
        let a = a.await;
        let b = b.await;
        Ok((a?, b?))
    })
}

/// Awaits three tasks of different types.
pub fn when_all3<A, B, C>(
    a: UniqueTask<A>,
    b: UniqueTask<B>,
    c: UniqueTask<C>,
) -> UniqueTask<(A, B, C)>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    UniqueTask::from_outcome(async move {
        let a = a.await;
        let b = b.await;
        let c = c.await;
        Ok((a?, b?, c?))
    })
}
