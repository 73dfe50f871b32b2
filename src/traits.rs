use crate::QueueError;

/// Trait for queue producers that can push items into a queue.
///
/// This trait provides a consistent interface for both producer types: the
/// cloneable MPSC producer handle and the unique SPSC producer handle.
pub trait QueueProducer<T> {
    /// Push a value into the queue.
    ///
    /// Wait-free and non-blocking: the call completes in a bounded number of
    /// steps and never spins waiting for space.
    ///
    /// # Arguments
    /// * `value` - The value to push
    ///
    /// # Safety
    ///
    /// The queue must not be full. Callers uphold this by dimensioning the
    /// capacity strictly above the worst-case number of in-flight elements
    /// (pushed but not yet popped) the workload can produce. No fullness
    /// check is performed on this path; debug builds assert on violation,
    /// release builds exhibit undefined behavior.
    unsafe fn push(&mut self, value: T);
}

/// Trait for queue consumers that can pop items from a queue.
///
/// Consumer handles are unique and not cloneable, and every method takes
/// `&mut self`: the single-consumer precondition of both queue families is
/// enforced by the borrow checker rather than by documentation. The handle
/// itself is `Send`, so the consumer role may migrate between threads; the
/// transfer of the handle provides the required happens-before edge.
pub trait QueueConsumer<T> {
    /// Pop a value from the queue.
    ///
    /// Non-blocking: if no element is ready the call returns immediately.
    ///
    /// # Returns
    /// The popped value on success, or [`QueueError::Empty`] if the queue is
    /// empty (or, for MPSC, if the next slot in line has not been published
    /// yet)
    fn pop(&mut self) -> Result<T, QueueError>;

    /// Check whether the next `pop` would currently find the queue empty.
    ///
    /// This is a peek on the consumer lane, not a linearization point: it
    /// reports the state the next `pop` would observe if no further pushes
    /// occur.
    ///
    /// # Returns
    /// `true` if the queue appears empty
    fn is_empty(&mut self) -> bool;
}
