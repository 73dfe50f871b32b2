use crate::{
    QueueError,
    sync::{AtomicUsize, Ordering},
    traits::{QueueConsumer, QueueProducer},
    validate_capacity,
};
use crossbeam_utils::CachePadded;
use std::{cell::UnsafeCell, fmt, marker::PhantomData, mem, mem::MaybeUninit, sync::Arc};

/// Storage abstraction that can be either statically or dynamically sized.
///
/// Unlike the MPSC ring, SPSC slots carry no per-slot flag and no per-slot
/// padding: occupancy is implicit in the shared `size` counter and the
/// private indices, and only one thread ever writes the slot region at a
/// time.
enum Storage<T, const N: usize> {
    /// Statically allocated slot array, used when `N > 0`.
    Static([UnsafeCell<MaybeUninit<T>>; N]),

    /// Dynamically allocated boxed slice of slots, used when `N = 0`.
    Dynamic(Box<[UnsafeCell<MaybeUninit<T>>]>),
}

impl<T, const N: usize> Storage<T, N> {
    #[inline]
    fn slot(&self, idx: usize) -> &UnsafeCell<MaybeUninit<T>> {
        match self {
            Self::Static(slots) => &slots[idx],
            Self::Dynamic(slots) => &slots[idx],
        }
    }
}

/// Wait-free single-producer single-consumer ring buffer with an exact size.
///
/// The producer and the consumer each own a private, non-atomic index
/// (`tail` and `head`), masked to the ring size on every advance. The only
/// shared state is `size`, an atomic element count RMW'd with acquire-release
/// ordering by both sides: the producer's increment is its publication edge,
/// the consumer's acquire load is its visibility edge. Because both sides
/// RMW the same counter, `size` is an exact count rather than an
/// approximation, and the hand-off is strict FIFO.
///
/// The private indices sit on their own cache lines so that the producer and
/// the consumer never invalidate each other's hot line through index
/// updates; `size` lives with the storage base.
///
/// Instances are created through [`queue`] / [`QueueBuilder`] and used
/// exclusively through the [`Producer`] and [`Consumer`] handles.
///
/// # Type Parameters
///
/// * `T` - The element type (any `T: Send`; moved in on push, moved out on pop)
/// * `N` - Compile-time capacity (0 = dynamic allocation, >0 = static)
pub struct SpscQueue<T, const N: usize = 0> {
    storage: Storage<T, N>,
    /// Exact element count; the only producer/consumer synchronization point.
    size: AtomicUsize,
    capacity: usize,
    mask: usize,
    /// Consumer-private read index. Non-atomic: only the consumer touches it.
    head: CachePadded<UnsafeCell<usize>>,
    /// Producer-private write index. Non-atomic: only the producer touches it.
    tail: CachePadded<UnsafeCell<usize>>,
}

impl<T, const N: usize> SpscQueue<T, N> {
    pub(crate) fn new(capacity: usize) -> Result<Self, QueueError> {
        if N > 0 && capacity != N {
            return Err(QueueError::CapacityMismatch);
        }
        validate_capacity(capacity)?;

        let storage = if N > 0 {
            Storage::Static(std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())))
        } else {
            Storage::Dynamic(
                (0..capacity)
                    .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
                    .collect(),
            )
        };

        Ok(Self {
            storage,
            size: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
            head: CachePadded::new(UnsafeCell::new(0)),
            tail: CachePadded::new(UnsafeCell::new(0)),
        })
    }

    /// Get the capacity of the queue.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the exact number of elements currently in the queue.
    ///
    /// Safe from any thread: both sides RMW `size`, so the acquire load is a
    /// consistent snapshot of the count.
    pub(crate) fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// # Safety
    ///
    /// Must only be called by the single producer, and the queue must not be
    /// full (capacity is dimensioned above the worst-case in-flight count).
    pub(crate) unsafe fn push(&self, value: T) {
        // SAFETY: `tail` is owned by the single producer; nothing else reads
        // or writes it.
        let tail = unsafe { *self.tail.get() };

        // SAFETY: while the queue is not full, the slot at `tail` is outside
        // the consumer's `[head, head + size)` window, so the producer owns
        // its storage and it holds no live value.
        unsafe { (*self.storage.slot(tail).get()).write(value) };

        // SAFETY: as above; the index stays in `[0, capacity)` via the mask.
        unsafe { *self.tail.get() = (tail + 1) & self.mask };

        // The release half of this RMW publishes the write above to the
        // consumer's acquire load of `size`.
        let previous = self.size.fetch_add(1, Ordering::AcqRel);
        debug_assert!(
            previous < self.capacity,
            "spsc queue overflow: capacity must exceed the worst-case in-flight count"
        );
    }

    /// # Safety
    ///
    /// Must only be called by the single consumer.
    pub(crate) unsafe fn pop(&self) -> Result<T, QueueError> {
        if self.size.load(Ordering::Acquire) == 0 {
            return Err(QueueError::Empty);
        }

        // SAFETY: `head` is owned by the single consumer.
        let head = unsafe { *self.head.get() };

        // SAFETY: `size > 0` means the slot at `head` holds a value whose
        // construction was published by the producer's release RMW, which
        // the acquire load above synchronized with.
        let value = unsafe { (*self.storage.slot(head).get()).assume_init_read() };

        // SAFETY: as above; the index stays in `[0, capacity)` via the mask.
        unsafe { *self.head.get() = (head + 1) & self.mask };

        // The release half marks the slot's storage reusable for a future
        // wrap of the producer's index.
        self.size.fetch_sub(1, Ordering::AcqRel);

        Ok(value)
    }
}

impl<T, const N: usize> fmt::Debug for SpscQueue<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpscQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T, const N: usize> Drop for SpscQueue<T, N> {
    fn drop(&mut self) {
        if !mem::needs_drop::<T>() {
            return;
        }
        let size = self.size.load(Ordering::Acquire);
        let head = *self.head.get_mut();
        for i in 0..size {
            let idx = (head + i) & self.mask;
            // SAFETY: the `size` slots starting at `head` hold constructed
            // values the queue still owns; teardown is exclusive.
            unsafe { (*self.storage.slot(idx).get()).assume_init_drop() };
        }
    }
}

// SAFETY: slots transfer `T` by value between the two threads, so `T: Send`
// is required and sufficient. Each private index is written by exactly one
// role (enforced by the unique handles), and slot access is ordered by the
// acquire-release RMWs on `size`.
unsafe impl<T: Send, const N: usize> Send for SpscQueue<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for SpscQueue<T, N> {}

/// Builder for creating SPSC queues.
///
/// Provides a fluent API for constructing a queue with a validated capacity
/// and obtaining its handle pair. Both handles are unique: they are minted
/// exactly once and neither is cloneable.
///
/// # Examples
///
/// ```
/// use baton::{
///     spsc,
///     traits::{QueueConsumer, QueueProducer},
/// };
///
/// # fn main() -> Result<(), baton::QueueError> {
/// let (mut producer, mut consumer) = spsc::queue::<u32>().capacity(64).channels()?;
///
/// // SAFETY: one element in flight, capacity 64.
/// unsafe { producer.push(100) };
/// assert_eq!(consumer.pop()?, 100);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct QueueBuilder<T> {
    capacity: Option<usize>,
    _phantom: PhantomData<T>,
}

impl<T> Default for QueueBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> QueueBuilder<T> {
    /// Create a new queue builder.
    pub const fn new() -> Self {
        Self {
            capacity: None,
            _phantom: PhantomData,
        }
    }

    /// Set the queue capacity (must be a power of two, at least 2).
    #[must_use]
    pub const fn capacity(mut self, cap: usize) -> Self {
        self.capacity = Some(cap);
        self
    }

    /// Create the producer/consumer pair with dynamic capacity.
    pub fn channels(self) -> Result<(Producer<T>, Consumer<T>), QueueError> {
        let capacity = self.capacity.ok_or(QueueError::InvalidCapacity)?;
        let queue = Arc::new(SpscQueue::<T, 0>::new(capacity)?);
        Ok((
            Producer {
                queue: Arc::clone(&queue),
            },
            Consumer { queue },
        ))
    }

    /// Create the producer/consumer pair with compile-time capacity.
    ///
    /// The capacity is `N` unless one was set on the builder, in which case
    /// the two must match.
    pub fn channels_static<const N: usize>(
        self,
    ) -> Result<(Producer<T, N>, Consumer<T, N>), QueueError> {
        let capacity = self.capacity.unwrap_or(N);
        let queue = Arc::new(SpscQueue::<T, N>::new(capacity)?);
        Ok((
            Producer {
                queue: Arc::clone(&queue),
            },
            Consumer { queue },
        ))
    }
}

/// Convenience function for creating an SPSC queue builder.
///
/// This is the primary entry point for creating SPSC queues.
pub const fn queue<T>() -> QueueBuilder<T> {
    QueueBuilder::new()
}

/// Producer handle for the SPSC queue.
///
/// The unique, non-cloneable handle that pushes items into the queue. `push`
/// takes `&mut self`, so only one thread can produce at a time; the handle is
/// `Send`, so the producer role may migrate between threads with the
/// hand-off of the handle as the happens-before edge.
pub struct Producer<T, const N: usize = 0> {
    queue: Arc<SpscQueue<T, N>>,
}

impl<T, const N: usize> Producer<T, N> {
    /// Get the exact number of elements currently in the queue.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the capacity of the underlying queue.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

impl<T, const N: usize> fmt::Debug for Producer<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("queue", &self.queue)
            .finish()
    }
}

impl<T, const N: usize> QueueProducer<T> for Producer<T, N> {
    unsafe fn push(&mut self, value: T) {
        // SAFETY: `&mut self` on the unique producer handle makes this thread
        // the sole producer; the not-full contract is forwarded to the caller.
        unsafe { self.queue.push(value) }
    }
}

/// Consumer handle for the SPSC queue.
///
/// The unique, non-cloneable handle that pops items from the queue. `pop`
/// takes `&mut self`; [`len`](Consumer::len) is a shared-access exact count.
pub struct Consumer<T, const N: usize = 0> {
    queue: Arc<SpscQueue<T, N>>,
}

impl<T, const N: usize> Consumer<T, N> {
    /// Get the exact number of elements currently in the queue.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the capacity of the underlying queue.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

impl<T, const N: usize> fmt::Debug for Consumer<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("queue", &self.queue)
            .finish()
    }
}

impl<T, const N: usize> QueueConsumer<T> for Consumer<T, N> {
    fn pop(&mut self) -> Result<T, QueueError> {
        // SAFETY: `&mut self` on the unique consumer handle makes this thread
        // the sole consumer.
        unsafe { self.queue.pop() }
    }

    fn is_empty(&mut self) -> bool {
        self.queue.len() == 0
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::thread;

    #[test]
    fn rejects_invalid_capacities() {
        assert!(matches!(
            queue::<u32>().capacity(0).channels(),
            Err(QueueError::InvalidCapacity)
        ));
        assert!(matches!(
            queue::<u32>().capacity(1).channels(),
            Err(QueueError::InvalidCapacity)
        ));
        assert!(matches!(
            queue::<u32>().capacity(100).channels(),
            Err(QueueError::InvalidCapacity)
        ));
        assert!(matches!(
            queue::<u32>().channels(),
            Err(QueueError::InvalidCapacity)
        ));
        assert!(matches!(
            queue::<u32>().capacity(4).channels_static::<8>(),
            Err(QueueError::CapacityMismatch)
        ));
        assert!(queue::<u32>().channels_static::<8>().is_ok());
    }

    #[test]
    fn fifo_single_thread() {
        let (mut producer, mut consumer) = queue::<u32>().capacity(8).channels().unwrap();

        for i in 0..8 {
            // SAFETY: eight elements, capacity 8.
            unsafe { producer.push(i) };
        }
        for i in 0..8 {
            assert_eq!(consumer.pop().unwrap(), i);
        }
        assert!(matches!(consumer.pop(), Err(QueueError::Empty)));
    }

    #[test]
    fn size_is_exact_and_monotonic() {
        let (mut producer, mut consumer) = queue::<u32>().capacity(64).channels().unwrap();

        for i in 0..64 {
            // SAFETY: at most 64 elements, capacity 64.
            unsafe { producer.push(i) };
            assert_eq!(producer.len(), (i + 1) as usize);
        }

        for i in 0..64 {
            assert_eq!(consumer.pop().unwrap(), i);
            assert_eq!(consumer.len(), 63 - i as usize);
        }
        assert!(consumer.is_empty());
        assert!(producer.is_empty());
    }

    #[test]
    fn size_tracks_drain_and_refill() {
        let (mut producer, mut consumer) = queue::<u64>().capacity(131_072).channels().unwrap();

        for i in 0..65_536u64 {
            // SAFETY: capacity exceeds every in-flight count in this test.
            unsafe { producer.push(i) };
        }
        assert_ne!(producer.len(), 0);

        for _ in 0..65_536 {
            assert!(consumer.pop().is_ok());
        }
        assert_eq!(consumer.len(), 0);

        unsafe { producer.push(0) };
        assert_ne!(consumer.len(), 0);
        assert!(consumer.pop().is_ok());
        assert_eq!(consumer.len(), 0);
    }

    #[test]
    fn wraps_around_the_ring() {
        let (mut producer, mut consumer) = queue::<usize>().capacity(4).channels().unwrap();

        for round in 0..100 {
            for i in 0..4 {
                // SAFETY: the ring is drained every round.
                unsafe { producer.push(round * 10 + i) };
            }
            for i in 0..4 {
                assert_eq!(consumer.pop().unwrap(), round * 10 + i);
            }
        }
    }

    #[test]
    fn concurrent_fifo_order_is_preserved() {
        const TOTAL: usize = 131_072;
        let (producer, consumer) = queue::<u64>().capacity(TOTAL).channels().unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let push_side = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut producer = producer;
                barrier.wait();
                for i in 0..TOTAL as u64 {
                    // SAFETY: sole producer; capacity equals the total count.
                    unsafe { producer.push(i) };
                }
            })
        };

        let pop_side = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut consumer = consumer;
                let mut received = Vec::with_capacity(TOTAL);
                barrier.wait();
                while received.len() < TOTAL {
                    match consumer.pop() {
                        Ok(value) => received.push(value),
                        Err(QueueError::Empty) => thread::yield_now(),
                        Err(e) => panic!("unexpected queue error: {e:?}"),
                    }
                }
                (consumer, received)
            })
        };

        push_side.join().unwrap();
        let (consumer, received) = pop_side.join().unwrap();

        assert_eq!(received.len(), TOTAL);
        assert!(received.iter().copied().eq(0..TOTAL as u64));
        assert_eq!(consumer.len(), 0);
    }

    struct Counted {
        value: u32,
        live: Arc<StdAtomicUsize>,
    }

    impl Counted {
        fn new(value: u32, live: &Arc<StdAtomicUsize>) -> Self {
            live.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Self {
                value,
                live: Arc::clone(live),
            }
        }
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.live.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    #[test]
    fn drop_balance_for_drained_and_abandoned_values() {
        let live = Arc::new(StdAtomicUsize::new(0));

        {
            let (mut producer, mut consumer) = queue::<Counted>().capacity(16).channels().unwrap();
            // SAFETY: two elements, capacity 16.
            unsafe { producer.push(Counted::new(1, &live)) };
            unsafe { producer.push(Counted::new(2, &live)) };

            assert_eq!(consumer.pop().unwrap().value, 1);
            assert_eq!(consumer.pop().unwrap().value, 2);
        }
        assert_eq!(live.load(std::sync::atomic::Ordering::Relaxed), 0);

        {
            let (mut producer, _consumer) = queue::<Counted>().capacity(16).channels().unwrap();
            // SAFETY: two elements, capacity 16.
            unsafe { producer.push(Counted::new(3, &live)) };
            unsafe { producer.push(Counted::new(4, &live)) };
            assert_eq!(live.load(std::sync::atomic::Ordering::Relaxed), 2);
        }
        // Teardown iterated the occupied window and ran both destructors.
        assert_eq!(live.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[test]
    fn drop_balance_with_wrapped_window() {
        let live = Arc::new(StdAtomicUsize::new(0));

        {
            let (mut producer, mut consumer) = queue::<Counted>().capacity(4).channels().unwrap();
            // Advance the window so that the occupied region wraps the ring.
            for i in 0..3 {
                // SAFETY: at most three elements in flight, capacity 4.
                unsafe { producer.push(Counted::new(i, &live)) };
            }
            for _ in 0..3 {
                consumer.pop().unwrap();
            }
            for i in 3..6 {
                unsafe { producer.push(Counted::new(i, &live)) };
            }
            assert_eq!(live.load(std::sync::atomic::Ordering::Relaxed), 3);
        }
        assert_eq!(live.load(std::sync::atomic::Ordering::Relaxed), 0);
    }
}

#[cfg(all(loom, test))]
mod loom_tests {
    use super::*;
    use loom::thread;

    #[test]
    fn fifo_across_threads() {
        loom::model(|| {
            let (producer, consumer) = queue::<u32>().capacity(4).channels().unwrap();

            let push_side = thread::spawn(move || {
                let mut producer = producer;
                // SAFETY: two pushes, capacity 4.
                unsafe { producer.push(1) };
                unsafe { producer.push(2) };
            });

            let mut consumer = consumer;
            let mut received = Vec::new();
            while received.len() < 2 {
                match consumer.pop() {
                    Ok(value) => received.push(value),
                    Err(_) => thread::yield_now(),
                }
            }

            push_side.join().unwrap();
            assert_eq!(received, [1, 2]);
        });
    }

    #[test]
    fn size_snapshot_is_bounded() {
        loom::model(|| {
            let (producer, consumer) = queue::<u32>().capacity(2).channels().unwrap();

            let push_side = thread::spawn(move || {
                let mut producer = producer;
                // SAFETY: one push, capacity 2.
                unsafe { producer.push(9) };
            });

            // Racing snapshot: either the push landed or it did not.
            assert!(consumer.len() <= 1);

            push_side.join().unwrap();
            let mut consumer = consumer;
            assert_eq!(consumer.pop().unwrap(), 9);
            assert_eq!(consumer.len(), 0);
        });
    }
}
