use crate::{
    QueueError,
    sync::{AtomicBool, AtomicU32, Ordering},
    traits::{QueueConsumer, QueueProducer},
    validate_capacity,
};
use crossbeam_utils::CachePadded;
use std::{cell::UnsafeCell, fmt, marker::PhantomData, mem, mem::MaybeUninit, sync::Arc};

/// A single ring slot: payload storage plus its occupancy flag.
///
/// `is_used == false` means the storage is logically uninitialized;
/// `is_used == true` means the queue owns a constructed value awaiting the
/// consumer. The flag transitions `false -> true` exactly once per
/// publication (by the producer that reserved the slot) and `true -> false`
/// exactly once per consumption (by the consumer).
struct Slot<T> {
    is_used: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            is_used: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Storage abstraction that can be either statically or dynamically sized.
///
/// The choice is determined by the const generic parameter `N`:
/// - `N = 0`: dynamic allocation using `Box<[T]>`
/// - `N > 0`: static allocation using `[T; N]`
///
/// Each slot is wrapped in `CachePadded` so that two producers that win
/// adjacent tickets never publish through the same cache line.
enum Storage<T, const N: usize> {
    /// Statically allocated slot array, used when `N > 0`.
    Static([CachePadded<Slot<T>>; N]),

    /// Dynamically allocated boxed slice of slots, used when `N = 0`.
    Dynamic(Box<[CachePadded<Slot<T>>]>),
}

impl<T, const N: usize> Storage<T, N> {
    #[inline]
    fn slot(&self, idx: usize) -> &Slot<T> {
        match self {
            Self::Static(slots) => &slots[idx],
            Self::Dynamic(slots) => &slots[idx],
        }
    }
}

/// Wait-free multi-producer single-consumer ring buffer.
///
/// The ring is indexed by two 32-bit wrapping ticket counters. A producer
/// linearizes its reservation with a single fetch-add on `tail`, constructs
/// the element in the reserved slot, and publishes it with a release store of
/// the slot's occupancy flag. The consumer optimistically claims the next
/// ticket from `head`, probes the slot's flag with an acquire load, and rolls
/// the claim back if the slot has not been published yet. Every operation is
/// a bounded number of steps; nothing retries or spins.
///
/// Dequeue order equals *publication* order, which matches each producer's
/// program order but is not a global FIFO across producers: if one producer
/// reserves a ticket and is preempted before publishing, the consumer reports
/// empty at that position even when later tickets are already published.
///
/// Instances are created through [`queue`] / [`QueueBuilder`] and used
/// exclusively through the [`Producer`] and [`Consumer`] handles.
///
/// # Type Parameters
///
/// * `T` - The element type (any `T: Send`; moved in on push, moved out on pop)
/// * `N` - Compile-time capacity (0 = dynamic allocation, >0 = static)
pub struct MpscQueue<T, const N: usize = 0> {
    storage: CachePadded<Storage<T, N>>,
    capacity: usize,
    mask: u32,
    /// Consumer ticket counter.
    head: CachePadded<AtomicU32>,
    /// Producer ticket counter. A pure ticket dispenser: the fetch-add
    /// carries no ordering, publication goes through the slot flags.
    tail: CachePadded<AtomicU32>,
}

impl<T, const N: usize> MpscQueue<T, N> {
    pub(crate) fn new(capacity: usize) -> Result<Self, QueueError> {
        if N > 0 && capacity != N {
            return Err(QueueError::CapacityMismatch);
        }
        validate_capacity(capacity)?;

        let storage = if N > 0 {
            Storage::Static(std::array::from_fn(|_| CachePadded::new(Slot::new())))
        } else {
            Storage::Dynamic(
                (0..capacity)
                    .map(|_| CachePadded::new(Slot::new()))
                    .collect(),
            )
        };

        Ok(Self {
            storage: CachePadded::new(storage),
            capacity,
            mask: (capacity - 1) as u32,
            head: CachePadded::new(AtomicU32::new(0)),
            tail: CachePadded::new(AtomicU32::new(0)),
        })
    }

    /// Get the capacity of the queue.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// # Safety
    ///
    /// The queue must not be full: the caller dimensions `capacity` strictly
    /// above the worst-case in-flight element count. Callable from any
    /// thread, concurrently with other pushes and with the consumer.
    pub(crate) unsafe fn push(&self, value: T) {
        let ticket = self.tail.fetch_add(1, Ordering::Relaxed);
        let slot = self.storage.slot((ticket & self.mask) as usize);

        debug_assert!(
            !slot.is_used.load(Ordering::Acquire),
            "mpsc queue overflow: capacity must exceed the worst-case in-flight count"
        );

        // SAFETY: the ticket from `tail` grants this producer exclusive
        // access to the slot's storage until the release store below, and
        // `is_used == false` means the storage holds no live value.
        unsafe { (*slot.value.get()).write(value) };

        // Publishes the construction above to the consumer's acquire probe.
        slot.is_used.store(true, Ordering::Release);
    }

    /// # Safety
    ///
    /// Must only be called by the single consumer. The optimistic
    /// claim-then-roll-back on `head` is what makes concurrent callers
    /// undefined: two threads racing the rollback corrupt the consumer lane.
    pub(crate) unsafe fn pop(&self) -> Result<T, QueueError> {
        let ticket = self.head.fetch_add(1, Ordering::Relaxed);
        let slot = self.storage.slot((ticket & self.mask) as usize);

        if !slot.is_used.load(Ordering::Acquire) {
            // Not yet published. Release the claim; producers never read
            // `head`, so the rollback races with nothing.
            self.head.fetch_sub(1, Ordering::Relaxed);
            return Err(QueueError::Empty);
        }

        // SAFETY: the acquire load above synchronized with the publishing
        // producer's release store, so the slot holds a fully constructed
        // value that this (sole) consumer now owns.
        let value = unsafe { (*slot.value.get()).assume_init_read() };

        // The next reader of this flag is the producer that wins this slot's
        // ticket again; its own reservation on `tail` orders that access.
        slot.is_used.store(false, Ordering::Relaxed);

        Ok(value)
    }

    /// Reports whether the slot the consumer would claim next is unpublished.
    ///
    /// Shares the consumer lane with `pop` (the public wrappers enforce
    /// this); it is a peek, not a linearization point.
    pub(crate) fn probe_empty(&self) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        !self
            .storage
            .slot((head & self.mask) as usize)
            .is_used
            .load(Ordering::Acquire)
    }
}

impl<T, const N: usize> fmt::Debug for MpscQueue<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpscQueue")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<T, const N: usize> Drop for MpscQueue<T, N> {
    fn drop(&mut self) {
        if !mem::needs_drop::<T>() {
            return;
        }
        for i in 0..self.capacity {
            let slot = self.storage.slot(i);
            if slot.is_used.load(Ordering::Acquire) {
                // SAFETY: an occupied slot holds a constructed value the
                // queue still owns; teardown is exclusive (`&mut self`).
                unsafe { (*slot.value.get()).assume_init_drop() };
            }
        }
    }
}

// SAFETY: slots transfer `T` by value between threads, so `T: Send` is
// required and sufficient. Cross-thread access to the slot storage is
// mediated by the ticket counters and the per-slot occupancy flags.
unsafe impl<T: Send, const N: usize> Send for MpscQueue<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for MpscQueue<T, N> {}

/// Builder for creating MPSC queues.
///
/// Provides a fluent API for constructing a queue with a validated capacity
/// and obtaining its handle pair. The handles are minted exactly once:
/// producers can be cloned freely afterwards, the consumer cannot.
///
/// # Examples
///
/// ```
/// use baton::{
///     mpsc,
///     traits::{QueueConsumer, QueueProducer},
/// };
///
/// # fn main() -> Result<(), baton::QueueError> {
/// let (mut producer, mut consumer) = mpsc::queue::<u32>().capacity(64).channels()?;
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
        let queue = Arc::new(MpscQueue::<T, 0>::new(capacity)?);
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
        let queue = Arc::new(MpscQueue::<T, N>::new(capacity)?);
        Ok((
            Producer {
                queue: Arc::clone(&queue),
            },
            Consumer { queue },
        ))
    }
}

/// Convenience function for creating an MPSC queue builder.
///
/// This is the primary entry point for creating MPSC queues.
///
/// # Examples
///
/// ```
/// use baton::{mpsc, traits::QueueProducer};
///
/// # fn main() -> Result<(), baton::QueueError> {
/// let (mut producer, _consumer) = mpsc::queue::<u64>().capacity(128).channels()?;
///
/// // SAFETY: one element in flight, capacity 128.
/// unsafe { producer.push(42) };
/// # Ok(())
/// # }
/// ```
pub const fn queue<T>() -> QueueBuilder<T> {
    QueueBuilder::new()
}

/// Producer handle for the MPSC queue.
///
/// A lightweight, cloneable handle that allows pushing items to the queue.
/// Clones share the same underlying queue via `Arc`, and any number of them
/// may push concurrently from any number of threads.
///
/// # Examples
///
/// ```
/// use baton::{mpsc, traits::QueueProducer};
/// use std::thread;
///
/// # fn main() -> Result<(), baton::QueueError> {
/// let (producer, _consumer) = mpsc::queue::<u64>().capacity(128).channels()?;
///
/// // Clone producer for another thread
/// let mut producer2 = producer.clone();
/// let handle = thread::spawn(move || {
///     // SAFETY: two elements in flight at worst, capacity 128.
///     unsafe { producer2.push(42) };
/// });
///
/// let mut producer = producer;
/// unsafe { producer.push(100) };
/// handle.join().unwrap();
/// # Ok(())
/// # }
/// ```
pub struct Producer<T, const N: usize = 0> {
    queue: Arc<MpscQueue<T, N>>,
}

impl<T, const N: usize> Clone for Producer<T, N> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<T, const N: usize> Producer<T, N> {
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
        // SAFETY: the not-full contract is forwarded to the caller; any
        // number of producer handles may push concurrently.
        unsafe { self.queue.push(value) }
    }
}

/// Consumer handle for the MPSC queue.
///
/// The unique, non-cloneable handle that pops items from the queue. All
/// consumer operations take `&mut self`, so only one thread can be in the
/// consumer lane at a time; the handle is `Send`, so the consumer role may
/// migrate between threads (moving the handle provides the happens-before
/// edge between the outgoing and incoming consumer).
///
/// `is_empty` counts as a consumer operation: it probes the same slot the
/// next `pop` would claim.
pub struct Consumer<T, const N: usize = 0> {
    queue: Arc<MpscQueue<T, N>>,
}

impl<T, const N: usize> Consumer<T, N> {
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
        // SAFETY: `&mut self` on the sole, non-cloneable consumer handle
        // makes this thread the only one in the consumer lane.
        unsafe { self.queue.pop() }
    }

    fn is_empty(&mut self) -> bool {
        self.queue.probe_empty()
    }
}


#[cfg(all(loom, test))]
mod loom_tests {
    use super::*;
    use loom::thread;

    #[test]
    fn two_producers_one_consumer() {
        loom::model(|| {
            let (producer, consumer) = queue::<usize>().capacity(4).channels().unwrap();

            let handles: Vec<_> = (0..2)
                .map(|id| {
                    let mut producer = producer.clone();
                    thread::spawn(move || {
                        // SAFETY: two pushes total, capacity 4.
                        unsafe { producer.push(id) };
                    })
                })
                .collect();

            let mut consumer = consumer;
            let mut seen = Vec::new();
            while seen.len() < 2 {
                match consumer.pop() {
                    Ok(value) => seen.push(value),
                    Err(_) => thread::yield_now(),
                }
            }

            for handle in handles {
                handle.join().unwrap();
            }

            seen.sort_unstable();
            assert_eq!(seen, [0, 1]);
        });
    }

    #[test]
    fn empty_pop_rolls_back_reservation() {
        loom::model(|| {
            let (producer, mut consumer) = queue::<u32>().capacity(2).channels().unwrap();

            let pusher = thread::spawn(move || {
                let mut producer = producer;
                // SAFETY: one push, capacity 2.
                unsafe { producer.push(7) };
            });

            // May observe the unpublished slot; the claim must roll back
            // cleanly either way.
            let first = consumer.pop().ok();
            pusher.join().unwrap();
            let second = consumer.pop().ok();

            let received: Vec<_> = first.into_iter().chain(second).collect();
            assert_eq!(received, [7]);
        });
    }
}
