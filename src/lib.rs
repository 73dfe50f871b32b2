//! # Baton: Wait-Free Bounded Hand-Off Queues
//!
//! Baton provides two bounded, wait-free, in-process queues intended as the
//! primary hand-off primitive between threads in latency-sensitive systems:
//! a multi-producer single-consumer queue and a single-producer
//! single-consumer queue with an exact size query.
//!
//! ## Features
//!
//! - **Wait-free fast path**: every operation completes in a bounded number
//!   of its own steps, independent of other threads' progress
//! - **Bounded, single-allocation storage**: one contiguous ring of slots
//!   sized at construction, no per-operation heap traffic
//! - **Cache-line isolation**: producer-side and consumer-side state never
//!   share a cache line
//! - **Arbitrary payloads**: any `T: Send`, including types with non-trivial
//!   destructors; values are moved in and out, never cloned
//! - **Statically enforced roles**: consumers (and the SPSC producer) are
//!   unique, non-cloneable handles, so the single-consumer precondition is a
//!   compile-time property rather than a comment
//!
//! ## Queue Types
//!
//! ### 1. MPSC ([`mpsc`])
//!
//! Any number of producer threads, exactly one consumer:
//!
//! ```rust
//! use baton::{
//!     mpsc,
//!     traits::{QueueConsumer, QueueProducer},
//! };
//!
//! # fn main() -> Result<(), baton::QueueError> {
//! let (mut producer, mut consumer) = mpsc::queue::<u64>().capacity(1024).channels()?;
//!
//! // SAFETY: at most one element is ever in flight here; capacity is 1024.
//! unsafe { producer.push(42) };
//! assert_eq!(consumer.pop()?, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ### 2. SPSC ([`spsc`])
//!
//! Exactly one producer and one consumer, strict FIFO, with an exact element
//! count readable from any thread:
//!
//! ```rust
//! use baton::{
//!     spsc,
//!     traits::{QueueConsumer, QueueProducer},
//! };
//!
//! # fn main() -> Result<(), baton::QueueError> {
//! let (mut producer, mut consumer) = spsc::queue::<u32>().capacity(64).channels()?;
//!
//! // SAFETY: two elements in flight, capacity 64.
//! unsafe { producer.push(1) };
//! unsafe { producer.push(2) };
//! assert_eq!(producer.len(), 2);
//!
//! assert_eq!(consumer.pop()?, 1);
//! assert_eq!(consumer.pop()?, 2);
//! assert_eq!(consumer.len(), 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Capacity Dimensioning
//!
//! `push` is an `unsafe fn`: it performs no fullness check, and pushing into
//! a full queue is undefined behavior. This is deliberate. The queues are
//! built for hot-path hand-off in systems where overflow means the system is
//! misconfigured; detecting fullness on the producer side would require a
//! CAS retry loop and forfeit wait-freedom. The caller promises, as the
//! safety contract of every `push`, that the capacity chosen at construction
//! strictly exceeds the worst-case number of in-flight elements. Debug
//! builds trap violations with an assertion.
//!
//! ## Ordering Guarantees
//!
//! - **SPSC**: strict FIFO.
//! - **MPSC**: elements are consumed in *publication* order, which matches
//!   each producer's program order but is not a global FIFO across
//!   producers. A successful `pop` always happens-after the `push` that
//!   produced the value.
//!
//! ## Thread Safety
//!
//! MPSC producer handles are cloneable and may push concurrently from any
//! number of threads; the consumer handle is unique and may migrate between
//! threads:
//!
//! ```rust
//! use baton::{
//!     mpsc,
//!     traits::{QueueConsumer, QueueProducer},
//! };
//! use std::thread;
//!
//! # fn main() -> Result<(), baton::QueueError> {
//! let (producer, mut consumer) = mpsc::queue::<usize>().capacity(256).channels()?;
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|p| {
//!         let mut producer = producer.clone();
//!         thread::spawn(move || {
//!             for i in 0..32 {
//!                 // SAFETY: 4 * 32 = 128 elements at worst, capacity is 256.
//!                 unsafe { producer.push(p * 100 + i) };
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! let mut received = 0;
//! while consumer.pop().is_ok() {
//!     received += 1;
//! }
//! assert_eq!(received, 128);
//! # Ok(())
//! # }
//! ```
//!
//! ## Memory Layout
//!
//! Both queues store elements in a power-of-two ring indexed by counters
//! masked to the ring size. Every MPSC slot, the MPSC `head`/`tail`
//! counters, and the SPSC private indices sit on their own cache lines to
//! eliminate false sharing between producers and the consumer.
//!
//! ## Error Handling
//!
//! Construction and consumption return `Result` types:
//! - [`QueueError::Empty`] - no element was available to pop
//! - [`QueueError::InvalidCapacity`] - capacity is not a power of two in the
//!   supported range
//! - [`QueueError::CapacityMismatch`] - runtime capacity conflicts with a
//!   compile-time capacity parameter
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! Baton requires Rust 1.88 or later.
#![deny(
    missing_docs,
    unused_imports,
    unused_variables,
    dead_code,
    unreachable_code,
    unused_must_use
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Wait-free multi-producer single-consumer queue.
///
/// This module provides the [`MpscQueue`] ring and its builder and handle
/// types. Producers race on a ticket counter and publish through per-slot
/// occupancy flags; the single consumer claims slots positionally.
///
/// [`MpscQueue`]: mpsc::MpscQueue
pub mod mpsc;

/// Wait-free single-producer single-consumer queue with an exact size query.
///
/// This module provides the [`SpscQueue`] ring and its builder and handle
/// types. The producer and consumer own private indices; a shared atomic
/// count is the only point of synchronization.
///
/// [`SpscQueue`]: spsc::SpscQueue
pub mod spsc;

/// Common traits for queue producers and consumers.
///
/// This module defines the abstractions shared by both queue families:
/// [`QueueProducer`] and [`QueueConsumer`].
///
/// [`QueueProducer`]: traits::QueueProducer
/// [`QueueConsumer`]: traits::QueueConsumer
pub mod traits;

mod sync;

use thiserror::Error;

/// Errors that can occur during queue construction and consumption.
///
/// Pushing cannot fail and therefore has no error variant: overflow is a
/// dimensioning bug on the caller's side, covered by the safety contract of
/// [`QueueProducer::push`](traits::QueueProducer::push).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue contains no elements to consume.
    ///
    /// For the MPSC queue this also covers the case where the next slot in
    /// line has been reserved by a producer but not yet published; the
    /// consumer's reservation is rolled back before this error is returned.
    #[error("queue is empty")]
    Empty,

    /// The specified capacity is invalid.
    ///
    /// Queue capacities must be powers of two, at least 2 and at most 2³¹.
    /// The power-of-two constraint turns index wrap-around into a bit mask;
    /// the upper bound keeps the 32-bit ticket counters unambiguous.
    #[error("invalid capacity: must be a power of two and >= 2")]
    InvalidCapacity,

    /// The runtime capacity does not match the compile-time capacity for
    /// static queues.
    ///
    /// When using const generic capacity parameters, a runtime capacity
    /// passed to the builder must match the compile-time parameter exactly.
    #[error("capacity mismatch for compile-time queue")]
    CapacityMismatch,
}

/// Largest accepted capacity.
///
/// The MPSC ticket counters are 32-bit and wrap; correctness requires that a
/// full queue (`tail - head == capacity`) is distinguishable from an empty
/// one modulo 2³².
pub(crate) const MAX_CAPACITY: usize = 1 << 31;

/// Checks the shared capacity constraints of both queue families.
pub(crate) fn validate_capacity(capacity: usize) -> Result<(), QueueError> {
    if capacity < 2 || capacity > MAX_CAPACITY || !capacity.is_power_of_two() {
        return Err(QueueError::InvalidCapacity);
    }
    Ok(())
}
