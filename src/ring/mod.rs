//! `Ring<T>` — a single fixed-capacity SPSC ring buffer.
//!
//! This is the core of the crate (see the crate-level docs): the head/tail
//! atomic protocol, 128-byte producer/consumer cache-line isolation, the
//! cached-opposing-index optimization, zero-copy reserve/commit, and batched
//! consumption with a single atomic commit all live here.
//!
//! ## Physical layout
//!
//! `tail` and the producer's cached copy of `head` live together in one
//! [`crossbeam_utils::CachePadded`] region; `head` and the consumer's cached
//! copy of `tail` live in a distinct one. `CachePadded` pads to 128 bytes on
//! x86_64/aarch64 specifically to defeat adjacent-line hardware prefetchers
//! that would otherwise drag the producer's line into the consumer's cache
//! and vice versa — collapsing these into a single 64-byte line is the
//! classic mistake that passes every functional test and then loses an
//! order of magnitude of throughput under contention.

mod storage;

use std::marker::PhantomData;

use crossbeam_utils::CachePadded;
use static_assertions::const_assert;

use crate::backoff::Backoff;
use crate::error::{QueueError, Result};
use crate::sync::{AtomicBool, AtomicU64, Ordering};
use storage::RingStorage;

/// An element that can live in a ring slot: trivially copyable, cheaply
/// default-constructed, and shareable across the producer/consumer thread
/// pair. The ring never runs `T`'s destructor on overwrite.
pub trait Slot: Copy + Default + Send + 'static {}
impl<T: Copy + Default + Send + 'static> Slot for T {}

struct ProducerSide {
    /// Items committed by the producer. Producer-written, consumer-read.
    tail: AtomicU64,
    /// Producer's stale local view of `head`, refreshed only on the slow
    /// path so the fast path never touches the consumer's cache line.
    cached_head: std::cell::UnsafeCell<u64>,
    /// Set while a [`Reservation`] handed out by `reserve` has not yet been
    /// committed (or dropped). `reserve` takes `&self`, not `&mut self`, so
    /// nothing at the type level stops a caller from reserving twice before
    /// committing; this flag turns that misuse into an immediate panic
    /// instead of two live `&mut [T]` aliasing the same slots.
    pending: AtomicBool,
}

// Only the bound producer thread ever touches `cached_head`; that contract
// is documented, not enforced by the type system (see crate docs).
unsafe impl Sync for ProducerSide {}

struct ConsumerSide {
    /// Items consumed. Consumer-written, producer-read.
    head: AtomicU64,
    /// Consumer's stale local view of `tail`.
    cached_tail: std::cell::UnsafeCell<u64>,
}

unsafe impl Sync for ConsumerSide {}

const_assert!(std::mem::align_of::<CachePadded<ProducerSide>>() >= 32);

/// Relaxed-RMW counters, present unconditionally but only incremented when
/// a [`Ring`] (or its owning [`crate::channel::Channel`]) was constructed
/// with metrics enabled.
struct Metrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    batches_sent: AtomicU64,
    batches_received: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            batches_received: AtomicU64::new(0),
        }
    }
}

/// A point-in-time read of a ring's (or channel's) metrics. Exact values
/// across threads are only consistent at quiescence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub batches_sent: u64,
    pub batches_received: u64,
}

impl Metrics {
    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_received: self.batches_received.load(Ordering::Relaxed),
        }
    }
}

/// A single fixed-capacity SPSC ring buffer over elements of type `T`.
///
/// Exactly one producer thread and one consumer thread may operate on a
/// given `Ring` at a time. That contract is documented, not enforced by
/// the type system: `reserve`/`commit`/`send` must only ever be called by
/// one thread, and `readable`/`advance`/`consume_batch`/`consume_up_to`
/// only ever by one (possibly different) thread. Violating it is undefined
/// behavior.
pub struct Ring<T: Slot> {
    producer: CachePadded<ProducerSide>,
    consumer: CachePadded<ConsumerSide>,
    active: AtomicBool,
    closed: AtomicBool,
    metrics_enabled: bool,
    metrics: Metrics,
    buffer: RingStorage<T>,
    capacity: u64,
    mask: u64,
    _marker: PhantomData<T>,
}

/// A zero-copy capability granting exclusive write access to a contiguous
/// region of a ring's buffer until the ring's next `commit`. Borrows the
/// ring it came from, so it cannot outlive the next mutating operation on
/// that ring.
///
/// Only one `Reservation` may be outstanding per ring at a time — `reserve`
/// returns [`QueueError::ReservationInProgress`] if called again before this
/// one is committed or dropped, since `reserve` takes `&self` and nothing at
/// the type level otherwise prevents two overlapping `&mut [T]` into the
/// same slots.
pub struct Reservation<'a, T: Slot> {
    slice: &'a mut [T],
    /// Logical position `tail` held at reserve time.
    position: u64,
    /// The ring's `pending` flag, cleared on drop so an abandoned (never
    /// committed) reservation doesn't permanently lock out `reserve`.
    pending: &'a AtomicBool,
}

impl<'a, T: Slot> std::fmt::Debug for Reservation<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("position", &self.position)
            .field("len", &self.slice.len())
            .finish()
    }
}

impl<'a, T: Slot> Reservation<'a, T> {
    /// The logical position of the first reserved slot (`tail` at reserve
    /// time).
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of contiguous slots actually granted. May be less than the
    /// `n` requested from `reserve` if the ring's physical end was reached.
    pub fn len(&self) -> usize {
        self.slice.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slice.is_empty()
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.slice
    }
}

impl<'a, T: Slot> Drop for Reservation<'a, T> {
    fn drop(&mut self) {
        self.pending.store(false, Ordering::Release);
    }
}

/// A zero-copy view of items available to the consumer, from [`Ring::readable`].
pub struct ReadableView<'a, T: Slot> {
    slice: &'a [T],
    /// Logical position `head` held at readable-call time.
    position: u64,
}

impl<'a, T: Slot> ReadableView<'a, T> {
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn len(&self) -> usize {
        self.slice.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slice.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        self.slice
    }
}

impl<T: Slot> Ring<T> {
    /// Construct a ring with capacity `1 << ring_bits`, metrics optionally
    /// enabled.
    pub fn new(ring_bits: u32, enable_metrics: bool) -> Self {
        assert!(ring_bits > 0, "ring_bits must be non-zero");
        let capacity = 1u64 << ring_bits;
        Self {
            producer: CachePadded::new(ProducerSide {
                tail: AtomicU64::new(0),
                cached_head: std::cell::UnsafeCell::new(0),
                pending: AtomicBool::new(false),
            }),
            consumer: CachePadded::new(ConsumerSide {
                head: AtomicU64::new(0),
                cached_tail: std::cell::UnsafeCell::new(0),
            }),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            metrics_enabled: enable_metrics,
            metrics: Metrics::default(),
            buffer: RingStorage::new(capacity as usize),
            capacity,
            mask: capacity - 1,
            _marker: PhantomData,
        }
    }

    /// Ring capacity (a power of two).
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline(always)]
    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// Advisory occupancy; reads `tail`/`head` with relaxed ordering. Real
    /// correctness comes from the reserve/commit protocol, not this value.
    pub fn len(&self) -> u64 {
        let tail = self.producer.tail.load(Ordering::Relaxed);
        let head = self.consumer.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.producer.tail.load(Ordering::Relaxed) == self.consumer.head.load(Ordering::Relaxed)
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// Irrevocable. The ring may still contain un-drained items; the
    /// consumer should keep draining until `is_empty() && is_closed()`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ---- producer protocol -------------------------------------------

    /// Request a contiguous writable region of up to `n` slots.
    ///
    /// The caller may request `n` and receive fewer contiguous slots
    /// because the reservation is clipped at the buffer's physical end —
    /// it never wraps mid-reservation. Use what was granted, then issue a
    /// second `reserve` after committing for the remainder.
    ///
    /// Returns [`QueueError::ReservationInProgress`] if a [`Reservation`]
    /// from a previous `reserve` call is still outstanding (not yet
    /// committed or dropped). Calling `reserve` again in that state would
    /// otherwise hand out two live `&mut [T]` over the same slots, which is
    /// undefined behavior; this error surfaces the misuse to the caller
    /// instead of producing it.
    pub fn reserve(&self, n: usize) -> Result<Reservation<'_, T>> {
        if n == 0 || n as u64 > self.capacity {
            return Err(QueueError::NoCapacity);
        }

        if self.producer.pending.swap(true, Ordering::Acquire) {
            return Err(QueueError::ReservationInProgress);
        }

        let tail = self.producer.tail.load(Ordering::Relaxed);
        let cached_head = unsafe { *self.producer.cached_head.get() };
        let mut space = self.capacity.saturating_sub(tail.wrapping_sub(cached_head));

        if space < n as u64 {
            let head = self.consumer.head.load(Ordering::Acquire);
            unsafe { *self.producer.cached_head.get() = head };
            space = self.capacity.saturating_sub(tail.wrapping_sub(head));
            if space < n as u64 {
                self.producer.pending.store(false, Ordering::Release);
                return Err(QueueError::NoCapacity);
            }
        }

        let start_idx = (tail & self.mask) as usize;
        let contiguous = self.capacity - (tail & self.mask);
        let len = (n as u64).min(contiguous) as usize;

        let slice = unsafe { std::slice::from_raw_parts_mut(self.buffer.as_ptr().add(start_idx), len) };
        Ok(Reservation { slice, position: tail, pending: &self.producer.pending })
    }

    /// Loop on [`Ring::reserve`], backing off between attempts, until it
    /// succeeds, the ring is observed closed, or the backoff is exhausted.
    pub fn reserve_with_backoff(&self, n: usize) -> Result<Reservation<'_, T>> {
        let mut backoff = Backoff::new();
        loop {
            match self.reserve(n) {
                Ok(r) => return Ok(r),
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    if self.is_closed() {
                        return Err(e);
                    }
                    if backoff.is_completed() {
                        return Err(QueueError::BackoffExhausted);
                    }
                    backoff.snooze();
                }
            }
        }
    }

    /// Publish `n` written slots from the last reservation. `n` must not
    /// exceed that reservation's length — over-committing is caller error
    /// (checked in debug builds, undefined behavior in release). Clears
    /// the outstanding-reservation flag set by `reserve`, so a subsequent
    /// `reserve` call succeeds instead of returning
    /// [`QueueError::ReservationInProgress`].
    pub fn commit(&self, n: usize) {
        let tail = self.producer.tail.load(Ordering::Relaxed);
        debug_assert!(n as u64 <= self.capacity, "commit({n}) exceeds ring capacity");
        self.producer.tail.store(tail.wrapping_add(n as u64), Ordering::Release);
        self.producer.pending.store(false, Ordering::Release);
        if self.metrics_enabled {
            self.metrics.messages_sent.fetch_add(n as u64, Ordering::Relaxed);
            self.metrics.batches_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Convenience: reserve, copy `min(items.len(), reservation.len())`
    /// elements, commit. Returns the number copied.
    pub fn send(&self, items: &[T]) -> Result<usize> {
        let mut reservation = self.reserve(items.len())?;
        let n = reservation.len().min(items.len());
        reservation.as_mut_slice()[..n].copy_from_slice(&items[..n]);
        self.commit(n);
        Ok(n)
    }

    // ---- consumer protocol ---------------------------------------------

    /// Request a view of currently available items.
    pub fn readable(&self) -> Option<ReadableView<'_, T>> {
        let head = self.consumer.head.load(Ordering::Relaxed);
        let cached_tail = unsafe { *self.consumer.cached_tail.get() };
        let mut avail = cached_tail.wrapping_sub(head);

        if avail == 0 {
            let tail = self.producer.tail.load(Ordering::Acquire);
            unsafe { *self.consumer.cached_tail.get() = tail };
            avail = tail.wrapping_sub(head);
            if avail == 0 {
                return None;
            }
        }

        let start_idx = (head & self.mask) as usize;
        let contiguous = self.capacity - (head & self.mask);
        let len = avail.min(contiguous) as usize;
        let slice = unsafe { std::slice::from_raw_parts(self.buffer.as_ptr().add(start_idx), len) };
        Some(ReadableView { slice, position: head })
    }

    /// Release `n` consumed slots back to the producer. `n` must not
    /// exceed the last readable view's length.
    pub fn advance(&self, n: usize) {
        let head = self.consumer.head.load(Ordering::Relaxed);
        #[cfg(debug_assertions)]
        {
            let tail = self.producer.tail.load(Ordering::Acquire);
            debug_assert!(
                (n as u64) <= tail.wrapping_sub(head),
                "advance({n}) exceeds readable range"
            );
        }
        self.consumer.head.store(head.wrapping_add(n as u64), Ordering::Release);
    }

    /// Drain everything currently visible with a single release-store on
    /// `head`. Amortising that one atomic store (and the cache-line
    /// invalidation it causes) over a large batch is the single largest
    /// throughput win in this design.
    pub fn consume_batch<F: FnMut(&T)>(&self, handler: F) -> usize {
        self.consume_up_to(usize::MAX, handler)
    }

    /// Same as [`Ring::consume_batch`], bounded by `max`.
    pub fn consume_up_to<F: FnMut(&T)>(&self, max: usize, mut handler: F) -> usize {
        let head = self.consumer.head.load(Ordering::Relaxed);
        let tail = self.producer.tail.load(Ordering::Acquire);
        if tail == head {
            return 0;
        }

        let available = tail.wrapping_sub(head);
        let count = available.min(max as u64);
        let end = head.wrapping_add(count);

        let mut p = head;
        while p != end {
            let idx = (p & self.mask) as usize;
            let slot = unsafe { &*self.buffer.as_ptr().add(idx) };
            handler(slot);
            p = p.wrapping_add(1);
        }

        self.consumer.head.store(end, Ordering::Release);
        if self.metrics_enabled && count > 0 {
            self.metrics.messages_received.fetch_add(count, Ordering::Relaxed);
            self.metrics.batches_received.fetch_add(1, Ordering::Relaxed);
        }
        count as usize
    }

    /// Convenience fallback: copies up to `out.len()` items one readable
    /// view at a time. Not batched — prefer [`Ring::consume_batch`] on the
    /// hot path.
    pub fn recv(&self, out: &mut [T]) -> usize {
        let mut copied = 0;
        while copied < out.len() {
            match self.readable() {
                Some(view) => {
                    let n = view.len().min(out.len() - copied);
                    out[copied..copied + n].copy_from_slice(&view.as_slice()[..n]);
                    copied += n;
                    self.advance(n);
                }
                None => break,
            }
        }
        copied
    }
}

// `Ring<T>` is handed out across a producer thread and a consumer thread;
// interior mutability on `cached_head`/`cached_tail` is confined to the
// single thread documented to own each side.
unsafe impl<T: Slot> Send for Ring<T> {}
unsafe impl<T: Slot> Sync for Ring<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_round_trip() {
        let ring: Ring<u64> = Ring::new(16, false);
        let mut r = ring.reserve(4).unwrap();
        r.as_mut_slice().copy_from_slice(&[100, 200, 300, 400]);
        ring.commit(4);

        let view = ring.readable().unwrap();
        assert_eq!(view.as_slice(), &[100, 200, 300, 400]);
        ring.advance(4);
        assert!(ring.is_empty());
    }

    #[test]
    fn batch_consume_sums_in_order() {
        let ring: Ring<u64> = Ring::new(16, false);
        for i in 0..10u64 {
            ring.send(&[i * 10]).unwrap();
        }
        let mut sum = 0u64;
        let count = ring.consume_batch(|v| sum += *v);
        assert_eq!(count, 10);
        assert_eq!(sum, 450);
        assert!(ring.is_empty());
    }

    #[test]
    fn bounded_consume_splits_into_two_batches() {
        let ring: Ring<u64> = Ring::new(16, false);
        for i in 0..10u64 {
            ring.send(&[i * 10]).unwrap();
        }
        let mut sum = 0u64;
        let first = ring.consume_up_to(5, |v| sum += *v);
        assert_eq!(first, 5);
        assert_eq!(sum, 100);
        assert_eq!(ring.len(), 5);

        let second = ring.consume_up_to(10, |v| sum += *v);
        assert_eq!(second, 5);
        assert_eq!(sum, 450);
        assert!(ring.is_empty());
    }

    #[test]
    fn fill_then_reject() {
        let ring: Ring<u64> = Ring::new(4, false); // capacity 16
        for _ in 0..16 {
            ring.send(&[1]).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(ring.reserve(1).unwrap_err(), QueueError::NoCapacity);
        assert!(ring.reserve_with_backoff(1).is_err());
    }

    #[test]
    fn wrap_around_reservation_is_clipped_at_physical_end() {
        let ring: Ring<u64> = Ring::new(4, false); // capacity 16
        for i in 0..12u64 {
            ring.send(&[i]).unwrap();
        }
        ring.consume_batch(|_| {});
        assert!(ring.is_empty());

        // tail is now 12; physical end of a 16-slot buffer is 4 slots away.
        let r = ring.reserve(8).unwrap();
        assert_eq!(r.len(), 4);
        assert_eq!(r.position(), 12);
    }

    #[test]
    fn reserve_zero_or_over_capacity_fails() {
        let ring: Ring<u64> = Ring::new(4, false);
        assert!(ring.reserve(0).is_err());
        assert!(ring.reserve(17).is_err());
    }

    #[test]
    fn close_is_idempotent() {
        let ring: Ring<u64> = Ring::new(4, false);
        ring.close();
        ring.close();
        assert!(ring.is_closed());
    }

    #[test]
    fn second_reserve_before_commit_errors_instead_of_aliasing() {
        let ring: Ring<u64> = Ring::new(4, false);
        let _r1 = ring.reserve(4).unwrap();
        assert_eq!(ring.reserve(4).unwrap_err(), QueueError::ReservationInProgress);
    }

    #[test]
    fn dropping_a_reservation_without_committing_frees_it_for_reuse() {
        let ring: Ring<u64> = Ring::new(4, false);
        {
            let _r = ring.reserve(4).unwrap();
            // dropped here without a commit
        }
        // must not panic: the dropped reservation released the flag.
        let mut r2 = ring.reserve(4).unwrap();
        r2.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);
        ring.commit(4);

        let view = ring.readable().unwrap();
        assert_eq!(view.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn commit_frees_the_reservation_for_the_next_reserve_call() {
        let ring: Ring<u64> = Ring::new(4, false);
        let mut r1 = ring.reserve(2).unwrap();
        r1.as_mut_slice().copy_from_slice(&[1, 2]);
        ring.commit(2);

        // r1 is still in scope (not yet dropped) but reserve must already
        // succeed again, since commit cleared the outstanding flag.
        let mut r2 = ring.reserve(2).unwrap();
        r2.as_mut_slice().copy_from_slice(&[3, 4]);
        ring.commit(2);

        let mut sum = 0u64;
        let count = ring.consume_batch(|v| sum += *v);
        assert_eq!(count, 4);
        assert_eq!(sum, 10);
    }

    #[test]
    fn cache_padded_regions_are_isolated() {
        // Producer and consumer regions must not share a cache line;
        // `CachePadded`'s per-architecture alignment exists for exactly
        // this reason, so the gap between the two fields must be at least
        // one padded region wide.
        let ring: Ring<u64> = Ring::new(4, false);
        let producer_addr = &*ring.producer as *const ProducerSide as usize;
        let consumer_addr = &*ring.consumer as *const ConsumerSide as usize;
        let gap = consumer_addr.abs_diff(producer_addr);
        assert!(gap >= std::mem::size_of::<CachePadded<ProducerSide>>());
    }
}
