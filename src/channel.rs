//! `Channel<T>` — a fixed array of [`Ring`]s, one per producer, drained by
//! a single consumer.
//!
//! This is the ring-decomposition MPSC proper: instead of arbitrating a
//! single shared ring among N producers (which serializes them behind one
//! pair of head/tail cursors), each producer gets its own private SPSC
//! ring. Producers never contend with each other; the only multiplexing
//! happens on the consumer side, which sweeps the registered rings in
//! ascending id order on every call — lower ids are served first within a
//! single pass, though nothing stops a later call from observing writes
//! that arrived in between.

use std::sync::Arc;

use crate::error::{QueueError, Result};
use crate::ring::{MetricsSnapshot, Ring, Slot};
use crate::sync::{AtomicBool, AtomicUsize, Ordering};

/// Construction-time knobs for a [`Channel`]. Use one of the preset
/// constructors or build one up with the `with_*` methods.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    ring_bits: u32,
    max_producers: usize,
    enable_metrics: bool,
}

impl ChannelConfig {
    /// Start from [`ChannelConfig::default_profile`] and override fields
    /// with the `with_*` methods.
    pub fn new() -> Self {
        Self::default_profile()
    }

    /// Small rings, few producers: minimizes per-slot memory and favors
    /// latency over absorbing bursts.
    pub fn low_latency() -> Self {
        Self {
            ring_bits: crate::constants::LOW_LATENCY_RING_BITS,
            max_producers: crate::constants::DEFAULT_MAX_PRODUCERS,
            enable_metrics: false,
        }
    }

    /// Balanced defaults suitable for most workloads.
    pub fn default_profile() -> Self {
        Self {
            ring_bits: crate::constants::DEFAULT_RING_BITS,
            max_producers: crate::constants::DEFAULT_MAX_PRODUCERS,
            enable_metrics: false,
        }
    }

    /// Large rings, more producers: favors absorbing bursts and batch
    /// throughput over per-slot memory.
    pub fn high_throughput() -> Self {
        Self {
            ring_bits: crate::constants::HIGH_THROUGHPUT_RING_BITS,
            max_producers: crate::constants::HIGH_THROUGHPUT_MAX_PRODUCERS,
            enable_metrics: true,
        }
    }

    /// Each ring holds `1 << ring_bits` slots.
    pub fn with_ring_bits(mut self, ring_bits: u32) -> Self {
        self.ring_bits = ring_bits;
        self
    }

    pub fn with_max_producers(mut self, max_producers: usize) -> Self {
        self.max_producers = max_producers;
        self
    }

    pub fn with_metrics(mut self, enable_metrics: bool) -> Self {
        self.enable_metrics = enable_metrics;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.ring_bits == 0 || self.ring_bits > crate::constants::MAX_RING_BITS {
            return Err(QueueError::NoCapacity);
        }
        if self.max_producers == 0 {
            return Err(QueueError::TooManyProducers);
        }
        Ok(())
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::default_profile()
    }
}

/// An array of independent SPSC rings, one assigned per registered
/// producer, drained by a single consumer sweeping rings `0..producer_count`
/// in ascending order on every call.
pub struct Channel<T: Slot> {
    rings: Box<[Ring<T>]>,
    producer_count: AtomicUsize,
    closed: AtomicBool,
}

/// A handle bound to one of a channel's rings, returned by
/// [`Channel::register`]. Move this into the producer's thread; it keeps
/// the channel alive for as long as the handle exists.
pub struct ProducerHandle<T: Slot> {
    channel: Arc<Channel<T>>,
    ring_index: usize,
}

impl<T: Slot> std::fmt::Debug for ProducerHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("ring_index", &self.ring_index)
            .finish()
    }
}

impl<T: Slot> ProducerHandle<T> {
    /// Index of the ring this handle writes into, stable for the handle's
    /// lifetime.
    pub fn ring_index(&self) -> usize {
        self.ring_index
    }

    fn ring(&self) -> &Ring<T> {
        &self.channel.rings[self.ring_index]
    }

    pub fn reserve(&self, n: usize) -> Result<crate::ring::Reservation<'_, T>> {
        self.ring().reserve(n)
    }

    pub fn reserve_with_backoff(&self, n: usize) -> Result<crate::ring::Reservation<'_, T>> {
        self.ring().reserve_with_backoff(n)
    }

    pub fn commit(&self, n: usize) {
        self.ring().commit(n)
    }

    pub fn send(&self, items: &[T]) -> Result<usize> {
        self.ring().send(items)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ring().metrics()
    }
}

impl<T: Slot> Drop for ProducerHandle<T> {
    fn drop(&mut self) {
        self.channel.rings[self.ring_index].close();
    }
}

impl<T: Slot> Channel<T> {
    /// Construct a new channel. Wrap the result in an `Arc` (most callers
    /// will immediately do so, since [`Channel::register`] requires it)
    /// before registering producers.
    pub fn new(config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        let rings = (0..config.max_producers)
            .map(|_| Ring::new(config.ring_bits, config.enable_metrics))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            rings,
            producer_count: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Claim the next free ring and hand back a handle bound to it. Fails
    /// once `max_producers` handles have been issued, or after the channel
    /// is closed.
    pub fn register(self: &Arc<Self>) -> Result<ProducerHandle<T>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }

        let index = self.producer_count.fetch_add(1, Ordering::AcqRel);
        if index >= self.rings.len() {
            self.producer_count.fetch_sub(1, Ordering::AcqRel);
            return Err(QueueError::TooManyProducers);
        }

        self.rings[index].activate();
        tracing::debug!(ring_index = index, "producer registered");
        Ok(ProducerHandle {
            channel: Arc::clone(self),
            ring_index: index,
        })
    }

    /// Number of producers registered so far (monotonic, never decreases).
    pub fn producer_count(&self) -> usize {
        self.producer_count.load(Ordering::Acquire)
    }

    pub fn max_producers(&self) -> usize {
        self.rings.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the channel and every active ring within it. Producers that
    /// still hold a [`ProducerHandle`] will observe `reserve` failing
    /// (with [`QueueError::Closed`]-shaped intent, surfaced as
    /// [`QueueError::NoCapacity`] once the ring genuinely fills) rather
    /// than silently losing writes.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for ring in self.rings.iter() {
            if ring.is_active() {
                ring.close();
            }
        }
        tracing::debug!("channel closed");
    }

    /// Visit every registered ring once, in ascending id order, calling
    /// `handler` on each available item, and return the total consumed. A
    /// single pass may leave items behind in rings that filled after being
    /// visited; call in a loop to fully drain.
    pub fn consume_all<F: FnMut(&T)>(&self, mut handler: F) -> usize {
        self.consume_all_up_to(usize::MAX, &mut handler)
    }

    /// Same as [`Channel::consume_all`], but bounded by `max_total`: a
    /// single running budget threaded across every ring, not a per-ring
    /// cap. Lower-id rings are served first, so they drain completely
    /// before the budget reaches higher-id rings.
    pub fn consume_all_up_to<F: FnMut(&T)>(&self, max_total: usize, mut handler: F) -> usize {
        let registered = self.producer_count.load(Ordering::Acquire).min(self.rings.len());
        let mut remaining = max_total;
        for i in 0..registered {
            if remaining == 0 {
                break;
            }
            let n = self.rings[i].consume_up_to(remaining, &mut handler);
            remaining -= n;
        }
        max_total - remaining
    }

    /// Convenience fallback mirroring [`Ring::recv`]: copies up to
    /// `out.len()` items, visiting rings `0..producer_count` in ascending
    /// order. Not batched.
    pub fn recv(&self, out: &mut [T]) -> usize {
        let registered = self.producer_count.load(Ordering::Acquire).min(self.rings.len());
        let mut copied = 0;
        for i in 0..registered {
            if copied >= out.len() {
                break;
            }
            copied += self.rings[i].recv(&mut out[copied..]);
        }
        copied
    }

    /// True once every registered ring is both closed and drained.
    pub fn is_drained(&self) -> bool {
        let registered = self.producer_count.load(Ordering::Acquire).min(self.rings.len());
        (0..registered).all(|i| self.rings[i].is_empty())
    }

    /// Aggregate metrics across every ring.
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut total = MetricsSnapshot::default();
        for ring in self.rings.iter() {
            let m = ring.metrics();
            total.messages_sent += m.messages_sent;
            total.messages_received += m.messages_received;
            total.batches_sent += m.batches_sent;
            total.batches_received += m.batches_received;
        }
        total
    }
}
