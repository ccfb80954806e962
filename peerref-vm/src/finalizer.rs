//! Deferred native finalizers.
//!
//! Managed objects that carry a [`NativePeer`] are dropped by the collector
//! while the heap lock is held. Running native code at that point could
//! re-enter the runtime, so the peer is queued here and the queue is drained
//! once the lock has been released.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
};

use crate::object::NativePeer;

pub struct FinalizerQueue {
    queue: Mutex<VecDeque<NativePeer>>,
    /// Lock-free fast path for `has_pending`.
    pending_count: AtomicU64,
}

impl Default for FinalizerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalizerQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(8)),
            pending_count: AtomicU64::new(0),
        }
    }

    /// Queues a peer whose managed half has been collected. Safe from any
    /// thread, including from inside the collector.
    pub fn defer(&self, peer: NativePeer) {
        {
            // The count moves under the queue lock so it never runs ahead
            // of what `process_all` can drain.
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.push_back(peer);
            self.pending_count.fetch_add(1, Ordering::Release);
        }
        log::trace!("Deferred native finalizer for {:#x} (pending: {})", peer.address, self.len());
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending_count.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.pending_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_pending()
    }

    /// Runs every queued finalizer, including ones queued by finalizers that
    /// ran in this call. Must not be called with the heap lock held.
    pub fn process_all(&self) -> usize {
        let mut processed = 0;
        while self.has_pending() {
            let batch: VecDeque<NativePeer> = {
                let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                let batch = std::mem::take(&mut *queue);
                self.pending_count
                    .fetch_sub(batch.len() as u64, Ordering::Release);
                batch
            };
            if batch.is_empty() {
                break;
            }
            processed += batch.len();
            for peer in batch {
                // SAFETY: the peer was recorded by the native object that owns
                // `address`, and that object unbinds itself before it is freed.
                unsafe { peer.run_finalizer() };
            }
        }
        if processed > 0 {
            log::trace!("Processed {} native finalizers", processed);
        }
        processed
    }
}

impl std::fmt::Debug for FinalizerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizerQueue")
            .field("pending_count", &self.len())
            .finish()
    }
}
