//! Per-channel fan-out of a single data stream.
//!
//! [`ChannelMap`] owns one [`HandoffQueue`] per readout channel for the lifetime
//! of a scan run. [`ChannelRouter`] borrows those queues and pushes each item to
//! the queue registered for its channel id. Nothing is created implicitly: an id
//! without a registration is rejected with [`DaqError::UnknownChannel`].
//!
//! ```text
//!                          ┌──▶ ch0 queue ──▶ histogram ▶ analysis
//! raw queue ─▶ processor ──┼──▶ ch1 queue ──▶ histogram ▶ analysis
//!                          └──▶ chN queue ──▶ ...
//! ```

use crate::error::{AppResult, DaqError};
use crate::handoff::HandoffQueue;
use std::collections::BTreeMap;
use tracing::debug;

/// Identifier of a physical readout channel.
pub type ChannelId = u32;

/// Owner of the per-channel queues of one scan run.
pub struct ChannelMap<T> {
    queues: BTreeMap<ChannelId, HandoffQueue<T>>,
}

impl<T> ChannelMap<T> {
    /// Build queues for channels `0..count`.
    pub fn with_channels(count: usize) -> AppResult<Self> {
        if count == 0 {
            return Err(DaqError::Configuration(
                "channel map needs at least one channel".into(),
            ));
        }
        let count = ChannelId::try_from(count).map_err(|_| {
            DaqError::Configuration(format!("channel count {} is too large", count))
        })?;
        Ok(Self::from_ids(0..count))
    }

    /// Build queues for an explicit set of channel ids.
    ///
    /// Repeated ids collapse into a single queue.
    pub fn from_ids(ids: impl IntoIterator<Item = ChannelId>) -> Self {
        let queues = ids
            .into_iter()
            .map(|id| (id, HandoffQueue::with_name(format!("ch{}", id))))
            .collect();
        Self { queues }
    }

    /// Queue of `channel`, if mapped.
    pub fn get(&self, channel: ChannelId) -> Option<&HandoffQueue<T>> {
        self.queues.get(&channel)
    }

    /// Queue of `channel` or [`DaqError::UnknownChannel`].
    pub fn queue(&self, channel: ChannelId) -> AppResult<&HandoffQueue<T>> {
        self.get(channel).ok_or(DaqError::UnknownChannel(channel))
    }

    /// Whether `channel` has a queue.
    pub fn contains(&self, channel: ChannelId) -> bool {
        self.queues.contains_key(&channel)
    }

    /// Mapped channel ids in ascending order.
    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.queues.keys().copied()
    }

    /// Number of mapped channels.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// True if no channel is mapped.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Router borrowing every queue of this map.
    pub fn router(&self) -> ChannelRouter<'_, T> {
        let routes = self.queues.iter().map(|(id, q)| (*id, q)).collect();
        ChannelRouter { routes }
    }

    /// Close every queue, signalling end-of-stream to the consumers.
    pub fn close_all(&self) {
        for queue in self.queues.values() {
            queue.close();
        }
    }

    /// Drop the contents of every queue; returns `(channel, discarded)` for each
    /// queue that still held items.
    pub fn discard_all(&self) -> Vec<(ChannelId, usize)> {
        self.queues
            .iter()
            .filter_map(|(id, q)| {
                let n = q.discard();
                (n > 0).then_some((*id, n))
            })
            .collect()
    }
}

impl<T> std::fmt::Debug for ChannelMap<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.queues.iter().map(|(id, q)| (id, q.len())))
            .finish()
    }
}

/// Borrowed routing table from channel id to queue.
pub struct ChannelRouter<'q, T> {
    routes: BTreeMap<ChannelId, &'q HandoffQueue<T>>,
}

impl<'q, T> ChannelRouter<'q, T> {
    /// Empty router; queues are added with [`register`](Self::register).
    pub fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// Associate `channel` with `queue`.
    ///
    /// Registering the same id twice is a configuration error.
    pub fn register(&mut self, channel: ChannelId, queue: &'q HandoffQueue<T>) -> AppResult<()> {
        if self.routes.contains_key(&channel) {
            return Err(DaqError::DuplicateChannel(channel));
        }
        debug!(channel, queue = queue.name(), "Registered channel route");
        self.routes.insert(channel, queue);
        Ok(())
    }

    /// Push `item` to the queue registered for `channel`.
    ///
    /// On [`DaqError::UnknownChannel`] the item is dropped and no queue is touched.
    pub fn route_to(&self, channel: ChannelId, item: T) -> AppResult<()> {
        let queue = self
            .routes
            .get(&channel)
            .ok_or(DaqError::UnknownChannel(channel))?;
        queue.push(item);
        Ok(())
    }

    /// Whether `channel` has a registered queue.
    pub fn contains(&self, channel: ChannelId) -> bool {
        self.routes.contains_key(&channel)
    }

    /// Registered channel ids in ascending order.
    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.routes.keys().copied()
    }

    /// Close every registered queue.
    pub fn close_all(&self) {
        for queue in self.routes.values() {
            queue.close();
        }
    }
}

impl<T> Default for ChannelRouter<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}
