//! Items that travel through the handoff queues.
//!
//! - [`RawFragment`]: one block of 32-bit words read from the receive core.
//! - [`Event`] / [`Hit`]: decoded front-end data.
//! - [`EventBatch`]: the per-channel unit routed by the data processor.

use crate::router::ChannelId;
use serde::{Deserialize, Serialize};

/// One unit of raw data produced by the hardware receive path.
///
/// Bits 31..24 of every word carry the channel id, bits 23..0 the front-end
/// record. `iteration` is the scan iteration (mask stage) during which the
/// fragment was read out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFragment {
    /// Receive-core address the words came from
    pub address: u32,
    /// Scan iteration during readout
    pub iteration: u32,
    /// Raw 32-bit words, channel id in the top byte
    pub words: Vec<u32>,
}

impl RawFragment {
    /// Wrap words read during `iteration`.
    pub fn new(address: u32, iteration: u32, words: Vec<u32>) -> Self {
        Self {
            address,
            iteration,
            words,
        }
    }

    /// Number of 32-bit words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// True if the fragment carries no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// A single pixel hit. Columns and rows are 1-based, as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    /// Column, 1..=80
    pub col: u16,
    /// Row, 1..=336
    pub row: u16,
    /// Time over threshold in 25 ns clock units
    pub tot: u16,
}

/// Hits belonging to one trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Level-1 trigger id (5 bits)
    pub l1id: u16,
    /// Bunch crossing id (10 bits)
    pub bcid: u16,
    /// Hits in readout order
    pub hits: Vec<Hit>,
}

impl Event {
    /// Event without hits.
    pub fn new(l1id: u16, bcid: u16) -> Self {
        Self {
            l1id,
            bcid,
            hits: Vec::new(),
        }
    }
}

/// Decoded events of one channel from one raw fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    /// Channel the events were decoded for
    pub channel: ChannelId,
    /// Scan iteration the source fragment was read in
    pub iteration: u32,
    /// Events in trigger order
    pub events: Vec<Event>,
}

impl EventBatch {
    /// Empty batch.
    pub fn new(channel: ChannelId, iteration: u32) -> Self {
        Self {
            channel,
            iteration,
            events: Vec::new(),
        }
    }

    /// Total number of hits across all events.
    pub fn hit_count(&self) -> usize {
        self.events.iter().map(|e| e.hits.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_count() {
        let mut batch = EventBatch::new(2, 0);
        let mut ev = Event::new(1, 10);
        ev.hits.push(Hit { col: 1, row: 1, tot: 5 });
        ev.hits.push(Hit { col: 1, row: 2, tot: 6 });
        batch.events.push(ev);
        batch.events.push(Event::new(2, 11));
        assert_eq!(batch.hit_count(), 2);
    }

    #[test]
    fn test_fragment_len() {
        let frag = RawFragment::new(0, 3, vec![0x00E9_0000, 0x0]);
        assert_eq!(frag.len(), 2);
        assert!(!frag.is_empty());
        assert_eq!(frag.iteration, 3);
    }
}
