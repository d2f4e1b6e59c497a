//! Bus slot allocation.
//!
//! The shared bus has a fixed number of slots. Each participant with an
//! attached generator owns at most one slot, and a slot has at most one owner.
//! Allocation always hands out the lowest free slot, so slots are reused as
//! soon as they are released.

use core::fmt;

use hashbrown::HashMap;
use itertools::Itertools;
use tracing::{debug, warn};

use crate::error::ChannelExhausted;
use crate::protocol::ParticipantId;

/// Number of bus slots.
pub const CAPACITY: usize = 8;

/// Index of a bus slot, always `< CAPACITY`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Channel(usize);

impl Channel {
    /// Returns the channel for `index`, or `None` if it is outside the bus.
    pub fn new(index: usize) -> Option<Self> {
        (index < CAPACITY).then_some(Channel(index))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Assigns and frees bus slots.
///
/// All calls happen on the control thread; there is no locking.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelAllocator {
    owned: HashMap<ParticipantId, Channel>,
}

impl ChannelAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `participant` the lowest free slot.
    ///
    /// A participant that already owns a slot keeps it. Exhaustion is reported,
    /// never resolved by evicting another owner.
    pub fn allocate(&mut self, participant: ParticipantId) -> Result<Channel, ChannelExhausted> {
        if let Some(&channel) = self.owned.get(&participant) {
            return Ok(channel);
        }
        let channel = self.lowest_free(None).ok_or_else(|| {
            warn!(%participant, "no free bus channel");
            ChannelExhausted::default()
        })?;
        debug!(%participant, %channel, "allocated bus channel");
        self.owned.insert(participant, channel);
        Ok(channel)
    }

    /// Free the slot owned by `participant`, if any.
    pub fn release(&mut self, participant: ParticipantId) -> Option<Channel> {
        let channel = self.owned.remove(&participant)?;
        debug!(%participant, %channel, "released bus channel");
        Some(channel)
    }

    /// The slot `participant` would get if it released its own slot and
    /// allocated again. Does not change any ownership.
    pub fn next_free_excluding(&self, participant: ParticipantId) -> Option<Channel> {
        self.lowest_free(Some(participant))
    }

    pub fn channel_of(&self, participant: ParticipantId) -> Option<Channel> {
        self.owned.get(&participant).copied()
    }

    /// Current owners, ordered by slot.
    pub fn owners(&self) -> Vec<(Channel, ParticipantId)> {
        self.owned
            .iter()
            .map(|(&id, &channel)| (channel, id))
            .sorted()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }

    // Walk the sorted owned slots and return the first gap, or one past the
    // highest slot when there is none.
    fn lowest_free(&self, ignoring: Option<ParticipantId>) -> Option<Channel> {
        let mut next = 0;
        for index in self
            .owned
            .iter()
            .filter(|(id, _)| Some(**id) != ignoring)
            .map(|(_, channel)| channel.index())
            .sorted()
        {
            if index > next {
                break;
            }
            next = index + 1;
        }
        Channel::new(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> ParticipantId {
        ParticipantId(n)
    }

    #[test]
    fn allocates_lowest_free_slot() {
        let mut channels = ChannelAllocator::new();
        assert_eq!(channels.allocate(id(10)).unwrap().index(), 0);
        assert_eq!(channels.allocate(id(11)).unwrap().index(), 1);
        assert_eq!(channels.allocate(id(12)).unwrap().index(), 2);

        channels.release(id(11));
        assert_eq!(channels.allocate(id(13)).unwrap().index(), 1);
        assert_eq!(channels.allocate(id(14)).unwrap().index(), 3);
    }

    #[test]
    fn reallocating_an_owner_keeps_its_slot() {
        let mut channels = ChannelAllocator::new();
        channels.allocate(id(1)).unwrap();
        let second = channels.allocate(id(2)).unwrap();
        assert_eq!(channels.allocate(id(2)).unwrap(), second);
        assert_eq!(channels.len(), 2);
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut channels = ChannelAllocator::new();
        for n in 0..CAPACITY as u32 {
            channels.allocate(id(n)).unwrap();
        }
        assert_eq!(
            channels.allocate(id(99)),
            Err(ChannelExhausted { capacity: CAPACITY })
        );
        // Nobody got evicted.
        assert_eq!(channels.len(), CAPACITY);
    }

    #[test]
    fn next_free_excluding_predicts_reallocation() {
        let mut channels = ChannelAllocator::new();
        channels.allocate(id(0)).unwrap();
        channels.allocate(id(1)).unwrap();
        channels.allocate(id(2)).unwrap();
        channels.release(id(0));

        // id 2 would move down to slot 0 after releasing slot 2.
        let predicted = channels.next_free_excluding(id(2)).unwrap();
        assert_eq!(predicted.index(), 0);
        channels.release(id(2));
        assert_eq!(channels.allocate(id(2)).unwrap(), predicted);
    }

    #[test]
    fn release_of_unknown_participant_is_noop() {
        let mut channels = ChannelAllocator::new();
        channels.allocate(id(1)).unwrap();
        let before = channels.clone();
        assert_eq!(channels.release(id(7)), None);
        assert_eq!(channels, before);
    }

    #[test]
    fn owners_are_ordered_by_slot() {
        let mut channels = ChannelAllocator::new();
        channels.allocate(id(5)).unwrap();
        channels.allocate(id(3)).unwrap();
        channels.allocate(id(9)).unwrap();
        let slots: Vec<usize> = channels.owners().iter().map(|(c, _)| c.index()).collect();
        assert_eq!(slots, vec![0, 1, 2]);
        assert_eq!(channels.owners()[1].1, id(3));
    }
}
