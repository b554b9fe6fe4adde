//! Play queue management.
//!
//! The queue keeps the tracks in the order they were supplied and, while
//! shuffle is on, a permutation of them with the current track pinned at
//! position 0. Every index the queue hands out refers to the *active*
//! order: the permutation when shuffling, the original order otherwise.

use rand::seq::SliceRandom;

use super::state::RepeatMode;
use crate::model::Track;

/// Where a skip should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Start the current track again at 0
    Restart,
    /// Load the track at this active index
    Goto(usize),
    /// End of queue; transport stops
    Stop,
}

/// The play queue with current position tracking.
#[derive(Debug, Clone, Default)]
pub struct PlayQueue {
    /// Tracks in the order they were supplied
    original: Vec<Track>,
    /// Shuffle permutation, present while shuffle is on
    shuffled: Option<Vec<Track>>,
    /// Current position in the active order
    index: usize,
}

impl PlayQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole queue and drop any shuffle permutation.
    pub fn replace(&mut self, tracks: Vec<Track>, index: usize) {
        self.original = tracks;
        self.shuffled = None;
        self.index = index.min(self.original.len().saturating_sub(1));
    }

    /// Tracks in playback order.
    pub fn active(&self) -> &[Track] {
        self.shuffled.as_deref().unwrap_or(&self.original)
    }

    /// Tracks in the order they were supplied.
    pub fn original(&self) -> &[Track] {
        &self.original
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    pub fn len(&self) -> usize {
        self.original.len()
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled.is_some()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Move to `index`, clamped into range.
    pub fn set_index(&mut self, index: usize) {
        self.index = index.min(self.len().saturating_sub(1));
    }

    pub fn current(&self) -> Option<&Track> {
        self.active().get(self.index)
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.active().get(index)
    }

    /// Append tracks to the end of both orders.
    pub fn append(&mut self, tracks: Vec<Track>) {
        if let Some(shuffled) = &mut self.shuffled {
            shuffled.extend(tracks.iter().cloned());
        }
        self.original.extend(tracks);
    }

    /// Remove the track at active `index`.
    ///
    /// Removing before the current position shifts it back by one; removing
    /// the current track leaves the position where it is, clamped into range.
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        if index >= self.len() {
            return None;
        }

        let removed = match &mut self.shuffled {
            Some(shuffled) => {
                let track = shuffled.remove(index);
                if let Some(pos) = self.original.iter().position(|t| t.id == track.id) {
                    self.original.remove(pos);
                }
                track
            }
            None => self.original.remove(index),
        };

        if index < self.index {
            self.index -= 1;
        }
        self.index = self.index.min(self.len().saturating_sub(1));
        Some(removed)
    }

    /// Turn shuffle on or off.
    ///
    /// On: the current track moves to the front and the rest are shuffled.
    /// Off: the original order comes back and the position follows the
    /// current track (0 if it is no longer there).
    pub fn set_shuffle(&mut self, enabled: bool) {
        if enabled == self.is_shuffled() {
            return;
        }

        if enabled {
            let mut rest = self.original.clone();
            let mut order = Vec::with_capacity(rest.len());
            if self.index < rest.len() {
                order.push(rest.remove(self.index));
            }
            rest.shuffle(&mut rand::rng());
            order.extend(rest);
            self.shuffled = Some(order);
            self.index = 0;
        } else {
            let current_id = self.current().map(|t| t.id);
            self.shuffled = None;
            self.index = current_id
                .and_then(|id| self.original.iter().position(|t| t.id == id))
                .unwrap_or(0);
        }
    }

    /// Where `next` should go from the current position.
    pub fn next(&self, repeat: RepeatMode) -> Advance {
        if self.is_empty() {
            return Advance::Stop;
        }
        if repeat == RepeatMode::One {
            return Advance::Restart;
        }
        let next = self.index + 1;
        if next < self.len() {
            Advance::Goto(next)
        } else if repeat == RepeatMode::All {
            Advance::Goto(0)
        } else {
            Advance::Stop
        }
    }

    /// Where `previous` should go from the current position.
    ///
    /// Wraps to the last track under [`RepeatMode::All`], clamps to the
    /// first otherwise.
    pub fn previous(&self, repeat: RepeatMode) -> Advance {
        if self.is_empty() {
            return Advance::Stop;
        }
        match self.index.checked_sub(1) {
            Some(prev) => Advance::Goto(prev),
            None if repeat == RepeatMode::All => Advance::Goto(self.len() - 1),
            None => Advance::Goto(0),
        }
    }

    /// Track IDs in active order.
    pub fn track_ids(&self) -> Vec<u64> {
        self.active().iter().map(|t| t.id).collect()
    }
}
