// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session state and lifecycle (spec.md §3 "Session", §3 "Lifecycle").

use serde::{Deserialize, Serialize};

use crate::window::Window;

/// Lifecycle state of a `Session` (spec.md §3, §4.7 state machine).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SessionStatus {
    Uninitialised,
    Ready,
    NeedsReinit,
    Dead,
}

/// One client/BMC relationship (spec.md §3 "Session"). Owned by a single
/// `HiomapDevice` behind its session mutex; never shared directly.
pub struct Session {
    pub protocol_version: u8,
    pub block_size_shift: u8,
    pub flash_size_blocks: u32,
    pub erase_granule_blocks: u32,
    /// Daemon-advertised timeout from GET_INFO, seconds. Supplements the
    /// distilled spec (§5 "Timeouts"): the original stores this in session
    /// state for the transport layer to honour rather than letting each
    /// transport pick its own value (see SPEC_FULL.md §10).
    pub timeout_s: u16,
    seq: u8,
    pub status: SessionStatus,
    pub window: Option<Window>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            protocol_version: 0,
            block_size_shift: 0,
            flash_size_blocks: 0,
            erase_granule_blocks: 0,
            timeout_s: 0,
            seq: 0,
            status: SessionStatus::Uninitialised,
            window: None,
        }
    }

    /// Block size in bytes, `1 << block_size_shift` (spec.md §3).
    pub fn block_size(&self) -> u32 {
        1u32 << self.block_size_shift
    }

    /// Flash size in bytes.
    pub fn flash_size_bytes(&self) -> u64 {
        u64::from(self.flash_size_blocks) << self.block_size_shift
    }

    /// Erase granule in bytes.
    pub fn erase_granule_bytes(&self) -> u64 {
        u64::from(self.erase_granule_blocks) << self.block_size_shift
    }

    /// Allocates the next sequence number: `seq <- (last+1)`, skipping 0
    /// (spec.md §4.3). Each session serializes its own calls, so there is
    /// never more than one outstanding request at a time to collide with.
    pub fn next_seq(&mut self) -> u8 {
        self.seq = self.seq.wrapping_add(1);
        if self.seq == 0 {
            self.seq = 1;
        }
        self.seq
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_monotonic_and_skip_zero() {
        let mut s = Session::new();
        let seqs: Vec<u8> = (0..260).map(|_| s.next_seq()).collect();
        assert_eq!(seqs[0], 1);
        assert!(seqs.iter().all(|&v| v != 0));
        // After wrapping past 255 it restarts at 1, never repeating a run.
        assert_eq!(seqs[254], 255);
        assert_eq!(seqs[255], 1);
    }

    #[test]
    fn block_size_follows_shift() {
        let mut s = Session::new();
        s.block_size_shift = 12;
        assert_eq!(s.block_size(), 4096);
    }
}
