// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The window manager (spec.md §4.5, §3 "Window"): tracks what the BMC has
//! currently mapped and decides hit vs. miss for a requested range.

use serde::{Deserialize, Serialize};

/// Direction of the currently mapped window.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Direction {
    Read,
    Write,
}

/// What the BMC currently has mapped into LPC space (spec.md §3).
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct Window {
    pub direction: Direction,
    pub flash_offset_blocks: u32,
    pub length_blocks: u32,
    pub lpc_offset_blocks: u32,
    pub valid: bool,
}

impl Window {
    pub fn new(
        direction: Direction,
        flash_offset_blocks: u32,
        length_blocks: u32,
        lpc_offset_blocks: u32,
    ) -> Self {
        Self { direction, flash_offset_blocks, length_blocks, lpc_offset_blocks, valid: true }
    }

    /// True if this window can satisfy `[off, off+len)` blocks in `direction`
    /// without renegotiation (spec.md §4.5 "Hit").
    pub fn hits(&self, direction: Direction, off_blocks: u32, len_blocks: u32) -> bool {
        if !self.valid || self.direction != direction || len_blocks == 0 {
            return false;
        }
        let Some(end) = off_blocks.checked_add(len_blocks) else { return false };
        let Some(window_end) =
            self.flash_offset_blocks.checked_add(self.length_blocks)
        else {
            return false;
        };
        off_blocks >= self.flash_offset_blocks && end <= window_end
    }

    /// Block offset within the current LPC window that corresponds to flash
    /// block `flash_block`. Caller must have already checked `hits`.
    pub fn lpc_block_for(&self, flash_block: u32) -> u32 {
        self.lpc_offset_blocks + (flash_block - self.flash_offset_blocks)
    }

    /// Invalidates the window; called on a `PROTOCOL_RESET`/`WINDOW_RESET`
    /// event (spec.md invariant 4).
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

/// Given a requested flash range and direction, and the window currently on
/// record, decides whether a fresh `CREATE_{READ,WRITE}_WINDOW` is required.
/// `None` means the current window (if any) is sufficient.
pub fn needs_negotiation(
    current: &Option<Window>,
    direction: Direction,
    off_blocks: u32,
    len_blocks: u32,
) -> bool {
    match current {
        Some(w) => !w.hits(direction, off_blocks, len_blocks),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_when_fully_contained_same_direction() {
        let w = Window::new(Direction::Read, 0, 2, 0x0fff);
        assert!(w.hits(Direction::Read, 0, 1));
        assert!(w.hits(Direction::Read, 1, 1));
        assert!(w.hits(Direction::Read, 0, 2));
    }

    #[test]
    fn miss_when_range_exceeds_window() {
        let w = Window::new(Direction::Read, 0, 1, 0x0fff);
        assert!(!w.hits(Direction::Read, 0, 2));
    }

    #[test]
    fn miss_on_direction_mismatch() {
        let w = Window::new(Direction::Read, 0, 4, 0x0fff);
        assert!(!w.hits(Direction::Write, 0, 1));
    }

    #[test]
    fn miss_when_invalidated() {
        let mut w = Window::new(Direction::Read, 0, 4, 0x0fff);
        w.invalidate();
        assert!(!w.hits(Direction::Read, 0, 1));
    }

    #[test]
    fn lpc_block_offsets_from_window_base() {
        let w = Window::new(Direction::Read, 4, 4, 0x0fff);
        assert_eq!(w.lpc_block_for(4), 0x0fff);
        assert_eq!(w.lpc_block_for(6), 0x0fff + 2);
    }

    #[test]
    fn no_window_always_needs_negotiation() {
        assert!(needs_negotiation(&None, Direction::Read, 0, 1));
    }

    #[test]
    fn reused_window_across_disjoint_subranges_does_not_need_negotiation() {
        let w = Some(Window::new(Direction::Read, 0, 4, 0x0fff));
        assert!(!needs_negotiation(&w, Direction::Read, 0, 2));
        assert!(!needs_negotiation(&w, Direction::Read, 2, 2));
    }
}
