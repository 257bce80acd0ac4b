// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The asynchronous BMC event channel (spec.md §4.4): a byte-wide bitmap,
//! latched until ACKed, merged in from a foreign context that never takes
//! the session lock.

use std::sync::{Condvar, Mutex};

/// Event bits, per spec.md §4.4.
pub const PROTOCOL_RESET: u8 = 1 << 0;
pub const WINDOW_RESET: u8 = 1 << 1;
pub const FLASH_LOST: u8 = 1 << 6;
pub const DAEMON_READY: u8 = 1 << 7;

/// Bits the host is responsible for clearing via `ACK`.
pub const ACK_MASK: u8 = PROTOCOL_RESET | WINDOW_RESET;

/// Latched, OR-accumulated BMC state, shared between the façade (which reads
/// and ACKs it while holding the session lock) and the event sink (which
/// merges into it from a foreign IPMI-notification context and never blocks
/// on the session lock). A `Condvar` wakes any façade call parked on a
/// window operation when new bits land.
#[derive(Default)]
pub struct EventState {
    bits: Mutex<u8>,
    changed: Condvar,
}

impl EventState {
    pub fn new() -> Self {
        Self { bits: Mutex::new(0), changed: Condvar::new() }
    }

    /// Merges `received` into the latched bitmap and wakes anyone waiting
    /// on it. This is the entire body of the event sink; it is safe to
    /// call from any context and never takes the session lock.
    ///
    /// Only `ACK_MASK` (`PROTOCOL_RESET`, `WINDOW_RESET`) OR-latches and
    /// stays set until an `ACK` explicitly clears it. `FLASH_LOST` and
    /// `DAEMON_READY` are live status bits with no corresponding ACK, so
    /// each merge overwrites them with whatever the latest byte says: a
    /// bare `PROTOCOL_RESET` event (daemon died again) must be able to
    /// present as `PROTOCOL_RESET` without `DAEMON_READY` even if a prior
    /// event once carried `DAEMON_READY` — an OR-latch would make that
    /// combination unreachable for the rest of the session.
    pub fn merge(&self, received: u8) {
        let mut bits = self.bits.lock().unwrap();
        *bits = (*bits & ACK_MASK) | received;
        self.changed.notify_all();
    }

    /// Current latched bitmap.
    pub fn snapshot(&self) -> u8 {
        *self.bits.lock().unwrap()
    }

    /// Clears `mask` from the latched bitmap; called after a successful ACK
    /// exchange with the BMC.
    pub fn clear(&self, mask: u8) {
        let mut bits = self.bits.lock().unwrap();
        *bits &= !mask;
    }
}

/// What the façade must do, in order, before it may proceed with a request.
/// Mirrors the decision policy in spec.md §4.4, consulted at façade entry,
/// before each `CREATE_*_WINDOW`, and after the window byte transfer for
/// writes (design note in spec.md §9 — point (c) is the one that's easy to
/// miss).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    /// `PROTOCOL_RESET` without `DAEMON_READY`: fail the caller outright.
    Dead,
    /// `FLASH_LOST` latched: fail with `TryAgain`, no state change.
    TryAgain,
    /// `PROTOCOL_RESET` (with `DAEMON_READY`): ACK it, then re-run
    /// GET_INFO/GET_FLASH_INFO and drop the window.
    NeedsReinit,
    /// `WINDOW_RESET` alone: ACK it and drop the window.
    NeedsWindowAck,
    /// Nothing latched that blocks progress.
    Proceed,
}

/// Evaluates the decision policy against a bitmap snapshot, per spec.md
/// §4.4 steps 1-5.
pub fn decide(bits: u8) -> Decision {
    if bits & PROTOCOL_RESET != 0 && bits & DAEMON_READY == 0 {
        Decision::Dead
    } else if bits & FLASH_LOST != 0 {
        Decision::TryAgain
    } else if bits & PROTOCOL_RESET != 0 {
        Decision::NeedsReinit
    } else if bits & WINDOW_RESET != 0 {
        Decision::NeedsWindowAck
    } else {
        Decision::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_reset_without_daemon_ready_is_dead() {
        assert_eq!(decide(PROTOCOL_RESET), Decision::Dead);
    }

    #[test]
    fn protocol_reset_with_daemon_ready_needs_reinit() {
        assert_eq!(decide(PROTOCOL_RESET | DAEMON_READY), Decision::NeedsReinit);
    }

    #[test]
    fn flash_lost_takes_priority_over_window_reset() {
        assert_eq!(decide(FLASH_LOST | WINDOW_RESET), Decision::TryAgain);
    }

    #[test]
    fn window_reset_alone_needs_ack() {
        assert_eq!(decide(WINDOW_RESET | DAEMON_READY), Decision::NeedsWindowAck);
    }

    #[test]
    fn nothing_latched_proceeds() {
        assert_eq!(decide(DAEMON_READY), Decision::Proceed);
    }

    #[test]
    fn ack_mask_bits_latch_across_merges() {
        let events = EventState::new();
        events.merge(DAEMON_READY);
        events.merge(WINDOW_RESET);
        // WINDOW_RESET stays latched even though the byte that carried it
        // didn't repeat DAEMON_READY; DAEMON_READY itself is a live bit and
        // is overwritten away since this byte didn't assert it.
        assert_eq!(events.snapshot(), WINDOW_RESET);
        events.clear(ACK_MASK);
        assert_eq!(events.snapshot(), 0);
    }

    #[test]
    fn daemon_ready_does_not_latch_past_a_bare_protocol_reset() {
        // Mirrors the upstream daemon-stopped scenario: DAEMON_READY seen
        // once, then a later event carries only PROTOCOL_RESET. The session
        // must see PROTOCOL_RESET without DAEMON_READY, not the OR of both,
        // or a real daemon death is misclassified as a recoverable reinit.
        let events = EventState::new();
        events.merge(DAEMON_READY);
        events.merge(PROTOCOL_RESET);
        assert_eq!(events.snapshot(), PROTOCOL_RESET);
        assert_eq!(decide(events.snapshot()), Decision::Dead);
    }

    #[test]
    fn flash_lost_is_live_and_clears_when_a_later_event_omits_it() {
        let events = EventState::new();
        events.merge(DAEMON_READY | FLASH_LOST);
        assert_eq!(decide(events.snapshot()), Decision::TryAgain);
        events.merge(DAEMON_READY);
        assert_eq!(decide(events.snapshot()), Decision::Proceed);
    }
}
