// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error taxonomy surfaced to the block-level façade.
//!
//! Follows the split the teacher's driver APIs use (e.g.
//! `drv-gimlet-hf-api::{HfError, InternalHfError}`): a small public error
//! enum for callers, and a richer internal enum used while driving the
//! protocol engine that collapses down to the public one at the façade
//! boundary.

use std::fmt;

/// Errors a `Transport` implementation can report for a single `call`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// The underlying channel (IPMI or otherwise) could not deliver the
    /// message at all.
    NotDelivered,
    /// No response arrived before the session's negotiated timeout.
    TimedOut,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NotDelivered => {
                write!(f, "transport failed to deliver request")
            }
            TransportError::TimedOut => {
                write!(f, "transport timed out awaiting response")
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors a `WindowIO` implementation can report for an LPC access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IoError(pub String);

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LPC window access failed: {}", self.0)
    }
}

impl std::error::Error for IoError {}

/// Errors surfaced by the block-level façade (`read`/`write`/`erase`/
/// `get_info`). Matches spec.md §7 exactly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlashError {
    /// Bad alignment or an out-of-range offset/length. No protocol traffic
    /// is generated and no session state changes.
    ParameterError,
    /// `FLASH_LOST` is latched in the BMC state bitmap; the caller may retry
    /// once the BMC clears it.
    TryAgain,
    /// `PROTOCOL_RESET` was observed without a subsequent `DAEMON_READY`;
    /// the session is dead and a new one must be constructed.
    DeviceGone,
    /// Bad sequence echo, bad completion code, or an otherwise malformed
    /// exchange. The session has moved to `NeedsReinit`; the next call
    /// re-initialises it.
    ProtocolError,
    /// The `WindowIO` capability failed. Retried once after re-creating the
    /// window; this is the error surfaced if the retry also fails.
    IoError,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlashError::ParameterError => "parameter error",
            FlashError::TryAgain => "flash temporarily unavailable, retry",
            FlashError::DeviceGone => "flash device is gone",
            FlashError::ProtocolError => "HIOMAP protocol error",
            FlashError::IoError => "LPC window I/O error",
        };
        f.write_str(s)
    }
}

impl std::error::Error for FlashError {}

impl From<TransportError> for FlashError {
    fn from(_: TransportError) -> Self {
        FlashError::ProtocolError
    }
}

impl From<IoError> for FlashError {
    fn from(_: IoError) -> Self {
        FlashError::IoError
    }
}

/// Internal errors from the recovery sequence (ACK, GET_INFO,
/// GET_FLASH_INFO) that are run while re-initialising a session. Per
/// spec.md §7, all of these propagate out of the façade as `DeviceGone`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum InitError {
    Transport(TransportError),
    Protocol,
}

impl From<InitError> for FlashError {
    fn from(_: InitError) -> Self {
        FlashError::DeviceGone
    }
}

impl From<TransportError> for InitError {
    fn from(e: TransportError) -> Self {
        InitError::Transport(e)
    }
}
