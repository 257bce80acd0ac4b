// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Diagnostic tracing, in the teacher's idiom: a fixed-size ring buffer fed
//! through `ringbuf!`/`ringbuf_entry!` (see e.g. `drv-cosmo-hf`,
//! `task-power`), rather than a `log`/`tracing` facade the teacher's
//! dependency graph never reaches for.
//!
//! The ring buffer is a single crate-wide static, same as a Hubris task's
//! single-ringbuf-per-module convention; it is a best-effort debugging aid,
//! not a synchronization primitive, and carries the same caveat the teacher
//! accepts: concurrent entries from the façade thread and the event-sink
//! context are each individually atomic, but there is no ordering guarantee
//! between them beyond what `Ringbuf`'s internal `StaticCell` provides.

use ringbuf::{ringbuf, ringbuf_entry};

use crate::wire::CommandId;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Trace {
    None,
    Call { cmd: CommandId, seq: u8 },
    Response { cmd: CommandId, cc: u8 },
    TransportFailed,
    DecodeFailed,
    EventMerged(u8),
    EventAcked(u8),
    WindowMiss,
    WindowHit,
    FlashErrorOut(FlashErrorKind),
    /// A `WindowIO` transfer failed and is being retried against a freshly
    /// renegotiated window; the payload is the attempt number, starting
    /// at 1.
    IoRetry(u8),
}

/// `crate::error::FlashError` minus the payload, kept `Copy` so it can live
/// in a ring buffer entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum FlashErrorKind {
    ParameterError,
    TryAgain,
    DeviceGone,
    ProtocolError,
    IoError,
}

impl From<&crate::error::FlashError> for FlashErrorKind {
    fn from(e: &crate::error::FlashError) -> Self {
        use crate::error::FlashError::*;
        match e {
            ParameterError => FlashErrorKind::ParameterError,
            TryAgain => FlashErrorKind::TryAgain,
            DeviceGone => FlashErrorKind::DeviceGone,
            ProtocolError => FlashErrorKind::ProtocolError,
            IoError => FlashErrorKind::IoError,
        }
    }
}

ringbuf!(Trace, 64, Trace::None);

pub(crate) fn ringbuf_trace(entry: Trace) {
    ringbuf_entry!(entry);
}
