// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The two capabilities the engine is built on top of (spec.md §4.1, §4.2).
//! Both are narrow, synchronous interfaces; the concrete IPMI transport and
//! LPC window implementations are out of scope and live entirely behind
//! these traits, the same way `drv-gimlet-hf-api` hands a `TaskId` to
//! `sys_send` rather than knowing anything about the IPC transport beneath
//! it.

use crate::error::{IoError, TransportError};

/// One raw HIOMAP exchange: send `request` (already framed as
/// `[cmd, seq, args...]`), block until a response or a transport failure.
pub struct RawResponse {
    /// Transport completion code. Non-zero maps to a protocol error at the
    /// decode layer (spec.md §4.6).
    pub cc: u8,
    /// Full echoed response frame, `[cmd, seq, args...]`.
    pub frame: Vec<u8>,
}

/// Sent a single byte at a time to whatever merges it into the latched BMC
/// state bitmap (spec.md §4.4). Registered once; invoked from whatever
/// foreign context the transport's unsolicited-event delivery uses.
pub type EventSink = Box<dyn Fn(u8) + Send + Sync>;

/// Host IPMI transport capability (spec.md §4.1). Implementations must
/// serialize their own internal access if shared, but `call` itself can be
/// invoked from only one thread at a time by construction: the session
/// holds a lock across the whole façade operation (spec.md §5).
pub trait Transport: Send + Sync {
    /// Sends one HIOMAP command over IPMI netfn 0x3A cmd 0x5A and blocks for
    /// the response. `timeout_s` is the daemon-advertised timeout from the
    /// session's last successful GET_INFO (spec.md §5 "Timeouts"); it is
    /// `0` for any call issued before the first GET_INFO completes, in
    /// which case an implementation should fall back to its own default.
    fn call(&self, request: &[u8], timeout_s: u16) -> Result<RawResponse, TransportError>;

    /// Registers the single sink that unsolicited BMC state bytes are
    /// delivered to. May be invoked concurrently with `call`, potentially
    /// from a different thread (e.g. an IPMI SEL-polling thread).
    fn register_event_sink(&self, sink: EventSink);
}

/// LPC firmware-space memory window capability (spec.md §4.2).
pub trait WindowIO: Send + Sync {
    /// Reads `dst.len()` bytes starting at LPC block-relative byte offset
    /// `lpc_byte_offset`.
    fn read_bytes(&self, lpc_byte_offset: u64, dst: &mut [u8]) -> Result<(), IoError>;

    /// Writes `src` starting at LPC block-relative byte offset
    /// `lpc_byte_offset`.
    fn write_bytes(&self, lpc_byte_offset: u64, src: &[u8]) -> Result<(), IoError>;
}
