// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A scenario-scripted `Transport` + `WindowIO` double for exercising
//! `drv-hiomap-protocol` without a real BMC.
//!
//! Modelled on the canned-response server in `drv-mock-gimlet-hf-server`,
//! generalised to the cursor-driven scenario list the upstream C test
//! harness (`libflash/test/test-ipmi-hiomap.c`) scripts its HIOMAP tests
//! with: a flat sequence of expected request/response pairs, with
//! unsolicited BMC state bytes ("SELs") interleaved wherever the scenario
//! says they arrive — either immediately after a response, or after an
//! explicit [`ScenarioTransport::advance`] standing in for the passage of
//! time.

use std::collections::VecDeque;
use std::sync::Mutex;

use drv_hiomap_protocol::{EventSink, IoError, RawResponse, TransportError, WindowIO};

/// One entry in a scripted scenario.
pub enum ScenarioEvent {
    /// Expect exactly this request; respond with `resp` and completion code
    /// `cc`.
    Cmd { req: Vec<u8>, resp: Vec<u8>, cc: u8 },
    /// An unsolicited BMC state byte, delivered to the registered event
    /// sink as soon as the cursor reaches it.
    Sel(u8),
    /// A marker the test advances past explicitly via
    /// [`ScenarioTransport::advance`], standing in for out-of-band elapsed
    /// time between two façade calls.
    Delay,
}

impl ScenarioEvent {
    pub fn cmd(req: Vec<u8>, resp: Vec<u8>) -> Self {
        ScenarioEvent::Cmd { req, resp, cc: 0 }
    }
}

/// Scripted `Transport`: plays back a fixed list of [`ScenarioEvent`]s and
/// panics (the same as the C harness's `assert(false)`) on any request that
/// doesn't match what the scenario expects next, or if the scenario isn't
/// fully consumed.
pub struct ScenarioTransport {
    cursor: Mutex<VecDeque<ScenarioEvent>>,
    sink: Mutex<Option<EventSink>>,
}

impl ScenarioTransport {
    pub fn new(events: Vec<ScenarioEvent>) -> Self {
        Self { cursor: Mutex::new(events.into()), sink: Mutex::new(None) }
    }

    /// True once every scripted event has been consumed.
    pub fn finished(&self) -> bool {
        self.cursor.lock().unwrap().is_empty()
    }

    /// Advances past a `Delay` marker and delivers whatever `Sel`s
    /// immediately follow it, simulating elapsed wall-clock time between
    /// two façade calls.
    pub fn advance(&self) {
        let mut cursor = self.cursor.lock().unwrap();
        match cursor.pop_front() {
            Some(ScenarioEvent::Delay) => {}
            other => panic!("scenario: expected a delay marker, found {:?}", describe(&other)),
        }
        drain_sels(&mut cursor, &self.sink);
    }

    fn deliver_sel(&self, bits: u8) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink(bits);
        }
    }
}

fn drain_sels(cursor: &mut VecDeque<ScenarioEvent>, sink: &Mutex<Option<EventSink>>) {
    while matches!(cursor.front(), Some(ScenarioEvent::Sel(_))) {
        let Some(ScenarioEvent::Sel(bits)) = cursor.pop_front() else { unreachable!() };
        if let Some(sink) = sink.lock().unwrap().as_ref() {
            sink(bits);
        }
    }
}

fn describe(event: &Option<ScenarioEvent>) -> &'static str {
    match event {
        Some(ScenarioEvent::Cmd { .. }) => "a command",
        Some(ScenarioEvent::Sel(_)) => "a SEL",
        Some(ScenarioEvent::Delay) => "a delay",
        None => "end of scenario",
    }
}

impl drv_hiomap_protocol::Transport for ScenarioTransport {
    fn call(&self, request: &[u8], _timeout_s: u16) -> Result<RawResponse, TransportError> {
        let mut cursor = self.cursor.lock().unwrap();
        let (resp, cc) = match cursor.pop_front() {
            Some(ScenarioEvent::Cmd { req, resp, cc }) => {
                assert_eq!(
                    request, req,
                    "scenario: unexpected request, got {:?} expected {:?}",
                    request, req
                );
                (resp, cc)
            }
            other => panic!("scenario: expected a command, found {:?}", describe(&other)),
        };
        drain_sels(&mut cursor, &self.sink);
        drop(cursor);
        Ok(RawResponse { cc, frame: resp })
    }

    fn register_event_sink(&self, sink: EventSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }
}

/// Lets a test deliver a SEL byte directly, bypassing the scenario list —
/// useful for ad hoc tests that don't need the full cursor machinery.
impl ScenarioTransport {
    pub fn inject_sel(&self, bits: u8) {
        self.deliver_sel(bits);
    }
}

/// `WindowIO` double that fills reads with the `0xaa` pattern the upstream
/// mock `lpc_read` always produces, and accepts writes unconditionally
/// (`lpc_write` upstream is similarly unconditional).
#[derive(Default)]
pub struct PatternWindowIO;

impl WindowIO for PatternWindowIO {
    fn read_bytes(&self, _lpc_byte_offset: u64, dst: &mut [u8]) -> Result<(), IoError> {
        dst.fill(0xaa);
        Ok(())
    }

    fn write_bytes(&self, _lpc_byte_offset: u64, _src: &[u8]) -> Result<(), IoError> {
        Ok(())
    }
}

/// True if every byte of `buf` is the `0xaa` fill pattern `PatternWindowIO`
/// produces, mirroring the upstream `lpc_read_success` check.
pub fn is_pattern_filled(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0xaa)
}

/// `WindowIO` double backed by an actual byte buffer, standing in for LPC
/// firmware space: writes land where they're addressed and later reads see
/// them, so a test can assert a genuine write-then-read round trip rather
/// than only the command traffic that produced it.
pub struct MemoryWindowIo {
    backing: Mutex<Vec<u8>>,
}

impl MemoryWindowIo {
    pub fn new(size: usize) -> Self {
        Self { backing: Mutex::new(vec![0u8; size]) }
    }
}

impl WindowIO for MemoryWindowIo {
    fn read_bytes(&self, lpc_byte_offset: u64, dst: &mut [u8]) -> Result<(), IoError> {
        let backing = self.backing.lock().unwrap();
        let start = lpc_byte_offset as usize;
        dst.copy_from_slice(&backing[start..start + dst.len()]);
        Ok(())
    }

    fn write_bytes(&self, lpc_byte_offset: u64, src: &[u8]) -> Result<(), IoError> {
        let mut backing = self.backing.lock().unwrap();
        let start = lpc_byte_offset as usize;
        backing[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }
}

/// `WindowIO` double that fails its first `failures_remaining` transfers
/// (read and write alike) with `IoError`, then falls through to a backing
/// `MemoryWindowIo` — for exercising the façade's retry-after-renegotiate
/// path (spec.md §7) without a real flaky LPC bus.
pub struct FlakyWindowIO {
    failures_remaining: Mutex<u32>,
    inner: MemoryWindowIo,
}

impl FlakyWindowIO {
    pub fn new(size: usize, failures: u32) -> Self {
        Self { failures_remaining: Mutex::new(failures), inner: MemoryWindowIo::new(size) }
    }

    fn maybe_fail(&self) -> Result<(), IoError> {
        let mut remaining = self.failures_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(IoError("simulated LPC window transfer failure".into()));
        }
        Ok(())
    }
}

impl WindowIO for FlakyWindowIO {
    fn read_bytes(&self, lpc_byte_offset: u64, dst: &mut [u8]) -> Result<(), IoError> {
        self.maybe_fail()?;
        self.inner.read_bytes(lpc_byte_offset, dst)
    }

    fn write_bytes(&self, lpc_byte_offset: u64, src: &[u8]) -> Result<(), IoError> {
        self.maybe_fail()?;
        self.inner.write_bytes(lpc_byte_offset, src)
    }
}
