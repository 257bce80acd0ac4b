// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The block-level device façade (spec.md §4): `HiomapDevice` hides
//! windowing, sequencing, and BMC events behind `read`/`write`/`erase`/
//! `get_info`.

use std::sync::{Arc, Mutex};

use crate::config::SessionConfig;
use crate::error::{FlashError, IoError};
use crate::event::EventState;
use crate::protocol::{ensure_ready, exchange};
use crate::session::Session;
use crate::trace::{ringbuf_trace, FlashErrorKind, Trace};
use crate::transport::{Transport, WindowIO};
use crate::wire::{Request, Response};
use crate::window::{needs_negotiation, Direction, Window};

/// A host's handle onto one BMC-mediated flash device (spec.md §3
/// "Session"). Holds a single session-wide mutex across each call: only one
/// HIOMAP command is ever in flight at a time (spec.md §5).
pub struct HiomapDevice<T: Transport, W: WindowIO> {
    transport: Arc<T>,
    window_io: W,
    events: Arc<EventState>,
    session: Mutex<Session>,
    config: SessionConfig,
}

impl<T: Transport + 'static, W: WindowIO> HiomapDevice<T, W> {
    /// Builds a device over a `Transport`/`WindowIO` pair with the default
    /// retry policy. See [`Self::with_config`] to customise it.
    pub fn new(transport: Arc<T>, window_io: W) -> Self {
        Self::with_config(transport, window_io, SessionConfig::default())
    }

    /// Builds a device over a `Transport`/`WindowIO` pair, registering the
    /// event sink. The sink holds only a weak reference to the event state,
    /// so a `Transport` implementation that outlives its `HiomapDevice`
    /// (e.g. a shared IPMI channel) doesn't keep it alive.
    pub fn with_config(transport: Arc<T>, window_io: W, config: SessionConfig) -> Self {
        let events = Arc::new(EventState::new());
        let weak = Arc::downgrade(&events);
        transport.register_event_sink(Box::new(move |bits| {
            if let Some(events) = weak.upgrade() {
                ringbuf_trace(Trace::EventMerged(bits));
                events.merge(bits);
            }
        }));
        Self { transport, window_io, events, session: Mutex::new(Session::new()), config }
    }

    /// Runs one `WindowIO` transfer against the currently negotiated
    /// window, retrying up to `config.max_window_retries` times by
    /// invalidating and renegotiating the window before each retry (spec.md
    /// §7: `IoError` "is retried once after re-creating the window").
    /// `on_retry` runs before each renegotiation — `write` uses it to flush
    /// any dirty bytes accumulated against the window that's about to be
    /// torn down; `read` has nothing to flush and passes a no-op.
    fn transfer_with_retry<R>(
        &self,
        session: &mut Session,
        direction: Direction,
        block_off: u32,
        len_blocks: u32,
        mut on_retry: impl FnMut(&mut Session) -> Result<(), FlashError>,
        mut attempt: impl FnMut(&Window) -> Result<R, IoError>,
    ) -> Result<R, FlashError> {
        let mut retries_left = self.config.max_window_retries;
        loop {
            let window = session.window.as_ref().expect("window negotiated by caller");
            match attempt(window) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if retries_left == 0 {
                        ringbuf_trace(Trace::FlashErrorOut(FlashErrorKind::IoError));
                        return Err(err.into());
                    }
                    retries_left -= 1;
                    let attempt_no = self.config.max_window_retries - retries_left;
                    ringbuf_trace(Trace::IoRetry(attempt_no));
                    on_retry(session)?;
                    (self.config.poll)(attempt_no);
                    session.window = None;
                    negotiate_window(
                        self.transport.as_ref(),
                        &self.events,
                        session,
                        direction,
                        block_off,
                        len_blocks,
                    )?;
                }
            }
        }
    }

    /// Current flash geometry: `(total size in bytes, erase granule in
    /// bytes)`. Initialises the session if this is the first call.
    pub fn get_info(&self) -> Result<(u64, u64), FlashError> {
        let mut session = self.session.lock().unwrap();
        ensure_ready(self.transport.as_ref(), &self.events, &mut session)?;
        Ok((session.flash_size_bytes(), session.erase_granule_bytes()))
    }

    /// Reads `dst.len()` bytes starting at byte offset `off`. Byte-level
    /// ranges are serviced by fetching whatever whole blocks cover them and
    /// slicing (spec.md §11 open question, resolved in SPEC_FULL.md).
    pub fn read(&self, off: u64, dst: &mut [u8]) -> Result<(), FlashError> {
        let mut session = self.session.lock().unwrap();
        ensure_ready(self.transport.as_ref(), &self.events, &mut session)?;

        let len = dst.len() as u64;
        let end = off.checked_add(len).ok_or(FlashError::ParameterError)?;
        if end > session.flash_size_bytes() {
            return Err(FlashError::ParameterError);
        }
        if len == 0 {
            return Ok(());
        }

        let block_size = u64::from(session.block_size());
        let mut done = 0usize;
        while (done as u64) < len {
            let cur_off = off + done as u64;
            let block_off = (cur_off / block_size) as u32;
            let within_block = (cur_off % block_size) as usize;
            let remaining = len as usize - done;

            let blocks_needed = blocks_spanning(within_block, remaining, block_size);
            negotiate_window(
                self.transport.as_ref(),
                &self.events,
                &mut session,
                Direction::Read,
                block_off,
                blocks_needed,
            )?;

            let copy_len = self.transfer_with_retry(
                &mut session,
                Direction::Read,
                block_off,
                blocks_needed,
                |_session| Ok(()),
                |window| {
                    let copy_len =
                        bytes_covered(window, block_off, within_block, block_size, remaining);
                    let lpc_byte_off =
                        u64::from(window.lpc_block_for(block_off)) * block_size + within_block as u64;
                    self.window_io
                        .read_bytes(lpc_byte_off, &mut dst[done..done + copy_len])
                        .map(|()| copy_len)
                },
            )?;

            // An event (e.g. FLASH_LOST) can land between the window grant
            // and the copy completing; catch it before reporting success
            // rather than only on the next façade entry.
            ensure_ready(self.transport.as_ref(), &self.events, &mut session)?;

            done += copy_len;
        }
        Ok(())
    }

    /// Writes `src` starting at byte offset `off`: negotiates a write
    /// window per slice, copies through `WindowIO`, and `MARK_DIRTY`/
    /// `FLUSH`es the accumulated dirty range whenever the window changes or
    /// the write completes (spec.md §4.5).
    pub fn write(&self, off: u64, src: &[u8]) -> Result<(), FlashError> {
        let mut session = self.session.lock().unwrap();
        ensure_ready(self.transport.as_ref(), &self.events, &mut session)?;

        let len = src.len() as u64;
        let end = off.checked_add(len).ok_or(FlashError::ParameterError)?;
        if end > session.flash_size_bytes() {
            return Err(FlashError::ParameterError);
        }
        if len == 0 {
            return Ok(());
        }

        let block_size = u64::from(session.block_size());
        let mut done = 0usize;
        let mut dirty: Option<(u32, u32)> = None;

        while (done as u64) < len {
            let cur_off = off + done as u64;
            let block_off = (cur_off / block_size) as u32;
            let within_block = (cur_off % block_size) as usize;
            let remaining = len as usize - done;
            let blocks_needed = blocks_spanning(within_block, remaining, block_size);

            if needs_negotiation(&session.window, Direction::Write, block_off, blocks_needed) {
                if let Some((win_off, win_len)) = dirty.take() {
                    flush_dirty(self.transport.as_ref(), &mut session, win_off, win_len)?;
                }
                negotiate_window(
                    self.transport.as_ref(),
                    &self.events,
                    &mut session,
                    Direction::Write,
                    block_off,
                    blocks_needed,
                )?;
            }

            let (copy_len, win_off_rel) = self.transfer_with_retry(
                &mut session,
                Direction::Write,
                block_off,
                blocks_needed,
                |session| {
                    // A retry tears down the window the dirty range was
                    // accumulated against; flush it before asking for a
                    // new one so those bytes aren't orphaned (spec.md
                    // §4.5).
                    if let Some((win_off, win_len)) = dirty.take() {
                        flush_dirty(self.transport.as_ref(), session, win_off, win_len)?;
                    }
                    Ok(())
                },
                |window| {
                    let copy_len =
                        bytes_covered(window, block_off, within_block, block_size, remaining);
                    let lpc_byte_off =
                        u64::from(window.lpc_block_for(block_off)) * block_size + within_block as u64;
                    let win_off_rel = block_off - window.flash_offset_blocks;
                    self.window_io
                        .write_bytes(lpc_byte_off, &src[done..done + copy_len])
                        .map(|()| (copy_len, win_off_rel))
                },
            )?;

            // Design note (c): re-evaluate the event bitmap immediately
            // after the transfer. If a reset landed mid-copy, the bytes we
            // just wrote are not durable until MARK_DIRTY/FLUSH succeed
            // against the same window, and that window may now be gone.
            ensure_ready(self.transport.as_ref(), &self.events, &mut session)?;
            if session.window.is_none() {
                return Err(FlashError::ProtocolError);
            }

            let slice_blocks = blocks_spanning(within_block, copy_len, block_size);
            dirty = Some(match dirty {
                Some((start, blocks)) => (start, blocks + slice_blocks),
                None => (win_off_rel, slice_blocks),
            });
            done += copy_len;
        }

        if let Some((win_off, win_len)) = dirty {
            flush_dirty(self.transport.as_ref(), &mut session, win_off, win_len)?;
        }
        Ok(())
    }

    /// Erases `[off, off+len)`, which must be aligned to the erase granule
    /// (spec.md §4.7 "Erase"). Misaligned or out-of-range parameters are
    /// rejected before any protocol traffic is generated.
    pub fn erase(&self, off: u64, len: u64) -> Result<(), FlashError> {
        let mut session = self.session.lock().unwrap();
        ensure_ready(self.transport.as_ref(), &self.events, &mut session)?;

        let granule = session.erase_granule_bytes();
        if granule == 0 || off % granule != 0 || len % granule != 0 || len == 0 {
            return Err(FlashError::ParameterError);
        }
        let end = off.checked_add(len).ok_or(FlashError::ParameterError)?;
        if end > session.flash_size_bytes() {
            return Err(FlashError::ParameterError);
        }

        let block_size = u64::from(session.block_size());
        let mut done = 0u64;
        while done < len {
            let cur_off = off + done;
            let block_off = (cur_off / block_size) as u32;
            let remaining_blocks = (((len - done) + block_size - 1) / block_size) as u32;

            negotiate_window(
                self.transport.as_ref(),
                &self.events,
                &mut session,
                Direction::Write,
                block_off,
                remaining_blocks,
            )?;

            let window = session.window.as_ref().expect("just negotiated");
            let covered_blocks =
                (window.flash_offset_blocks + window.length_blocks - block_off).min(remaining_blocks);
            let win_off_rel = block_off - window.flash_offset_blocks;

            exchange(
                self.transport.as_ref(),
                &mut session,
                Request::Erase { win_off: win_off_rel as u16, len: covered_blocks as u16 },
            )?;
            done += u64::from(covered_blocks) * block_size;
        }
        exchange(self.transport.as_ref(), &mut session, Request::Flush)?;
        Ok(())
    }
}

impl<T: Transport, W: WindowIO> Drop for HiomapDevice<T, W> {
    /// Best-effort `CLOSE_WINDOW` on teardown (spec.md §11 open question):
    /// a session about to be dropped has nothing to gain from a careful
    /// recovery dance, so failures here are swallowed.
    fn drop(&mut self) {
        if let Ok(mut session) = self.session.lock() {
            if session.window.is_some() {
                let _ = exchange(
                    self.transport.as_ref(),
                    &mut session,
                    Request::CloseWindow { flags: 0 },
                );
            }
        }
    }
}

/// Number of blocks needed to cover `len` bytes starting `within_block`
/// bytes into the first one.
fn blocks_spanning(within_block: usize, len: usize, block_size: u64) -> u32 {
    (((within_block + len) as u64 + block_size - 1) / block_size) as u32
}

/// How many of the `remaining` requested bytes the current window actually
/// covers, starting at `block_off`/`within_block` (the BMC may have granted
/// a shorter window than was requested).
fn bytes_covered(
    window: &Window,
    block_off: u32,
    within_block: usize,
    block_size: u64,
    remaining: usize,
) -> usize {
    let window_end = window.flash_offset_blocks + window.length_blocks;
    let covered_blocks = window_end - block_off;
    let covered_bytes = (u64::from(covered_blocks) * block_size) as usize - within_block;
    covered_bytes.min(remaining)
}

/// Negotiates a window covering `[off_blocks, off_blocks+len_blocks)` in
/// `direction` if the current one (if any) doesn't already cover it
/// (spec.md §4.5).
fn negotiate_window(
    transport: &dyn Transport,
    events: &EventState,
    session: &mut Session,
    direction: Direction,
    off_blocks: u32,
    len_blocks: u32,
) -> Result<(), FlashError> {
    if !needs_negotiation(&session.window, direction, off_blocks, len_blocks) {
        ringbuf_trace(Trace::WindowHit);
        return Ok(());
    }
    ringbuf_trace(Trace::WindowMiss);
    // Design note (b): re-check the event bitmap right before asking the
    // BMC for a new window, not just once at façade entry.
    ensure_ready(transport, events, session)?;

    let request = match direction {
        Direction::Read => {
            Request::CreateReadWindow { flash_off: off_blocks as u16, req_len: len_blocks as u16 }
        }
        Direction::Write => {
            Request::CreateWriteWindow { flash_off: off_blocks as u16, req_len: len_blocks as u16 }
        }
    };
    match exchange(transport, session, request)? {
        Response::CreateWindow { lpc_off, granted_len, flash_off } => {
            session.window = Some(Window::new(
                direction,
                u32::from(flash_off),
                u32::from(granted_len),
                u32::from(lpc_off),
            ));
            Ok(())
        }
        _ => {
            session.status = crate::session::SessionStatus::NeedsReinit;
            Err(FlashError::ProtocolError)
        }
    }
}

fn flush_dirty(
    transport: &dyn Transport,
    session: &mut Session,
    win_off_blocks: u32,
    len_blocks: u32,
) -> Result<(), FlashError> {
    exchange(
        transport,
        session,
        Request::MarkDirty { win_off: win_off_blocks as u16, len: len_blocks as u16 },
    )?;
    exchange(transport, session, Request::Flush)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_spanning_rounds_up_partial_tail_block() {
        assert_eq!(blocks_spanning(0, 1, 4096), 1);
        assert_eq!(blocks_spanning(4095, 2, 4096), 2);
        assert_eq!(blocks_spanning(0, 4096, 4096), 1);
        assert_eq!(blocks_spanning(0, 4097, 4096), 2);
    }

    #[test]
    fn bytes_covered_caps_at_window_boundary() {
        let window = Window::new(Direction::Read, 0, 1, 0x0fff);
        assert_eq!(bytes_covered(&window, 0, 0, 4096, 8192), 4096);
        assert_eq!(bytes_covered(&window, 0, 100, 4096, 8192), 3996);
    }
}
