// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The protocol engine (spec.md §4.6) and the event decision policy (§4.4)
//! that gates every façade entry.

use crate::error::{FlashError, InitError};
use crate::event::{decide, Decision, EventState, ACK_MASK};
use crate::session::{Session, SessionStatus};
use crate::trace::{ringbuf_trace, FlashErrorKind, Trace};
use crate::transport::Transport;
use crate::wire::{decode_response, Request, Response, HIOMAP_V2};

/// Runs one request/response exchange for a live (post-init) session. On any
/// transport or decode failure, moves the session to `NeedsReinit` — the
/// next façade call re-initialises it (spec.md §7 `ProtocolError`).
pub(crate) fn exchange(
    transport: &dyn Transport,
    session: &mut Session,
    request: Request,
) -> Result<Response, FlashError> {
    let seq = session.next_seq();
    let cmd = request.command_id();
    ringbuf_trace(Trace::Call { cmd, seq });
    let bytes = request.encode(seq);
    let raw = match transport.call(&bytes, session.timeout_s) {
        Ok(raw) => raw,
        Err(e) => {
            session.status = SessionStatus::NeedsReinit;
            ringbuf_trace(Trace::TransportFailed);
            return Err(e.into());
        }
    };
    ringbuf_trace(Trace::Response { cmd, cc: raw.cc });
    match decode_response(&request, seq, raw.cc, &raw.frame) {
        Ok(resp) => Ok(resp),
        Err(_) => {
            session.status = SessionStatus::NeedsReinit;
            ringbuf_trace(Trace::DecodeFailed);
            Err(FlashError::ProtocolError)
        }
    }
}

/// Same exchange, but for use while initialising/reinitialising: failures
/// surface as `InitError` rather than touching `session.status` — the
/// caller is already mid-recovery (spec.md §7: "internal errors from
/// ACK/GET_INFO/GET_FLASH_INFO during recovery propagate out as
/// `DeviceGone`").
fn exchange_init(
    transport: &dyn Transport,
    session: &mut Session,
    request: Request,
) -> Result<Response, InitError> {
    let seq = session.next_seq();
    let cmd = request.command_id();
    ringbuf_trace(Trace::Call { cmd, seq });
    let bytes = request.encode(seq);
    let raw = transport.call(&bytes, session.timeout_s)?;
    ringbuf_trace(Trace::Response { cmd, cc: raw.cc });
    decode_response(&request, seq, raw.cc, &raw.frame).map_err(|_| {
        ringbuf_trace(Trace::DecodeFailed);
        InitError::Protocol
    })
}

/// ACK(`ack_mask`) + GET_INFO + GET_FLASH_INFO, used both for first-time
/// initialisation (Uninitialised -> Ready, where the caller passes the
/// blanket `ACK_MASK` since nothing is latched yet to be more specific
/// about) and for recovery (NeedsReinit -> Ready, where the caller passes
/// only whatever reset-class bits are actually currently latched), per the
/// state machine in spec.md §4.7.
pub(crate) fn reinit(
    transport: &dyn Transport,
    session: &mut Session,
    ack_mask: u8,
) -> Result<(), InitError> {
    exchange_init(transport, session, Request::Ack { mask: ack_mask })?;

    let info = exchange_init(transport, session, Request::GetInfo)?;
    let Response::GetInfo { version, block_size_shift, timeout_s } = info else {
        return Err(InitError::Protocol);
    };
    if version != HIOMAP_V2 {
        return Err(InitError::Protocol);
    }
    // Store the negotiated timeout immediately, so the GET_FLASH_INFO
    // exchange below is already bounded by it (spec.md §5 "Timeouts")
    // rather than whatever was (or wasn't) negotiated before this reinit.
    session.timeout_s = timeout_s;

    let flash_info = exchange_init(transport, session, Request::GetFlashInfo)?;
    let Response::GetFlashInfo { total_size_blocks, erase_granule_blocks } = flash_info else {
        return Err(InitError::Protocol);
    };

    session.protocol_version = version;
    session.block_size_shift = block_size_shift;
    session.flash_size_blocks = u32::from(total_size_blocks);
    session.erase_granule_blocks = u32::from(erase_granule_blocks);
    session.status = SessionStatus::Ready;
    Ok(())
}

/// Consults the decision policy (spec.md §4.4) and brings the session up to
/// date before a façade operation proceeds. Called at façade entry, again
/// immediately before each `CREATE_*_WINDOW`, and the caller additionally
/// re-invokes it immediately after a write's `WindowIO` transfer (spec.md §9
/// design note on the event-vs-request race).
pub(crate) fn ensure_ready(
    transport: &dyn Transport,
    events: &EventState,
    session: &mut Session,
) -> Result<(), FlashError> {
    if session.status == SessionStatus::Dead {
        return Err(FlashError::DeviceGone);
    }

    match decide(events.snapshot()) {
        Decision::Dead => {
            session.status = SessionStatus::Dead;
            ringbuf_trace(Trace::FlashErrorOut(FlashErrorKind::DeviceGone));
            Err(FlashError::DeviceGone)
        }
        Decision::TryAgain => {
            ringbuf_trace(Trace::FlashErrorOut(FlashErrorKind::TryAgain));
            Err(FlashError::TryAgain)
        }
        Decision::NeedsReinit => {
            // ACK exactly the reset-class bits actually latched, not the
            // blanket mask (spec.md §8 scenario 6: only PROTOCOL_RESET is
            // ACKed when WINDOW_RESET isn't also set).
            let ack_mask = events.snapshot() & ACK_MASK;
            reinit(transport, session, ack_mask)?;
            events.clear(ack_mask);
            ringbuf_trace(Trace::EventAcked(ack_mask));
            session.window = None;
            Ok(())
        }
        Decision::NeedsWindowAck => {
            let ack_mask = events.snapshot() & ACK_MASK;
            exchange(transport, session, Request::Ack { mask: ack_mask })?;
            events.clear(ack_mask);
            ringbuf_trace(Trace::EventAcked(ack_mask));
            session.window = None;
            Ok(())
        }
        Decision::Proceed => match session.status {
            SessionStatus::Uninitialised | SessionStatus::NeedsReinit => {
                // Bootstrapping (or recovering from a protocol error rather
                // than a live event): nothing specific is known to be
                // latched, so clear the whole ACK mask for a clean start
                // (spec.md §8 scenario 1).
                reinit(transport, session, ACK_MASK)?;
                session.window = None;
                Ok(())
            }
            _ => Ok(()),
        },
    }
}
