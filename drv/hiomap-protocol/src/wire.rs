// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire framing for the HIOMAP command set (spec.md §4.6).
//!
//! All multi-byte fields are little-endian and are carried as separate
//! `lsb`/`msb` bytes rather than a packed multi-byte integer type, the way
//! `drv-spi-msg::MsgHeader` splits its length field into `len_lsb`/`len_msb`
//! — the args blob in a HIOMAP message is too short and irregular per-command
//! to be worth a zerocopy struct per variant.

/// Negotiated protocol version. GET_INFO always requests and expects this.
pub const HIOMAP_V2: u8 = 2;

/// Command identifiers (spec.md §4.6).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum CommandId {
    Reset = 0x01,
    GetInfo = 0x02,
    GetFlashInfo = 0x03,
    CreateReadWindow = 0x04,
    CreateWriteWindow = 0x06,
    CloseWindow = 0x07,
    MarkDirty = 0x08,
    Flush = 0x09,
    Ack = 0x0A,
    Erase = 0x0B,
}

impl CommandId {
    fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => CommandId::Reset,
            0x02 => CommandId::GetInfo,
            0x03 => CommandId::GetFlashInfo,
            0x04 => CommandId::CreateReadWindow,
            0x06 => CommandId::CreateWriteWindow,
            0x07 => CommandId::CloseWindow,
            0x08 => CommandId::MarkDirty,
            0x09 => CommandId::Flush,
            0x0A => CommandId::Ack,
            0x0B => CommandId::Erase,
            _ => return None,
        })
    }
}

fn push_u16_le(buf: &mut Vec<u8>, v: u16) {
    buf.push((v & 0xff) as u8);
    buf.push((v >> 8) as u8);
}

fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from(bytes[0]) | (u16::from(bytes[1]) << 8)
}

/// A typed HIOMAP request, one variant per command in spec.md §4.6. Carries
/// its own on-wire argument encoding; callers never see raw byte offsets.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    Reset,
    GetInfo,
    GetFlashInfo,
    CreateReadWindow { flash_off: u16, req_len: u16 },
    CreateWriteWindow { flash_off: u16, req_len: u16 },
    CloseWindow { flags: u8 },
    MarkDirty { win_off: u16, len: u16 },
    Flush,
    Ack { mask: u8 },
    Erase { win_off: u16, len: u16 },
}

impl Request {
    pub fn command_id(&self) -> CommandId {
        match self {
            Request::Reset => CommandId::Reset,
            Request::GetInfo => CommandId::GetInfo,
            Request::GetFlashInfo => CommandId::GetFlashInfo,
            Request::CreateReadWindow { .. } => CommandId::CreateReadWindow,
            Request::CreateWriteWindow { .. } => CommandId::CreateWriteWindow,
            Request::CloseWindow { .. } => CommandId::CloseWindow,
            Request::MarkDirty { .. } => CommandId::MarkDirty,
            Request::Flush => CommandId::Flush,
            Request::Ack { .. } => CommandId::Ack,
            Request::Erase { .. } => CommandId::Erase,
        }
    }

    /// Encodes `[cmd, seq, args...]`, exactly as framed in spec.md §4.6.
    pub fn encode(&self, seq: u8) -> Vec<u8> {
        let mut buf = vec![self.command_id() as u8, seq];
        match *self {
            Request::Reset | Request::GetFlashInfo | Request::Flush => {}
            Request::GetInfo => buf.push(HIOMAP_V2),
            Request::CreateReadWindow { flash_off, req_len }
            | Request::CreateWriteWindow { flash_off, req_len } => {
                push_u16_le(&mut buf, flash_off);
                push_u16_le(&mut buf, req_len);
            }
            Request::CloseWindow { flags } => buf.push(flags),
            Request::MarkDirty { win_off, len }
            | Request::Erase { win_off, len } => {
                push_u16_le(&mut buf, win_off);
                push_u16_le(&mut buf, len);
            }
            Request::Ack { mask } => buf.push(mask),
        }
        buf
    }
}

/// A decoded HIOMAP response body, with the `cmd`/`seq` echo already
/// validated against the request that elicited it (spec.md invariant 3).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    Reset,
    GetInfo { version: u8, block_size_shift: u8, timeout_s: u16 },
    GetFlashInfo { total_size_blocks: u16, erase_granule_blocks: u16 },
    CreateWindow { lpc_off: u16, granted_len: u16, flash_off: u16 },
    CloseWindow,
    MarkDirty,
    Flush,
    Ack,
    Erase,
}

/// Failure modes of decoding a raw response frame against the request that
/// produced it. Any of these is a fatal protocol error (spec.md invariant 3,
/// §7 `ProtocolError`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// Completion code was non-zero.
    BadCompletion(u8),
    /// Frame was too short to contain even `[cmd, seq]`.
    Truncated,
    /// The command byte didn't match the request, or isn't recognised.
    CommandMismatch,
    /// The echoed sequence number didn't match the request's.
    SequenceMismatch { expected: u8, got: u8 },
    /// The argument bytes didn't match what this command's response shape
    /// requires.
    BadArgs,
}

/// Decodes a response frame `[cmd, seq, args...]` against the request that
/// was sent with sequence number `seq`, given the transport completion code
/// `cc`.
pub fn decode_response(
    request: &Request,
    seq: u8,
    cc: u8,
    frame: &[u8],
) -> Result<Response, DecodeError> {
    if cc != 0 {
        return Err(DecodeError::BadCompletion(cc));
    }
    if frame.len() < 2 {
        return Err(DecodeError::Truncated);
    }
    let got_cmd = CommandId::from_u8(frame[0])
        .ok_or(DecodeError::CommandMismatch)?;
    if got_cmd != request.command_id() {
        return Err(DecodeError::CommandMismatch);
    }
    let got_seq = frame[1];
    if got_seq != seq {
        return Err(DecodeError::SequenceMismatch { expected: seq, got: got_seq });
    }
    let args = &frame[2..];
    match request {
        Request::Reset => Ok(Response::Reset),
        Request::GetInfo => {
            if args.len() < 4 {
                return Err(DecodeError::BadArgs);
            }
            Ok(Response::GetInfo {
                version: args[0],
                block_size_shift: args[1],
                timeout_s: read_u16_le(&args[2..4]),
            })
        }
        Request::GetFlashInfo => {
            if args.len() < 4 {
                return Err(DecodeError::BadArgs);
            }
            Ok(Response::GetFlashInfo {
                total_size_blocks: read_u16_le(&args[0..2]),
                erase_granule_blocks: read_u16_le(&args[2..4]),
            })
        }
        Request::CreateReadWindow { .. } | Request::CreateWriteWindow { .. } => {
            if args.len() < 6 {
                return Err(DecodeError::BadArgs);
            }
            Ok(Response::CreateWindow {
                lpc_off: read_u16_le(&args[0..2]),
                granted_len: read_u16_le(&args[2..4]),
                flash_off: read_u16_le(&args[4..6]),
            })
        }
        Request::CloseWindow { .. } => Ok(Response::CloseWindow),
        Request::MarkDirty { .. } => Ok(Response::MarkDirty),
        Request::Flush => Ok(Response::Flush),
        Request::Ack { .. } => Ok(Response::Ack),
        Request::Erase { .. } => Ok(Response::Erase),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_ack_request() {
        let req = Request::Ack { mask: 0x03 };
        assert_eq!(req.encode(1), vec![0x0A, 1, 0x03]);
    }

    #[test]
    fn encodes_get_info_request() {
        assert_eq!(Request::GetInfo.encode(2), vec![0x02, 2, HIOMAP_V2]);
    }

    #[test]
    fn encodes_create_read_window_request() {
        let req = Request::CreateReadWindow { flash_off: 0, req_len: 1 };
        assert_eq!(req.encode(4), vec![0x04, 4, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn decodes_get_info_response() {
        let req = Request::GetInfo;
        let frame = vec![0x02, 2, HIOMAP_V2, 12, 8, 0];
        let resp = decode_response(&req, 2, 0, &frame).unwrap();
        assert_eq!(
            resp,
            Response::GetInfo { version: HIOMAP_V2, block_size_shift: 12, timeout_s: 8 }
        );
    }

    #[test]
    fn decodes_create_window_response_with_short_grant() {
        let req = Request::CreateReadWindow { flash_off: 0, req_len: 2 };
        let frame = vec![0x04, 4, 0xff, 0x0f, 0x01, 0x00, 0x00, 0x00];
        let resp = decode_response(&req, 4, 0, &frame).unwrap();
        assert_eq!(
            resp,
            Response::CreateWindow { lpc_off: 0x0fff, granted_len: 1, flash_off: 0 }
        );
    }

    #[test]
    fn rejects_sequence_mismatch() {
        let req = Request::Flush;
        let frame = vec![0x09, 7];
        assert_eq!(
            decode_response(&req, 6, 0, &frame),
            Err(DecodeError::SequenceMismatch { expected: 6, got: 7 })
        );
    }

    #[test]
    fn rejects_nonzero_completion_code() {
        let req = Request::Flush;
        let frame = vec![0x09, 6];
        assert_eq!(decode_response(&req, 6, 1, &frame), Err(DecodeError::BadCompletion(1)));
    }

    #[test]
    fn rejects_command_mismatch() {
        let req = Request::Flush;
        // Response echoes GET_INFO's command byte instead of FLUSH's.
        let frame = vec![0x02, 6];
        assert_eq!(decode_response(&req, 6, 0, &frame), Err(DecodeError::CommandMismatch));
    }
}
