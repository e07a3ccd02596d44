//! MCTP serial binding frame codec (DSP0253)
//!
//! Wire layout of one frame:
//!
//! ```text
//! 0x7E | proto ver | byte count | hdr ver | dest | src | flags | msg type | message... | FCS hi | FCS lo | 0x7E
//!                               |<------------------- body (byte count) ---------------->|
//! ```
//!
//! Byte stuffing applies to the body only. The FCS covers the protocol
//! version, byte count and unstuffed body and is never stuffed itself, so a
//! flag byte may legitimately appear inside the FCS field.

use serde::Serialize;
use thiserror::Error;

use crate::checksum::fcs16_parts;

/// Frame delimiter
pub const FLAG: u8 = 0x7E;
/// Stuffing escape
pub const ESCAPE: u8 = 0x7D;
/// Serial binding protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;
/// MCTP transport header version
pub const HEADER_VERSION: u8 = 0x01;
/// MCTP message type carrying PLDM
pub const MSG_TYPE_PLDM: u8 = 0x01;

/// Start-of-message flag bit
pub const SOM: u8 = 0x80;
/// End-of-message flag bit
pub const EOM: u8 = 0x40;
/// Tag-owner bit
pub const TAG_OWNER: u8 = 0x08;
/// Single-packet request flags (SOM | EOM | TO, tag 0)
pub const DEFAULT_FLAGS: u8 = SOM | EOM | TAG_OWNER;

/// Default destination endpoint id
pub const DEFAULT_DEST_EID: u8 = 0;
/// Default source endpoint id of the host
pub const DEFAULT_SRC_EID: u8 = 16;

/// Bytes of MCTP transport header plus message type in front of the message
const BODY_HEADER_LEN: usize = 5;
/// PLDM header length (instance, type, command)
const PLDM_HEADER_LEN: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame body of {0} bytes exceeds the 255 byte limit")]
    TooLong(usize),
}

/// PLDM header fields carried by a frame whose message type is PLDM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PldmFields {
    pub instance_id: u8,
    pub request: bool,
    pub datagram: bool,
    pub pldm_type: u8,
    pub command: u8,
    /// Completion code, present on responses that carry one
    pub completion_code: Option<u8>,
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub protocol_version: u8,
    pub byte_count: u8,
    pub header_version: u8,
    pub dest: u8,
    pub src: u8,
    pub flags: u8,
    pub msg_type: u8,
    /// Everything after the message type byte (PLDM header included)
    pub message: Vec<u8>,
    /// Command-layer data after the PLDM header; starts with the completion
    /// code on responses. Reassembly replaces this with the joined payload.
    pub payload: Vec<u8>,
    pub pldm: Option<PldmFields>,
    pub fcs_received: u16,
    pub fcs_computed: u16,
}

impl ParsedFrame {
    pub fn fcs_ok(&self) -> bool {
        self.fcs_received == self.fcs_computed
    }

    pub fn som(&self) -> bool {
        self.flags & SOM != 0
    }

    pub fn eom(&self) -> bool {
        self.flags & EOM != 0
    }

    pub fn is_pldm(&self) -> bool {
        self.msg_type == MSG_TYPE_PLDM
    }
}

fn stuff_into(out: &mut Vec<u8>, data: &[u8]) {
    for &b in data {
        if b == FLAG || b == ESCAPE {
            out.push(ESCAPE);
            out.push(b ^ 0x20);
        } else {
            out.push(b);
        }
    }
}

/// Build a frame around `message` (the PLDM message including its header).
pub fn build(message: &[u8], dest: u8, src: u8, msg_type: u8, flags: u8) -> Result<Vec<u8>, FrameError> {
    let body_len = BODY_HEADER_LEN + message.len();
    if body_len > u8::MAX as usize {
        return Err(FrameError::TooLong(body_len));
    }

    let mut body = Vec::with_capacity(body_len);
    body.extend_from_slice(&[HEADER_VERSION, dest, src, flags, msg_type]);
    body.extend_from_slice(message);

    let fcs = fcs16_parts(&[&[PROTOCOL_VERSION, body_len as u8][..], &body[..]]);

    let mut frame = Vec::with_capacity(body_len * 2 + 6);
    frame.push(FLAG);
    frame.push(PROTOCOL_VERSION);
    frame.push(body_len as u8);
    stuff_into(&mut frame, &body);
    frame.extend_from_slice(&fcs.to_be_bytes());
    frame.push(FLAG);
    Ok(frame)
}

/// Build a single-packet PLDM frame with the default addressing.
pub fn build_pldm(message: &[u8]) -> Result<Vec<u8>, FrameError> {
    build(message, DEFAULT_DEST_EID, DEFAULT_SRC_EID, MSG_TYPE_PLDM, DEFAULT_FLAGS)
}

/// Parse the frame spanning the first and last flag bytes of `raw`.
///
/// The FCS is checked but not enforced; see [`ParsedFrame::fcs_ok`].
pub fn parse(raw: &[u8]) -> Option<ParsedFrame> {
    let start = raw.iter().position(|&b| b == FLAG)?;
    let end = raw.iter().rposition(|&b| b == FLAG)?;
    if end <= start {
        return None;
    }
    let inner = &raw[start + 1..end];
    if inner.len() < 6 {
        return None;
    }

    let protocol_version = inner[0];
    let byte_count = inner[1];

    let mut body = Vec::with_capacity(byte_count as usize);
    let mut i = 2;
    while body.len() < byte_count as usize && i < inner.len() {
        if inner[i] == ESCAPE {
            // A trailing lone escape carries no byte
            if i + 1 >= inner.len() {
                break;
            }
            body.push(inner[i + 1] ^ 0x20);
            i += 2;
        } else {
            body.push(inner[i]);
            i += 1;
        }
    }
    if body.len() < byte_count as usize || i + 2 > inner.len() || body.len() < BODY_HEADER_LEN {
        return None;
    }

    let fcs_received = u16::from_be_bytes([inner[i], inner[i + 1]]);
    let fcs_computed = fcs16_parts(&[&inner[..2], &body[..]]);

    let msg_type = body[4];
    let message = body[BODY_HEADER_LEN..].to_vec();

    let (pldm, payload) = if msg_type == MSG_TYPE_PLDM && message.len() >= PLDM_HEADER_LEN {
        let request = message[0] & 0x80 != 0;
        let fields = PldmFields {
            instance_id: message[0] & 0x1F,
            request,
            datagram: message[0] & 0x40 != 0,
            pldm_type: message[1] & 0x3F,
            command: message[2],
            completion_code: if request { None } else { message.get(3).copied() },
        };
        (Some(fields), message[PLDM_HEADER_LEN..].to_vec())
    } else {
        (None, Vec::new())
    };

    Some(ParsedFrame {
        protocol_version,
        byte_count,
        header_version: body[0],
        dest: body[1],
        src: body[2],
        flags: body[3],
        msg_type,
        message,
        payload,
        pldm,
        fcs_received,
        fcs_computed,
    })
}

/// Split a noisy receive buffer into candidate frames.
///
/// Each frame's end is computed from its declared byte count instead of
/// searching for the next flag, because the unstuffed FCS may contain one.
/// A window holding an escape byte is rejected since its raw length no
/// longer matches the byte count; such a buffer can still be handed to
/// [`parse`] whole.
pub fn extract(buffer: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut i = 0;

    while i < buffer.len() {
        if buffer[i] != FLAG {
            i += 1;
            continue;
        }
        let start = i;
        if start + 5 >= buffer.len() {
            break;
        }

        let byte_count = buffer[start + 2] as usize;
        let body_start = start + 3;
        let body_end = body_start + byte_count;
        let expected_end = body_end + 2 + 1;

        let accepted = expected_end <= buffer.len()
            && buffer[expected_end - 1] == FLAG
            && !buffer[body_start..body_end].contains(&ESCAPE);

        if accepted {
            frames.push(buffer[start..expected_end].to_vec());
            // The closing flag may open the next frame
            i = expected_end - 1;
        } else {
            i = start + 1;
        }
    }

    frames
}

/// Join SOM/EOM fragments into one message.
///
/// Returns the last fragment with its payload replaced by the joined
/// payload, or `None` when no complete message is present. A SOM seen while
/// assembling restarts assembly.
pub fn reassemble(frames: &[Option<ParsedFrame>]) -> Option<ParsedFrame> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut assembling = false;

    for frame in frames.iter().flatten() {
        let (som, eom) = (frame.som(), frame.eom());

        if som && eom {
            return Some(frame.clone());
        }
        if som {
            buffer.clear();
            buffer.extend_from_slice(&frame.payload);
            assembling = true;
            continue;
        }
        if assembling {
            buffer.extend_from_slice(&frame.payload);
            if eom {
                let mut done = frame.clone();
                done.payload = buffer;
                return Some(done);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::fcs16;

    fn pldm_response(cmd: u8, data: &[u8]) -> Vec<u8> {
        let mut msg = vec![0x00, 0x02, cmd];
        msg.extend_from_slice(data);
        msg
    }

    #[test]
    fn test_build_layout() {
        let frame = build_pldm(&[0x80, 0x02, 0x50]).unwrap();
        assert_eq!(frame[0], FLAG);
        assert_eq!(frame[1], PROTOCOL_VERSION);
        assert_eq!(frame[2], 8);
        assert_eq!(&frame[3..8], &[0x01, 0x00, 0x10, 0xC8, 0x01]);
        assert_eq!(&frame[8..11], &[0x80, 0x02, 0x50]);
        assert_eq!(*frame.last().unwrap(), FLAG);
        assert_eq!(frame.len(), 8 + 6);

        let fcs = fcs16(&frame[1..11]);
        assert_eq!(&frame[11..13], &fcs.to_be_bytes());
    }

    #[test]
    fn test_build_rejects_oversized_body() {
        let message = vec![0u8; 251];
        assert_eq!(build_pldm(&message), Err(FrameError::TooLong(256)));
    }

    #[test]
    fn test_roundtrip_with_stuffed_bytes() {
        let message = pldm_response(0x51, &[0x00, 0x7E, 0x7D, 0x01, 0x7E, 0x7E, 0x7D]);
        let frame = build(&message, 0x08, 0x10, MSG_TYPE_PLDM, DEFAULT_FLAGS).unwrap();

        // Five stuffed bytes add five escapes
        assert_eq!(frame.len(), 6 + 5 + message.len() + 5);

        let parsed = parse(&frame).unwrap();
        assert!(parsed.fcs_ok());
        assert_eq!(parsed.message, message);
        assert_eq!(parsed.dest, 0x08);
        assert_eq!(parsed.src, 0x10);
        assert_eq!(parsed.msg_type, MSG_TYPE_PLDM);
        assert!(parsed.som() && parsed.eom());

        let pldm = parsed.pldm.unwrap();
        assert!(!pldm.request);
        assert_eq!(pldm.pldm_type, 0x02);
        assert_eq!(pldm.command, 0x51);
        assert_eq!(pldm.completion_code, Some(0x00));
        assert_eq!(parsed.payload, &message[3..]);
    }

    #[test]
    fn test_parse_request_has_no_completion_code() {
        let frame = build_pldm(&[0x85, 0x04, 0x01]).unwrap();
        let pldm = parse(&frame).unwrap().pldm.unwrap();
        assert!(pldm.request);
        assert_eq!(pldm.instance_id, 5);
        assert_eq!(pldm.pldm_type, 0x04);
        assert_eq!(pldm.completion_code, None);
    }

    #[test]
    fn test_parse_reports_fcs_mismatch() {
        let mut frame = build_pldm(&pldm_response(0x50, &[0x00, 0x01])).unwrap();
        let n = frame.len();
        frame[n - 2] ^= 0xFF;
        let parsed = parse(&frame).unwrap();
        assert!(!parsed.fcs_ok());
    }

    #[test]
    fn test_parse_rejects_truncated() {
        let frame = build_pldm(&pldm_response(0x50, &[0x00, 0x01, 0x02])).unwrap();
        let mut cut = frame[..frame.len() - 5].to_vec();
        cut.push(FLAG);
        assert!(parse(&cut).is_none());
        assert!(parse(&[FLAG, 0x01, FLAG]).is_none());
        assert!(parse(&[]).is_none());
    }

    #[test]
    fn test_parse_skips_leading_noise() {
        let frame = build_pldm(&pldm_response(0x50, &[0x00])).unwrap();
        let mut noisy = vec![0x11, 0x22];
        noisy.extend_from_slice(&frame);
        assert!(parse(&noisy).unwrap().fcs_ok());
    }

    #[test]
    fn test_extract_tolerates_flag_in_fcs() {
        // Hand-build a frame whose FCS bytes are forced to contain 0x7E
        let body = [0x01, 0x10, 0x00, 0xC8, 0x01, 0x00, 0x02, 0x50, 0x00];
        let mut buffer = vec![FLAG, PROTOCOL_VERSION, body.len() as u8];
        buffer.extend_from_slice(&body);
        buffer.extend_from_slice(&[0x7E, 0x7E]);
        buffer.push(FLAG);

        let frames = extract(&buffer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), body.len() + 6);
    }

    #[test]
    fn test_extract_multiple_and_noise() {
        let a = build_pldm(&pldm_response(0x50, &[0x00, 0x01])).unwrap();
        let b = build_pldm(&pldm_response(0x51, &[0x00, 0x02, 0x03])).unwrap();
        let mut buffer = vec![0x00, FLAG, 0x33];
        buffer.extend_from_slice(&a);
        buffer.extend_from_slice(&[0x44, 0x55]);
        buffer.extend_from_slice(&b);

        let frames = extract(&buffer);
        assert_eq!(frames, vec![a, b]);
    }

    #[test]
    fn test_extract_rejects_stuffed_window() {
        let frame = build_pldm(&pldm_response(0x51, &[0x00, 0x7E])).unwrap();
        assert!(extract(&frame).is_empty());
        assert!(parse(&frame).unwrap().fcs_ok());
    }

    fn fragment(flags: u8, data: &[u8]) -> Option<ParsedFrame> {
        let frame = build(&pldm_response(0x02, data), 0, 0x10, MSG_TYPE_PLDM, flags).unwrap();
        parse(&frame)
    }

    #[test]
    fn test_reassemble_single() {
        let frames = vec![fragment(SOM | EOM, &[0x00, 0xAA])];
        assert_eq!(reassemble(&frames).unwrap().payload, vec![0x00, 0xAA]);
    }

    #[test]
    fn test_reassemble_fragments() {
        let frames = vec![
            None,
            fragment(SOM, &[0x00, 0x01]),
            fragment(0, &[0x02]),
            fragment(EOM, &[0x03, 0x04]),
        ];
        let joined = reassemble(&frames).unwrap();
        assert_eq!(joined.payload, vec![0x00, 0x01, 0x02, 0x03, 0x04]);
        assert!(joined.eom());
    }

    #[test]
    fn test_reassemble_restarts_on_stray_som() {
        let frames = vec![
            fragment(SOM, &[0xDE, 0xAD]),
            fragment(SOM, &[0x00, 0x01]),
            fragment(EOM, &[0x02]),
        ];
        assert_eq!(reassemble(&frames).unwrap().payload, vec![0x00, 0x01, 0x02]);
    }

    #[test]
    fn test_reassemble_incomplete() {
        let frames = vec![fragment(0, &[0x01]), fragment(SOM, &[0x02])];
        assert!(reassemble(&frames).is_none());
        assert!(reassemble(&[]).is_none());
    }
}
