//! S7comm over ISO-on-TCP (TPKT + COTP) frame codec.
//!
//! Only what a data-block writer needs: connection request, setup
//! communication, and single-item `WriteVar` against a DB.

use thiserror::Error;

/// Default ISO-on-TCP port.
pub const ISO_TCP_PORT: u16 = 102;

/// PDU size we ask for during setup; the controller may negotiate it down.
pub const REQUESTED_PDU_SIZE: u16 = 480;

/// TPKT + COTP + S7 header + write parameters + data header.
pub const WRITE_OVERHEAD: usize = 35;

/// Largest byte address expressible in the 24-bit bit-address field.
pub const MAX_BYTE_ADDRESS: u32 = 0x00FF_FFFF / 8;

const TPKT_VERSION: u8 = 0x03;
const TPKT_HEADER_LEN: usize = 4;
const COTP_CONNECTION_CONFIRM: u8 = 0xD0;
const S7_PROTOCOL_ID: u8 = 0x32;
const ROSCTR_JOB: u8 = 0x01;
const ROSCTR_ACK_DATA: u8 = 0x03;
const FUNC_SETUP_COMMUNICATION: u8 = 0xF0;
const FUNC_WRITE_VAR: u8 = 0x05;
const AREA_DATA_BLOCK: u8 = 0x84;
const TRANSPORT_BYTE: u8 = 0x02;
const DATA_TRANSPORT_BIT_LENGTH: u8 = 0x04;
const RETURN_SUCCESS: u8 = 0xFF;

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum S7Error {
    #[error("frame too short: {len} bytes, expected at least {expected}")]
    Truncated { len: usize, expected: usize },

    #[error("invalid TPKT header")]
    InvalidTpkt,

    #[error("connection refused by controller (COTP type {0:#04x})")]
    ConnectionRefused(u8),

    #[error("unexpected S7 PDU (protocol {protocol:#04x}, type {rosctr:#04x})")]
    UnexpectedPdu { protocol: u8, rosctr: u8 },

    #[error("controller error class {class:#04x} code {code:#04x}")]
    Header { class: u8, code: u8 },

    #[error("write rejected: {reason} (code {code:#04x})")]
    WriteRejected { code: u8, reason: &'static str },

    #[error("negotiated PDU size {0} is too small")]
    PduTooSmall(u16),

    #[error("byte address {0} is out of range")]
    AddressOutOfRange(u32),

    #[error("payload of {0} bytes does not fit in one request")]
    PayloadTooLarge(usize),
}

/// Human readable text for a `WriteVar` item return code.
pub fn return_code_text(code: u8) -> &'static str {
    match code {
        0x01 => "hardware fault",
        0x03 => "object access not allowed",
        0x05 => "address out of range",
        0x06 => "data type not supported",
        0x07 => "data type inconsistent",
        0x0A => "object does not exist",
        0xFF => "success",
        _ => "unknown return code",
    }
}

/// Total frame length from a TPKT header.
pub fn tpkt_length(header: &[u8; TPKT_HEADER_LEN]) -> Result<usize, S7Error> {
    if header[0] != TPKT_VERSION {
        return Err(S7Error::InvalidTpkt);
    }
    let len = usize::from(u16::from_be_bytes([header[2], header[3]]));
    // TPKT header plus at least a COTP length and type byte.
    if len < TPKT_HEADER_LEN + 3 {
        return Err(S7Error::InvalidTpkt);
    }
    Ok(len)
}

/// COTP connection request addressed to the PG TSAP of `rack`/`slot`.
pub fn connection_request(rack: u8, slot: u8) -> Vec<u8> {
    let remote_tsap = rack.wrapping_mul(0x20).wrapping_add(slot);
    let cotp = [
        0x11, // length indicator
        0xE0, // CR
        0x00, 0x00, // destination reference
        0x00, 0x01, // source reference
        0x00, // class 0
        0xC0, 0x01, 0x0A, // TPDU size 1024
        0xC1, 0x02, 0x01, 0x00, // calling TSAP
        0xC2, 0x02, 0x01, remote_tsap, // called TSAP
    ];
    with_tpkt(&cotp)
}

pub fn parse_connection_confirm(frame: &[u8]) -> Result<(), S7Error> {
    ensure_len(frame, 6)?;
    match frame[5] {
        COTP_CONNECTION_CONFIRM => Ok(()),
        other => Err(S7Error::ConnectionRefused(other)),
    }
}

pub fn setup_communication(pdu_ref: u16, pdu_size: u16) -> Vec<u8> {
    let params = [
        FUNC_SETUP_COMMUNICATION,
        0x00,
        0x00,
        0x01, // max AMQ calling
        0x00,
        0x01, // max AMQ called
        (pdu_size >> 8) as u8,
        pdu_size as u8,
    ];
    job(pdu_ref, &params, &[])
}

/// Returns the negotiated PDU size.
pub fn parse_setup_response(frame: &[u8]) -> Result<u16, S7Error> {
    ensure_len(frame, 27)?;
    check_ack(frame)?;
    Ok(u16::from_be_bytes([frame[25], frame[26]]))
}

/// Largest payload one `WriteVar` may carry under `pdu_size`.
pub fn max_write_chunk(pdu_size: u16) -> Result<usize, S7Error> {
    let pdu = usize::from(pdu_size);
    if pdu <= WRITE_OVERHEAD {
        return Err(S7Error::PduTooSmall(pdu_size));
    }
    Ok(pdu - WRITE_OVERHEAD)
}

/// `WriteVar` of `data` into `DB<db>.DBB<byte_address>`.
pub fn write_var_request(
    pdu_ref: u16,
    db: u16,
    byte_address: u32,
    data: &[u8],
) -> Result<Vec<u8>, S7Error> {
    if byte_address > MAX_BYTE_ADDRESS {
        return Err(S7Error::AddressOutOfRange(byte_address));
    }
    let count = u16::try_from(data.len()).map_err(|_| S7Error::PayloadTooLarge(data.len()))?;
    let bit_len = count
        .checked_mul(8)
        .ok_or(S7Error::PayloadTooLarge(data.len()))?;
    let bit_address = byte_address * 8;

    let mut params = vec![
        FUNC_WRITE_VAR,
        0x01, // item count
        0x12, // variable specification
        0x0A, // length of address specification
        0x10, // syntax id: S7ANY
        TRANSPORT_BYTE,
    ];
    params.extend_from_slice(&count.to_be_bytes());
    params.extend_from_slice(&db.to_be_bytes());
    params.push(AREA_DATA_BLOCK);
    params.extend_from_slice(&bit_address.to_be_bytes()[1..]);

    let mut payload = vec![0x00, DATA_TRANSPORT_BIT_LENGTH];
    payload.extend_from_slice(&bit_len.to_be_bytes());
    payload.extend_from_slice(data);

    Ok(job(pdu_ref, &params, &payload))
}

pub fn parse_write_response(frame: &[u8]) -> Result<(), S7Error> {
    ensure_len(frame, 22)?;
    check_ack(frame)?;
    match frame[21] {
        RETURN_SUCCESS => Ok(()),
        code => Err(S7Error::WriteRejected {
            code,
            reason: return_code_text(code),
        }),
    }
}

fn job(pdu_ref: u16, params: &[u8], data: &[u8]) -> Vec<u8> {
    let mut body = vec![0x02, 0xF0, 0x80]; // COTP data, last unit
    body.extend_from_slice(&[S7_PROTOCOL_ID, ROSCTR_JOB, 0x00, 0x00]);
    body.extend_from_slice(&pdu_ref.to_be_bytes());
    body.extend_from_slice(&(params.len() as u16).to_be_bytes());
    body.extend_from_slice(&(data.len() as u16).to_be_bytes());
    body.extend_from_slice(params);
    body.extend_from_slice(data);
    with_tpkt(&body)
}

fn with_tpkt(body: &[u8]) -> Vec<u8> {
    let len = (body.len() + TPKT_HEADER_LEN) as u16;
    let mut frame = Vec::with_capacity(usize::from(len));
    frame.extend_from_slice(&[TPKT_VERSION, 0x00]);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(body);
    frame
}

fn check_ack(frame: &[u8]) -> Result<(), S7Error> {
    let (protocol, rosctr) = (frame[7], frame[8]);
    if protocol != S7_PROTOCOL_ID || rosctr != ROSCTR_ACK_DATA {
        return Err(S7Error::UnexpectedPdu { protocol, rosctr });
    }
    let (class, code) = (frame[17], frame[18]);
    if class != 0 || code != 0 {
        return Err(S7Error::Header { class, code });
    }
    Ok(())
}

fn ensure_len(frame: &[u8], expected: usize) -> Result<(), S7Error> {
    if frame.len() < expected {
        return Err(S7Error::Truncated {
            len: frame.len(),
            expected,
        });
    }
    Ok(())
}
