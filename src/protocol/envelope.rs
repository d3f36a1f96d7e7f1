// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Endpoint protocol envelope (§4.I, §6.2). `original_source`'s
// `endpoint_proto_utils.h` carries this as a FlatBuffers message; the
// teacher's `proto::message` wraps `flatbuffers` for exactly that encoding,
// but §6.2 specifies a custom delimited-varint length-prefixed format
// instead, so there's no schema to compile against here. LEB128 is
// hand-rolled — see DESIGN.md for why this is the one place this crate
// doesn't reach for an ecosystem crate.

use crate::error::{DiagnosticCode, IpcError, Result};
use crate::request::BlobDescriptor;

/// Write `value` as an unsigned LEB128 varint.
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

/// Read an unsigned LEB128 varint starting at `*pos`, advancing it past
/// the bytes consumed.
pub fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| IpcError::MalformedRequest("truncated varint".to_owned()))?;
        *pos += 1;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(IpcError::MalformedRequest("varint too long".to_owned()));
        }
    }
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let len = read_varint(buf, pos)? as usize;
    let end = pos
        .checked_add(len)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| IpcError::MalformedRequest("truncated length-delimited field".to_owned()))?;
    let slice = &buf[*pos..end];
    *pos = end;
    Ok(slice)
}

fn write_blobs(buf: &mut Vec<u8>, blobs: &[BlobDescriptor]) {
    write_varint(buf, blobs.len() as u64);
    for b in blobs {
        write_bytes(buf, b.channel_name.as_bytes());
        write_bytes(buf, b.path.to_string_lossy().as_bytes());
        buf.push(b.temporary as u8);
    }
}

fn read_blobs(buf: &[u8], pos: &mut usize) -> Result<Vec<BlobDescriptor>> {
    let count = read_varint(buf, pos)?;
    let mut blobs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let channel_name = String::from_utf8_lossy(read_bytes(buf, pos)?).into_owned();
        let path = String::from_utf8_lossy(read_bytes(buf, pos)?).into_owned().into();
        let temporary = *buf
            .get(*pos)
            .ok_or_else(|| IpcError::MalformedRequest("truncated blob flag".to_owned()))?
            != 0;
        *pos += 1;
        blobs.push(BlobDescriptor {
            channel_name,
            path,
            temporary,
        });
    }
    Ok(blobs)
}

/// The outer request envelope's framework header (§3, §6.2):
/// `{ session_id: u64, service_id: u64, blobs: repeated {...} }`.
#[derive(Debug, Clone)]
pub struct FrameworkHeader {
    pub session_id: u64,
    pub service_id: u64,
    pub blobs: Vec<BlobDescriptor>,
}

impl FrameworkHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, self.session_id);
        write_varint(&mut buf, self.service_id);
        write_blobs(&mut buf, &self.blobs);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let session_id = read_varint(buf, &mut pos)?;
        let service_id = read_varint(buf, &mut pos)?;
        let blobs = read_blobs(buf, &mut pos)?;
        Ok(Self {
            session_id,
            service_id,
            blobs,
        })
    }
}

/// Response payload kind (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    ServiceResult = 0,
    ServerDiagnostics = 1,
}

impl PayloadType {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(PayloadType::ServiceResult),
            1 => Ok(PayloadType::ServerDiagnostics),
            other => Err(IpcError::MalformedRequest(format!(
                "unknown payload_type {other}"
            ))),
        }
    }
}

/// The outer response envelope's framework header (§3, §6.2):
/// `{ session_id: u64, payload_type: enum, blobs: repeated {...} }`.
#[derive(Debug, Clone)]
pub struct FrameworkResponseHeader {
    pub session_id: u64,
    pub payload_type: PayloadType,
    pub blobs: Vec<BlobDescriptor>,
}

impl FrameworkResponseHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, self.session_id);
        buf.push(self.payload_type as u8);
        write_blobs(&mut buf, &self.blobs);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let session_id = read_varint(buf, &mut pos)?;
        let payload_type = PayloadType::from_u8(
            *buf.get(pos)
                .ok_or_else(|| IpcError::MalformedRequest("truncated payload_type".to_owned()))?,
        )?;
        pos += 1;
        let blobs = read_blobs(buf, &mut pos)?;
        Ok(Self {
            session_id,
            payload_type,
            blobs,
        })
    }
}

/// The client-visible `{code, message}` record carried as the service body
/// when `payload_type == SERVER_DIAGNOSTICS` (§7's closing paragraph).
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(diagnostic_code_tag(self.code));
        write_bytes(&mut buf, self.message.as_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let tag = *buf
            .get(pos)
            .ok_or_else(|| IpcError::MalformedRequest("truncated diagnostic".to_owned()))?;
        pos += 1;
        let code = diagnostic_code_from_tag(tag)?;
        let message = String::from_utf8_lossy(read_bytes(buf, &mut pos)?).into_owned();
        Ok(Self { code, message })
    }
}

fn diagnostic_code_tag(code: DiagnosticCode) -> u8 {
    match code {
        DiagnosticCode::InvalidRequest => 0,
        DiagnosticCode::OperationDenied => 1,
        DiagnosticCode::AuthenticationError => 2,
        DiagnosticCode::OperationCanceled => 3,
        DiagnosticCode::SessionClosed => 4,
        DiagnosticCode::IllegalState => 5,
        DiagnosticCode::Unknown => 6,
    }
}

fn diagnostic_code_from_tag(tag: u8) -> Result<DiagnosticCode> {
    Ok(match tag {
        0 => DiagnosticCode::InvalidRequest,
        1 => DiagnosticCode::OperationDenied,
        2 => DiagnosticCode::AuthenticationError,
        3 => DiagnosticCode::OperationCanceled,
        4 => DiagnosticCode::SessionClosed,
        5 => DiagnosticCode::IllegalState,
        6 => DiagnosticCode::Unknown,
        other => {
            return Err(IpcError::MalformedRequest(format!(
                "unknown diagnostic code tag {other}"
            )))
        }
    });
}

/// Split a request-wire message payload into its framework header and
/// service body (§6.2: `[varint len][header][varint len][body]`).
pub fn decode_request_payload(payload: &[u8]) -> Result<(FrameworkHeader, Vec<u8>)> {
    let mut pos = 0;
    let header_bytes = read_bytes(payload, &mut pos)?;
    let header = FrameworkHeader::decode(header_bytes)?;
    let body = read_bytes(payload, &mut pos)?.to_vec();
    Ok((header, body))
}

/// Assemble a request-wire message payload from a framework header and a
/// service body.
pub fn encode_request_payload(header: &FrameworkHeader, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_bytes(&mut buf, &header.encode());
    write_bytes(&mut buf, body);
    buf
}

/// Split a response-wire message payload into its framework response
/// header and service body.
pub fn decode_response_payload(payload: &[u8]) -> Result<(FrameworkResponseHeader, Vec<u8>)> {
    let mut pos = 0;
    let header_bytes = read_bytes(payload, &mut pos)?;
    let header = FrameworkResponseHeader::decode(header_bytes)?;
    let body = read_bytes(payload, &mut pos)?.to_vec();
    Ok((header, body))
}

/// Assemble a response-wire message payload from a framework response
/// header and a service body.
pub fn encode_response_payload(header: &FrameworkResponseHeader, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_bytes(&mut buf, &header.encode());
    write_bytes(&mut buf, body);
    buf
}
