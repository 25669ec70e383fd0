//! Diameter message (RFC 6733 section 3)

use apolo_core::{AppError, AppResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::avp::{decode_avps, find_avp, Avp};
use crate::dictionary::DIAMETER_VERSION;

/// Request bit
pub const FLAG_REQUEST: u8 = 0x80;
/// Proxiable bit
pub const FLAG_PROXIABLE: u8 = 0x40;
/// Error bit
pub const FLAG_ERROR: u8 = 0x20;

/// Fixed header length
pub const HEADER_LEN: usize = 20;

static NEXT_HOP_BY_HOP: AtomicU32 = AtomicU32::new(1);

/// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiameterHeader {
    pub version: u8,
    /// Total message length including the header
    pub length: u32,
    pub flags: u8,
    pub command_code: u32,
    pub application_id: u32,
    pub hop_by_hop_id: u32,
    pub end_to_end_id: u32,
}

impl DiameterHeader {
    pub fn is_request(&self) -> bool {
        self.flags & FLAG_REQUEST != 0
    }

    pub fn is_error(&self) -> bool {
        self.flags & FLAG_ERROR != 0
    }

    /// Parse the first 20 bytes of a message without consuming them
    pub fn peek(buf: &[u8]) -> AppResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(AppError::MalformedMessage(format!(
                "truncated header ({} bytes)",
                buf.len()
            )));
        }
        let mut b = &buf[..HEADER_LEN];
        let version = b.get_u8();
        if version != DIAMETER_VERSION {
            return Err(AppError::MalformedMessage(format!(
                "unsupported Diameter version {}",
                version
            )));
        }
        let length = b.get_uint(3) as u32;
        if (length as usize) < HEADER_LEN || length % 4 != 0 {
            return Err(AppError::MalformedMessage(format!(
                "invalid message length {}",
                length
            )));
        }
        Ok(Self {
            version,
            length,
            flags: b.get_u8(),
            command_code: b.get_uint(3) as u32,
            application_id: b.get_u32(),
            hop_by_hop_id: b.get_u32(),
            end_to_end_id: b.get_u32(),
        })
    }
}

/// A complete message: header plus top level AVPs in wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiameterMessage {
    pub header: DiameterHeader,
    pub avps: Vec<Avp>,
}

impl DiameterMessage {
    /// New request with fresh hop-by-hop and end-to-end identifiers
    pub fn new_request(command_code: u32, application_id: u32) -> Self {
        let id = NEXT_HOP_BY_HOP.fetch_add(1, Ordering::Relaxed);
        Self {
            header: DiameterHeader {
                version: DIAMETER_VERSION,
                length: HEADER_LEN as u32,
                flags: FLAG_REQUEST | FLAG_PROXIABLE,
                command_code,
                application_id,
                hop_by_hop_id: id,
                end_to_end_id: id,
            },
            avps: Vec::new(),
        }
    }

    /// Answer skeleton mirroring the request identifiers
    pub fn new_answer(request: &DiameterHeader) -> Self {
        Self {
            header: DiameterHeader {
                flags: request.flags & FLAG_PROXIABLE,
                length: HEADER_LEN as u32,
                ..*request
            },
            avps: Vec::new(),
        }
    }

    pub fn add_avp(&mut self, avp: Avp) -> &mut Self {
        self.avps.push(avp);
        self
    }

    pub fn find_avp(&self, code: u32) -> Option<&Avp> {
        find_avp(&self.avps, code)
    }

    /// Serialized length including header
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.avps.iter().map(Avp::encoded_len).sum::<usize>()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let len = self.encoded_len();
        buf.reserve(len);
        buf.put_u8(self.header.version);
        buf.put_uint(len as u64, 3);
        buf.put_u8(self.header.flags);
        buf.put_uint(u64::from(self.header.command_code), 3);
        buf.put_u32(self.header.application_id);
        buf.put_u32(self.header.hop_by_hop_id);
        buf.put_u32(self.header.end_to_end_id);
        for avp in &self.avps {
            avp.encode(buf);
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode exactly one message
    pub fn decode(mut buf: Bytes) -> AppResult<Self> {
        let header = DiameterHeader::peek(&buf)?;
        if buf.len() != header.length as usize {
            return Err(AppError::MalformedMessage(format!(
                "header length {} does not match {} bytes received",
                header.length,
                buf.len()
            )));
        }
        buf.advance(HEADER_LEN);
        Ok(Self {
            header,
            avps: decode_avps(buf)?,
        })
    }
}
