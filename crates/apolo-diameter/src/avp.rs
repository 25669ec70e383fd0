//! Attribute-Value Pairs
//!
//! An [`Avp`] keeps its payload exactly as received. Typed accessors decode
//! on demand, so attributes we do not understand travel through untouched and
//! are re-emitted byte for byte.

use apolo_core::{AppError, AppResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use std::net::IpAddr;

use crate::dictionary;

/// Vendor-Specific bit
pub const FLAG_VENDOR: u8 = 0x80;
/// Mandatory bit
pub const FLAG_MANDATORY: u8 = 0x40;
/// Protected bit
pub const FLAG_PROTECTED: u8 = 0x20;

/// Seconds between the NTP epoch (1900) and the unix epoch
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

const AVP_HEADER_LEN: usize = 8;
const VENDOR_ID_LEN: usize = 4;

/// Typed value used when building an AVP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvpData {
    OctetString(Bytes),
    Utf8String(String),
    DiameterIdentity(String),
    Integer32(i32),
    Unsigned32(u32),
    Unsigned64(u64),
    Enumerated(i32),
    Time(DateTime<Utc>),
    Address(IpAddr),
    Grouped(Vec<Avp>),
}

impl AvpData {
    fn encode(&self) -> Bytes {
        match self {
            AvpData::OctetString(b) => b.clone(),
            AvpData::Utf8String(s) | AvpData::DiameterIdentity(s) => {
                Bytes::copy_from_slice(s.as_bytes())
            }
            AvpData::Integer32(v) | AvpData::Enumerated(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            AvpData::Unsigned32(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            AvpData::Unsigned64(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            AvpData::Time(t) => {
                // NTP seconds wrap in 2036, the u32 truncation is the wire format
                let ntp = (t.timestamp() + NTP_UNIX_OFFSET) as u32;
                Bytes::copy_from_slice(&ntp.to_be_bytes())
            }
            AvpData::Address(addr) => {
                let mut buf = BytesMut::with_capacity(18);
                match addr {
                    IpAddr::V4(v4) => {
                        buf.put_u16(1);
                        buf.put_slice(&v4.octets());
                    }
                    IpAddr::V6(v6) => {
                        buf.put_u16(2);
                        buf.put_slice(&v6.octets());
                    }
                }
                buf.freeze()
            }
            AvpData::Grouped(avps) => {
                let mut buf = BytesMut::with_capacity(avps.iter().map(Avp::encoded_len).sum());
                for avp in avps {
                    avp.encode(&mut buf);
                }
                buf.freeze()
            }
        }
    }
}

/// A single attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avp {
    code: u32,
    flags: u8,
    vendor_id: Option<u32>,
    payload: Bytes,
}

impl Avp {
    pub fn new(code: u32, flags: u8, vendor_id: Option<u32>, data: AvpData) -> Self {
        Self::raw(code, flags, vendor_id, data.encode())
    }

    /// Attribute from an already encoded payload
    pub fn raw(code: u32, flags: u8, vendor_id: Option<u32>, payload: Bytes) -> Self {
        let flags = match vendor_id {
            Some(_) => flags | FLAG_VENDOR,
            None => flags & !FLAG_VENDOR,
        };
        Self {
            code,
            flags,
            vendor_id,
            payload,
        }
    }

    pub fn mandatory(code: u32, data: AvpData) -> Self {
        Self::new(code, FLAG_MANDATORY, None, data)
    }

    pub fn optional(code: u32, data: AvpData) -> Self {
        Self::new(code, 0, None, data)
    }

    pub fn vendor_mandatory(code: u32, vendor_id: u32, data: AvpData) -> Self {
        Self::new(code, FLAG_MANDATORY, Some(vendor_id), data)
    }

    pub fn vendor_optional(code: u32, vendor_id: u32, data: AvpData) -> Self {
        Self::new(code, 0, Some(vendor_id), data)
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn vendor_id(&self) -> Option<u32> {
        self.vendor_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn is_mandatory(&self) -> bool {
        self.flags & FLAG_MANDATORY != 0
    }

    // ==================== Typed accessors ====================

    fn fixed<const N: usize>(&self, kind: &str) -> AppResult<[u8; N]> {
        <[u8; N]>::try_from(self.payload.as_ref()).map_err(|_| {
            AppError::MalformedMessage(format!(
                "AVP {} is not a valid {} ({} bytes)",
                self.code,
                kind,
                self.payload.len()
            ))
        })
    }

    pub fn as_u32(&self) -> AppResult<u32> {
        Ok(u32::from_be_bytes(self.fixed::<4>("Unsigned32")?))
    }

    pub fn as_u64(&self) -> AppResult<u64> {
        Ok(u64::from_be_bytes(self.fixed::<8>("Unsigned64")?))
    }

    pub fn as_i32(&self) -> AppResult<i32> {
        Ok(i32::from_be_bytes(self.fixed::<4>("Integer32")?))
    }

    /// Counter that may come as Unsigned32 or Unsigned64
    pub fn as_unsigned(&self) -> AppResult<u64> {
        match self.payload.len() {
            8 => self.as_u64(),
            _ => self.as_u32().map(u64::from),
        }
    }

    pub fn as_str(&self) -> AppResult<&str> {
        std::str::from_utf8(&self.payload).map_err(|e| {
            AppError::MalformedMessage(format!("AVP {} is not valid UTF-8: {}", self.code, e))
        })
    }

    pub fn as_time(&self) -> AppResult<DateTime<Utc>> {
        let ntp = u32::from_be_bytes(self.fixed::<4>("Time")?);
        Utc.timestamp_opt(i64::from(ntp) - NTP_UNIX_OFFSET, 0)
            .single()
            .ok_or_else(|| AppError::MalformedMessage(format!("AVP {} time out of range", self.code)))
    }

    pub fn as_address(&self) -> AppResult<IpAddr> {
        let bad = || AppError::MalformedMessage(format!("AVP {} is not a valid Address", self.code));
        let mut buf = self.payload.clone();
        if buf.remaining() < 2 {
            return Err(bad());
        }
        match buf.get_u16() {
            1 => <[u8; 4]>::try_from(buf.as_ref())
                .map(IpAddr::from)
                .map_err(|_| bad()),
            2 => <[u8; 16]>::try_from(buf.as_ref())
                .map(IpAddr::from)
                .map_err(|_| bad()),
            _ => Err(bad()),
        }
    }

    /// Decode the payload as a list of AVPs
    pub fn as_grouped(&self) -> AppResult<Vec<Avp>> {
        decode_avps(self.payload.clone())
    }

    // ==================== Wire format ====================

    fn header_len(&self) -> usize {
        AVP_HEADER_LEN + self.vendor_id.map_or(0, |_| VENDOR_ID_LEN)
    }

    /// Length field value: header plus payload, padding excluded
    pub fn len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Bytes taken on the wire including padding
    pub fn encoded_len(&self) -> usize {
        padded(self.len())
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let len = self.len();
        buf.reserve(padded(len));
        buf.put_u32(self.code);
        buf.put_u8(self.flags);
        buf.put_uint(len as u64, 3);
        if let Some(vendor_id) = self.vendor_id {
            buf.put_u32(vendor_id);
        }
        buf.put_slice(&self.payload);
        buf.put_bytes(0, padded(len) - len);
    }

    /// Decode one AVP from the front of `buf`, consuming its padding
    pub fn decode(buf: &mut Bytes) -> AppResult<Avp> {
        if buf.remaining() < AVP_HEADER_LEN {
            return Err(AppError::MalformedMessage(format!(
                "truncated AVP header ({} bytes left)",
                buf.remaining()
            )));
        }
        let code = buf.get_u32();
        let flags = buf.get_u8();
        let len = buf.get_uint(3) as usize;

        let mut header_len = AVP_HEADER_LEN;
        let vendor_id = if flags & FLAG_VENDOR != 0 {
            if buf.remaining() < VENDOR_ID_LEN {
                return Err(AppError::MalformedMessage(format!(
                    "AVP {} truncated before vendor id",
                    code
                )));
            }
            header_len += VENDOR_ID_LEN;
            Some(buf.get_u32())
        } else {
            None
        };

        if len < header_len || buf.remaining() < len - header_len {
            return Err(AppError::MalformedMessage(format!(
                "AVP {} declares length {} with {} bytes available",
                code,
                len,
                buf.remaining() + header_len
            )));
        }
        let payload = buf.split_to(len - header_len);
        buf.advance((padded(len) - len).min(buf.remaining()));

        Ok(Avp {
            code,
            flags,
            vendor_id,
            payload,
        })
    }
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

/// Decode a run of AVPs until the buffer is exhausted
pub fn decode_avps(mut buf: Bytes) -> AppResult<Vec<Avp>> {
    let mut avps = Vec::new();
    while buf.has_remaining() {
        avps.push(Avp::decode(&mut buf)?);
    }
    Ok(avps)
}

/// First AVP with `code`
pub fn find_avp(avps: &[Avp], code: u32) -> Option<&Avp> {
    avps.iter().find(|a| a.code == code)
}

/// Every AVP with `code`
pub fn find_avps(avps: &[Avp], code: u32) -> impl Iterator<Item = &Avp> {
    avps.iter().filter(move |a| a.code == code)
}

/// Depth-first search through known grouped AVPs
pub fn find_avp_nested(avps: &[Avp], code: u32) -> AppResult<Option<Avp>> {
    for avp in avps {
        if avp.code == code {
            return Ok(Some(avp.clone()));
        }
        if dictionary::is_grouped(avp.code) {
            if let Some(found) = find_avp_nested(&avp.as_grouped()?, code)? {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}
