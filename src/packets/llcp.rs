// Copyright 2023, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! LLCP 1.1 PDU header and parameter TLV codec.

use crate::error::{EmulatorError, Result};

pub const SAP_COUNT: usize = 64;

pub const VERSION_MAJOR: u8 = 0x01;
pub const VERSION_MINOR: u8 = 0x01;

/// The three magic bytes ("Ffm") that open every LLCP parameter tail, used
/// when announcing LLCP support inside an ATR_RES activation block.
pub const MAGIC: [u8; 3] = [0x46, 0x66, 0x6d];

pub const DEFAULT_MIU: u16 = 128;
pub const DEFAULT_LTO_MS: u8 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PType {
    Symm = 0,
    Pax = 1,
    Agf = 2,
    Ui = 3,
    Connect = 4,
    Disc = 5,
    Cc = 6,
    Dm = 7,
    Frmr = 8,
    Snl = 9,
    I = 12,
    Rr = 13,
    Rnr = 14,
}

impl PType {
    pub fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0 => PType::Symm,
            1 => PType::Pax,
            2 => PType::Agf,
            3 => PType::Ui,
            4 => PType::Connect,
            5 => PType::Disc,
            6 => PType::Cc,
            7 => PType::Dm,
            8 => PType::Frmr,
            9 => PType::Snl,
            12 => PType::I,
            13 => PType::Rr,
            14 => PType::Rnr,
            _ => return Err(EmulatorError::wire_format(format!("bad LLCP PType {b}"))),
        })
    }
}

/// Decoded `(dsap, ptype, ssap)` header plus the info field that follows.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub dsap: u8,
    pub ptype: PType,
    pub ssap: u8,
}

pub const HEADER_LEN: usize = 2;

pub fn encode_header(dsap: u8, ptype: PType, ssap: u8) -> [u8; 2] {
    let ptype = ptype as u8;
    let byte0 = (dsap << 2) | (ptype >> 2);
    let byte1 = ((ptype & 0x3) << 6) | ssap;
    [byte0, byte1]
}

pub fn decode(bytes: &[u8]) -> Result<(Header, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(EmulatorError::wire_format("LLCP PDU shorter than header"));
    }
    let dsap = bytes[0] >> 2;
    let ptype = ((bytes[0] & 0x3) << 2) | (bytes[1] >> 6);
    let ssap = bytes[1] & 0x3f;
    let header = Header { dsap, ptype: PType::from_u8(ptype)?, ssap };
    Ok((header, &bytes[HEADER_LEN..]))
}

/// Sequence byte for I/RR/RNR PDUs: `(n_s << 4) | n_r`.
pub fn encode_sequence(n_s: u8, n_r: u8) -> u8 {
    ((n_s & 0x0f) << 4) | (n_r & 0x0f)
}

pub fn decode_sequence(byte: u8) -> (u8, u8) {
    (byte >> 4, byte & 0x0f)
}

/// Parameter TLV type values, LLCP 1.1 table 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Version = 0x01,
    Miux = 0x02,
    Wks = 0x03,
    Lto = 0x04,
    Rw = 0x05,
    Sn = 0x06,
    Opt = 0x07,
    Sdreq = 0x08,
    Sdres = 0x09,
}

impl ParamType {
    fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => ParamType::Version,
            0x02 => ParamType::Miux,
            0x03 => ParamType::Wks,
            0x04 => ParamType::Lto,
            0x05 => ParamType::Rw,
            0x06 => ParamType::Sn,
            0x07 => ParamType::Opt,
            0x08 => ParamType::Sdreq,
            0x09 => ParamType::Sdres,
            _ => return None,
        })
    }
}

/// A decoded parameter: unrecognized or malformed TLVs are reported as
/// `Unknown`/skipped by the caller rather than rejected.
#[derive(Debug, Clone)]
pub enum Param {
    Version { major: u8, minor: u8 },
    Miux(u16),
    Rw(u8),
    Sn(String),
    Lto(u8),
    Unknown { ty: u8, value: Vec<u8> },
}

/// Walk a sequence of `(type, len, value)` TLVs, skipping any whose
/// declared length runs past the remaining buffer (malformed TLVs are
/// skipped, not fatal).
pub fn parse_params(mut buf: &[u8]) -> Vec<Param> {
    let mut out = Vec::new();
    while buf.len() >= 2 {
        let ty = buf[0];
        let len = buf[1] as usize;
        if buf.len() < 2 + len {
            break;
        }
        let value = &buf[2..2 + len];
        let param = match ParamType::from_u8(ty) {
            Some(ParamType::Version) if len == 1 => {
                Param::Version { major: value[0] >> 4, minor: value[0] & 0x0f }
            }
            Some(ParamType::Miux) if len == 2 => {
                Param::Miux(u16::from_be_bytes([value[0], value[1]]) & 0x07ff)
            }
            Some(ParamType::Rw) if len == 1 => Param::Rw(value[0] & 0x0f),
            Some(ParamType::Sn) => Param::Sn(String::from_utf8_lossy(value).into_owned()),
            Some(ParamType::Lto) if len == 1 => Param::Lto(value[0]),
            _ => Param::Unknown { ty, value: value.to_vec() },
        };
        out.push(param);
        buf = &buf[2 + len..];
    }
    out
}

pub fn encode_param_version() -> [u8; 3] {
    [ParamType::Version as u8, 1, (VERSION_MAJOR << 4) | VERSION_MINOR]
}

pub fn encode_param_lto(ms: u8) -> [u8; 3] {
    [ParamType::Lto as u8, 1, ms]
}

/// The VERSION + LTO TLV tail appended after the `MAGIC` bytes when
/// announcing LLCP support inside an ATR_RES.
pub fn param_tail() -> Vec<u8> {
    let mut out = MAGIC.to_vec();
    out.extend_from_slice(&encode_param_version());
    out.extend_from_slice(&encode_param_lto(DEFAULT_LTO_MS));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_tail_matches_scenario_b() {
        assert_eq!(param_tail(), vec![0x46, 0x66, 0x6d, 0x01, 0x01, 0x11, 0x04, 0x01, 0xfa]);
    }

    #[test]
    fn header_roundtrip() {
        let bytes = encode_header(4, PType::Connect, 32);
        let (hdr, _) = decode(&bytes).unwrap();
        assert_eq!(hdr.dsap, 4);
        assert_eq!(hdr.ptype, PType::Connect);
        assert_eq!(hdr.ssap, 32);
    }

    #[test]
    fn malformed_tlv_is_skipped_not_fatal() {
        // declared length runs past the buffer: parsing stops cleanly.
        let params = parse_params(&[0x02, 0xff, 0x00]);
        assert!(params.is_empty());
    }
}
