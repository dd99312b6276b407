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

//! SNEP 1.0 header codec: `{version, msg, len (u32 BE), info[]}`.

use crate::error::{EmulatorError, Result};

pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;

pub const HEADER_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgCode {
    ReqContinue = 0x00,
    ReqGet = 0x01,
    ReqPut = 0x02,
    ReqReject = 0x7f,
    RspContinue = 0x80,
    RspSuccess = 0x81,
    RspNotFound = 0xc0,
    RspExcessData = 0xc1,
    RspBadRequest = 0xc2,
    RspNotImplemented = 0xe0,
    RspUnsupportedVersion = 0xe1,
    RspReject = 0xff,
}

impl MsgCode {
    fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0x00 => MsgCode::ReqContinue,
            0x01 => MsgCode::ReqGet,
            0x02 => MsgCode::ReqPut,
            0x7f => MsgCode::ReqReject,
            0x80 => MsgCode::RspContinue,
            0x81 => MsgCode::RspSuccess,
            0xc0 => MsgCode::RspNotFound,
            0xc1 => MsgCode::RspExcessData,
            0xc2 => MsgCode::RspBadRequest,
            0xe0 => MsgCode::RspNotImplemented,
            0xe1 => MsgCode::RspUnsupportedVersion,
            0xff => MsgCode::RspReject,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub major: u8,
    pub minor: u8,
    pub msg_raw: u8,
    pub msg: Option<MsgCode>,
    pub len: u32,
}

pub fn encode_header(major: u8, minor: u8, msg: MsgCode, len: u32) -> [u8; HEADER_LEN] {
    let ver = (major << 4) | (minor & 0x0f);
    let l = len.to_be_bytes();
    [ver, msg as u8, l[0], l[1], l[2], l[3]]
}

pub fn decode_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(EmulatorError::wire_format("SNEP header truncated"));
    }
    let major = bytes[0] >> 4;
    let minor = bytes[0] & 0x0f;
    let msg_raw = bytes[1];
    let len = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    Ok(Header { major, minor, msg_raw, msg: MsgCode::from_u8(msg_raw), len })
}

/// Build a zero-payload response: `{1, 0, msg, 0, []}`.
pub fn encode_empty_response(msg: MsgCode) -> Vec<u8> {
    encode_header(VERSION_MAJOR, VERSION_MINOR, msg, 0).to_vec()
}

pub fn version_is_supported(major: u8, minor: u8) -> bool {
    (major, minor) <= (VERSION_MAJOR, VERSION_MINOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_for_every_msg_code() {
        for (code, val) in [
            (MsgCode::ReqContinue, 0),
            (MsgCode::ReqGet, 1),
            (MsgCode::ReqPut, 2),
            (MsgCode::ReqReject, 0x7f),
            (MsgCode::RspContinue, 0x80),
            (MsgCode::RspSuccess, 0x81),
            (MsgCode::RspNotFound, 0xc0),
            (MsgCode::RspExcessData, 0xc1),
            (MsgCode::RspBadRequest, 0xc2),
            (MsgCode::RspNotImplemented, 0xe0),
            (MsgCode::RspUnsupportedVersion, 0xe1),
            (MsgCode::RspReject, 0xff),
        ] {
            for len in [0u32, 1, 1 << 16, u32::MAX - 1 - HEADER_LEN as u32] {
                let bytes = encode_header(VERSION_MAJOR, VERSION_MINOR, code, len);
                let hdr = decode_header(&bytes).unwrap();
                assert_eq!(hdr.msg_raw, val);
                assert_eq!(hdr.len, len);
            }
        }
    }

    #[test]
    fn truncated_header_is_wire_format_error() {
        assert!(decode_header(&[1, 2, 3]).is_err());
    }
}
