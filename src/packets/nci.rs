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

//! NCI wire header and the group/opcode identifiers used to dispatch
//! commands. Per NFC Forum NCI 1.1 §3: a packet is one 3-byte header
//! followed by up to 255 bytes of payload.

use crate::error::{EmulatorError, Result};

/// Message Type, the top 3 bits of octet 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Data = 0,
    Command = 1,
    Response = 2,
    Notification = 3,
}

impl MsgType {
    fn from_bits(b: u8) -> Result<Self> {
        Ok(match b {
            0 => MsgType::Data,
            1 => MsgType::Command,
            2 => MsgType::Response,
            3 => MsgType::Notification,
            _ => return Err(EmulatorError::wire_format(format!("bad NCI MT {b}"))),
        })
    }
}

/// Packet Boundary Flag, bit 4 of octet 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pbf {
    CompleteOrFinal = 0,
    NotComplete = 1,
}

/// Group Identifier, the low 4 bits of octet 0 for control packets.
pub mod gid {
    pub const CORE: u8 = 0x0;
    pub const RF: u8 = 0x1;
    pub const NFCEE: u8 = 0x2;
    pub const PROP: u8 = 0xf;
}

/// Opcode Identifier values for GID=CORE.
pub mod core_oid {
    pub const RESET: u8 = 0x00;
    pub const INIT: u8 = 0x01;
    pub const SET_CONFIG: u8 = 0x02;
    pub const GET_CONFIG: u8 = 0x03;
    pub const CONN_CREATE: u8 = 0x04;
    pub const CONN_CLOSE: u8 = 0x05;
    pub const CONN_CREDITS_NTF: u8 = 0x06;
    pub const GENERIC_ERROR_NTF: u8 = 0x07;
    pub const INTERFACE_ERROR_NTF: u8 = 0x08;
    pub const SET_POWER_SUB_STATE: u8 = 0x09;
}

/// Opcode Identifier values for GID=RF.
pub mod rf_oid {
    pub const DISCOVER_MAP: u8 = 0x00;
    pub const SET_LISTEN_MODE_ROUTING: u8 = 0x01;
    pub const GET_LISTEN_MODE_ROUTING: u8 = 0x02;
    pub const DISCOVER: u8 = 0x03;
    pub const DISCOVER_SELECT: u8 = 0x04;
    pub const INTF_ACTIVATED_NTF: u8 = 0x05;
    pub const DEACTIVATE: u8 = 0x06;
    pub const FIELD_INFO_NTF: u8 = 0x07;
}

/// Opcode Identifier values for GID=NFCEE.
pub mod nfcee_oid {
    pub const DISCOVER: u8 = 0x00;
    pub const MODE_SET: u8 = 0x01;
}

/// Opcode Identifier values for GID=PROP (BCM2079x vendor extensions).
pub mod prop_oid {
    pub const GET_BUILD_INFO: u8 = 0x15;
    pub const GET_PATCH_VERSION: u8 = 0x19;
}

/// Status codes, NCI Table 110.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0x00,
    Rejected = 0x01,
    RfFrameCorrupted = 0x02,
    Failed = 0x03,
    NotInitialized = 0x04,
    SyntaxError = 0x05,
    SemanticError = 0x06,
    InvalidParam = 0x09,
    MessageSizeExceeded = 0x0a,
}

/// RF protocol identifiers, NCI Table 94.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfProtocol {
    Undetermined = 0x0,
    T1t = 0x1,
    T2t = 0x2,
    T3t = 0x3,
    IsoDep = 0x4,
    NfcDep = 0x5,
}

/// RF technology and mode, NCI Table 95.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TechMode {
    NfcAPassivePoll = 0x00,
    NfcBPassivePoll = 0x01,
    NfcFPassivePoll = 0x02,
    NfcAPassiveListen = 0x80,
    NfcBPassiveListen = 0x81,
    NfcFPassiveListen = 0x82,
}

impl TechMode {
    pub fn is_listen(self) -> bool {
        (self as u8) & 0x80 != 0
    }
}

/// RF Interface values, NCI Table 97.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfInterface {
    Nfcee = 0x0,
    Frame = 0x1,
    IsoDep = 0x2,
    NfcDep = 0x3,
}

/// RF deactivation types, NCI Table 101.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivationType {
    IdleMode = 0x0,
    SleepMode = 0x1,
    SleepAfMode = 0x2,
    Discovery = 0x3,
}

impl DeactivationType {
    pub fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0x0 => DeactivationType::IdleMode,
            0x1 => DeactivationType::SleepMode,
            0x2 => DeactivationType::SleepAfMode,
            0x3 => DeactivationType::Discovery,
            _ => {
                return Err(EmulatorError::wire_format(format!(
                    "bad RF_DEACTIVATE type {b}"
                )))
            }
        })
    }
}

/// Decoded NCI header plus the payload slice that follows it.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub mt: MsgType,
    pub pbf: Pbf,
    /// GID for control packets; unused (but still decoded) for data packets.
    pub gid: u8,
    /// OID for control packets; connection id for data packets.
    pub oid_or_connid: u8,
    pub payload_len: u8,
}

pub const HEADER_LEN: usize = 3;

/// Encode a control (Command/Response/Notification) packet header + payload.
pub fn encode_control(mt: MsgType, gid: u8, oid: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > u8::MAX as usize {
        return Err(EmulatorError::wire_format("NCI payload too long"));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    let byte0 = ((mt as u8) << 5) | (gid & 0x0f);
    out.push(byte0);
    out.push(oid & 0x3f);
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Encode a Data packet header + payload.
pub fn encode_data(pbf: Pbf, conn_id: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > u8::MAX as usize {
        return Err(EmulatorError::wire_format("NCI payload too long"));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    let byte0 = ((MsgType::Data as u8) << 5) | ((pbf as u8) << 4);
    out.push(byte0);
    out.push(conn_id & 0x0f);
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode a header from the front of `bytes`, returning the header and the
/// remaining payload slice.
pub fn decode(bytes: &[u8]) -> Result<(Header, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(EmulatorError::wire_format("NCI packet shorter than header"));
    }
    let mt = MsgType::from_bits((bytes[0] >> 5) & 0x07)?;
    let pbf = if (bytes[0] >> 4) & 0x01 == 0 {
        Pbf::CompleteOrFinal
    } else {
        Pbf::NotComplete
    };
    let gid = bytes[0] & 0x0f;
    let oid_or_connid = bytes[1] & 0x3f;
    let payload_len = bytes[2];
    let header = Header { mt, pbf, gid, oid_or_connid, payload_len };
    let payload_end = HEADER_LEN + payload_len as usize;
    if bytes.len() < payload_end {
        return Err(EmulatorError::wire_format("NCI payload shorter than declared length"));
    }
    Ok((header, &bytes[HEADER_LEN..payload_end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_reset_response_matches_scenario_a() {
        let payload = [0x00u8, 0x10, 0x01];
        let bytes = encode_control(MsgType::Response, gid::CORE, core_oid::RESET, &payload).unwrap();
        assert_eq!(bytes, vec![0x40, 0x00, 0x03, 0x00, 0x10, 0x01]);
    }

    #[test]
    fn decode_roundtrips_encode() {
        let payload = vec![1, 2, 3, 4];
        let bytes = encode_control(MsgType::Command, gid::RF, rf_oid::DISCOVER, &payload).unwrap();
        let (hdr, body) = decode(&bytes).unwrap();
        assert_eq!(hdr.mt, MsgType::Command);
        assert_eq!(hdr.gid, gid::RF);
        assert_eq!(hdr.oid_or_connid, rf_oid::DISCOVER);
        assert_eq!(body, &payload[..]);
    }

    #[test]
    fn short_buffer_is_wire_format_error() {
        assert!(decode(&[0x40, 0x00]).is_err());
    }
}
