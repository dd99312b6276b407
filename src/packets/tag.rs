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

//! Tag-native command/response wire encodings for T1T/T2T/T3T/T4T.

use crate::error::{EmulatorError, Result};

pub mod t1t {
    pub const RALL: u8 = 0x00;
    pub const RID: u8 = 0x78;
    pub const HR0: u8 = 0x11;
    pub const HR1: u8 = 0x00;
    pub const STATIC_MEMORY_SIZE: usize = 120;
}

pub mod t2t {
    pub const READ: u8 = 0x30;
}

pub mod t3t {
    pub const CHECK: u8 = 0x06;
    pub const UPDATE: u8 = 0x08;
    pub const BLOCK_SIZE: usize = 16;
}

/// T3T block-list entry: 2 bytes if the high bit of the first byte is set
/// (access-mode + block number in 1 byte), 3 bytes otherwise (access-mode +
/// 2-byte block number).
#[derive(Debug, Clone, Copy)]
pub struct T3tBlockListEntry {
    pub block_number: u16,
}

/// Parse a T3T block list: `nbl` entries of variable width.
pub fn parse_t3t_block_list(nbl: u8, bytes: &[u8]) -> Result<(Vec<T3tBlockListEntry>, usize)> {
    let mut out = Vec::with_capacity(nbl as usize);
    let mut off = 0usize;
    for _ in 0..nbl {
        let b0 = *bytes
            .get(off)
            .ok_or_else(|| EmulatorError::wire_format("T3T block list truncated"))?;
        let long_form = b0 & 0x80 == 0;
        if long_form {
            let b1 = *bytes
                .get(off + 1)
                .ok_or_else(|| EmulatorError::wire_format("T3T block list truncated"))?;
            let b2 = *bytes
                .get(off + 2)
                .ok_or_else(|| EmulatorError::wire_format("T3T block list truncated"))?;
            out.push(T3tBlockListEntry { block_number: u16::from_be_bytes([b1, b2]) });
            off += 3;
        } else {
            let b1 = *bytes
                .get(off + 1)
                .ok_or_else(|| EmulatorError::wire_format("T3T block list truncated"))?;
            out.push(T3tBlockListEntry { block_number: b1 as u16 });
            off += 2;
        }
    }
    Ok((out, off))
}

pub mod t4t {
    use crate::error::{EmulatorError, Result};

    /// `SELECT` by DF name (application AID), used to pick the NDEF Tag
    /// application.
    pub const NDEF_TAG_APPLICATION_AID: [u8; 7] = [0xd2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];
    /// File id of the Capability Container.
    pub const CC_FILE_ID: [u8; 2] = [0xe1, 0x03];
    /// File id of the NDEF data file.
    pub const NDEF_FILE_ID: [u8; 2] = [0xe1, 0x04];

    pub const INS_SELECT: u8 = 0xa4;
    pub const INS_READ_BINARY: u8 = 0xb0;

    pub const SW_OK: u16 = 0x9000;
    pub const SW_FILE_NOT_FOUND: u16 = 0x6a82;

    /// Minimal ISO 7816-4 command APDU: `CLA INS P1 P2 [Lc Data] [Le]`.
    #[derive(Debug, Clone)]
    pub struct CommandApdu {
        pub cla: u8,
        pub ins: u8,
        pub p1: u8,
        pub p2: u8,
        pub data: Vec<u8>,
        pub le: usize,
    }

    /// Parse the short (non-extended) APDU forms used by T4T.
    pub fn parse_command_apdu(bytes: &[u8]) -> Result<(CommandApdu, usize)> {
        if bytes.len() < 4 {
            return Err(EmulatorError::wire_format("APDU shorter than header"));
        }
        let (cla, ins, p1, p2) = (bytes[0], bytes[1], bytes[2], bytes[3]);
        if bytes.len() == 4 {
            return Ok((CommandApdu { cla, ins, p1, p2, data: Vec::new(), le: 0 }, 4));
        }
        let lc_or_le = bytes[4] as usize;
        if bytes.len() == 5 {
            // case 2: Le only.
            let le = if lc_or_le == 0 { 256 } else { lc_or_le };
            return Ok((CommandApdu { cla, ins, p1, p2, data: Vec::new(), le }, 5));
        }
        // case 3/4: Lc present, data follows, optional trailing Le.
        let data_end = 5 + lc_or_le;
        let data = bytes
            .get(5..data_end)
            .ok_or_else(|| EmulatorError::wire_format("APDU truncated in data field"))?
            .to_vec();
        let (le, consumed) = match bytes.get(data_end) {
            Some(&b) => (if b == 0 { 256 } else { b as usize }, data_end + 1),
            None => (0, data_end),
        };
        Ok((CommandApdu { cla, ins, p1, p2, data, le }, consumed))
    }

    pub fn encode_response_apdu(data: &[u8], sw: u16) -> Vec<u8> {
        let mut out = data.to_vec();
        out.extend_from_slice(&sw.to_be_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t3t_short_form_block_list() {
        let (entries, consumed) = parse_t3t_block_list(1, &[0x80, 0x03]).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(entries[0].block_number, 3);
    }

    #[test]
    fn t3t_long_form_block_list() {
        let (entries, consumed) = parse_t3t_block_list(1, &[0x00, 0x01, 0x02]).unwrap();
        assert_eq!(consumed, 3);
        assert_eq!(entries[0].block_number, 0x0102);
    }

    #[test]
    fn t4t_select_cc_parses() {
        let bytes = [0x00, t4t::INS_SELECT, 0x00, 0x0c, 0x02, 0xe1, 0x03];
        let (apdu, consumed) = t4t::parse_command_apdu(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(apdu.data, t4t::CC_FILE_ID);
    }

    #[test]
    fn t4t_read_binary_case2_parses_le() {
        let bytes = [0x00, t4t::INS_READ_BINARY, 0x00, 0x00, 0x0f];
        let (apdu, consumed) = t4t::parse_command_apdu(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(apdu.le, 15);
    }
}
