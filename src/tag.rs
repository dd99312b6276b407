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

//! Tag memory model and tag-native command interpreter for T1T/T2T/T3T/T4T.

use crate::error::{EmulatorError, Result};
use crate::packets::ndef;
use crate::packets::tag::{self as wire, t1t, t2t, t3t, t4t};

pub const T2T_DATA_CAPACITY: usize = 48;
pub const T1T_DATA_CAPACITY: usize = 96;

/// T1T: 8-byte UID block, 96 bytes of data, 16 bytes reserved. RALL serves
/// `HR0, HR1` plus all 120 bytes of "static memory" (UID ++ reserved ++
/// data, matching the original's flat 120-byte static-memory view).
#[derive(Debug, Clone)]
pub struct T1t {
    pub uid: [u8; 8],
    pub data: [u8; T1T_DATA_CAPACITY],
    pub reserved: [u8; 16],
}

impl T1t {
    pub fn new(uid: [u8; 8]) -> Self {
        T1t { uid, data: [0; T1T_DATA_CAPACITY], reserved: [0; 16] }
    }

    /// The 120-byte flat view RALL returns: UID block, then data, then
    /// reserved bytes, in that order.
    fn static_memory(&self) -> [u8; t1t::STATIC_MEMORY_SIZE] {
        let mut out = [0u8; t1t::STATIC_MEMORY_SIZE];
        out[0..8].copy_from_slice(&self.uid);
        out[8..8 + T1T_DATA_CAPACITY].copy_from_slice(&self.data);
        out[8 + T1T_DATA_CAPACITY..].copy_from_slice(&self.reserved);
        out
    }

    pub fn set_ndef(&mut self, msg: &[u8]) -> Result<()> {
        // [CC(4)=E1 10 0E 00] [0x03, len] [ndef...] [0xFE] 0x00...
        let header_len = 4 + 2;
        let trailer_len = 1;
        if msg.len() + header_len + trailer_len > T1T_DATA_CAPACITY || msg.len() > u8::MAX as usize
        {
            return Err(EmulatorError::resource_exhausted("NDEF message too large for T1T"));
        }
        self.data = [0; T1T_DATA_CAPACITY];
        self.data[0..4].copy_from_slice(&[0xe1, 0x10, 0x0e, 0x00]);
        self.data[4] = 0x03;
        self.data[5] = msg.len() as u8;
        self.data[6..6 + msg.len()].copy_from_slice(msg);
        self.data[6 + msg.len()] = 0xfe;
        Ok(())
    }
}

/// T2T: 10-byte internal, 2-byte lock, 4-byte CC, 48-byte data (64 bytes
/// total). CC lives outside the NDEF data area, unlike T1T.
#[derive(Debug, Clone)]
pub struct T2t {
    pub internal: [u8; 10],
    pub lock: [u8; 2],
    pub cc: [u8; 4],
    pub data: [u8; T2T_DATA_CAPACITY],
}

impl T2t {
    pub fn new(internal: [u8; 10], lock: [u8; 2], cc: [u8; 4]) -> Self {
        T2t { internal, lock, cc, data: [0; T2T_DATA_CAPACITY] }
    }

    /// Flat 64-byte view in block order: internal, lock, cc, data.
    fn flat(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[0..10].copy_from_slice(&self.internal);
        out[10..12].copy_from_slice(&self.lock);
        out[12..16].copy_from_slice(&self.cc);
        out[16..16 + T2T_DATA_CAPACITY].copy_from_slice(&self.data);
        out
    }

    pub fn set_ndef(&mut self, msg: &[u8]) -> Result<()> {
        let header_len = 2;
        let trailer_len = 1;
        if msg.len() + header_len + trailer_len > T2T_DATA_CAPACITY || msg.len() > u8::MAX as usize
        {
            return Err(EmulatorError::resource_exhausted("NDEF message too large for T2T"));
        }
        self.data = [0; T2T_DATA_CAPACITY];
        self.data[0] = 0x03;
        self.data[1] = msg.len() as u8;
        self.data[2..2 + msg.len()].copy_from_slice(msg);
        self.data[2 + msg.len()] = 0xfe;
        Ok(())
    }
}

pub const T3T_BLOCK_NUM: usize = 64;

/// T3T: 64 blocks of 16 bytes; block 0 is the management/attribute block
/// (`ver, nbr, nbw, nmaxb[2], unused[4], writef, rwflag, ln[3], cs[2]`),
/// blocks 1..64 hold NDEF data.
#[derive(Debug, Clone)]
pub struct T3t {
    pub blocks: [[u8; t3t::BLOCK_SIZE]; T3T_BLOCK_NUM],
}

impl T3t {
    pub fn new() -> Self {
        let mut blocks = [[0u8; t3t::BLOCK_SIZE]; T3T_BLOCK_NUM];
        blocks[0][0] = 0x10; // ver
        blocks[0][1] = 0x04; // nbr
        blocks[0][2] = 0x04; // nbw
        blocks[0][3..5].copy_from_slice(&(T3T_BLOCK_NUM as u16 - 1).to_be_bytes());
        T3t { blocks }
    }

    /// Copy `msg` into data blocks starting at block 1, update the 3-byte
    /// length field and recompute the checksum over `[ver..cs)`.
    pub fn set_ndef(&mut self, msg: &[u8]) -> Result<()> {
        let capacity = (T3T_BLOCK_NUM - 1) * t3t::BLOCK_SIZE;
        if msg.len() > capacity || msg.len() > 0xff_ffff {
            return Err(EmulatorError::resource_exhausted("NDEF message too large for T3T"));
        }
        for block in self.blocks[1..].iter_mut() {
            *block = [0u8; t3t::BLOCK_SIZE];
        }
        for (i, chunk) in msg.chunks(t3t::BLOCK_SIZE).enumerate() {
            self.blocks[1 + i][..chunk.len()].copy_from_slice(chunk);
        }
        let len = (msg.len() as u32).to_be_bytes();
        self.blocks[0][11..14].copy_from_slice(&len[1..4]);

        let mut sum: u16 = 0;
        for block in &self.blocks[0..1] {
            for &b in &block[0..14] {
                sum = sum.wrapping_add(b as u16);
            }
        }
        let cs = sum.to_be_bytes();
        self.blocks[0][14..16].copy_from_slice(&cs);
        Ok(())
    }
}

pub const T4T_NDEF_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum T4tFile {
    None,
    CcSelected,
    NdefSelected,
}

/// T4T: 15-byte Capability Container plus an NDEF file, and the
/// SELECT/READ-BINARY state machine tracking which file is current.
#[derive(Debug, Clone)]
pub struct T4t {
    pub cc: [u8; 15],
    pub ndef_len: u16,
    pub ndef: [u8; T4T_NDEF_CAPACITY],
    pub current_file: T4tFile,
}

impl T4t {
    pub fn new() -> Self {
        let mut cc = [0u8; 15];
        cc[0..2].copy_from_slice(&15u16.to_be_bytes()); // CCLEN
        cc[2] = 0x20; // mapping version 2.0
        cc[3..5].copy_from_slice(&256u16.to_be_bytes()); // MLe
        cc[5..7].copy_from_slice(&256u16.to_be_bytes()); // MLc
        cc[7..9].copy_from_slice(&t4t::NDEF_FILE_ID);
        cc[9..11].copy_from_slice(&(T4T_NDEF_CAPACITY as u16).to_be_bytes());
        cc[11] = 0x00; // read access granted
        cc[12] = 0xff; // no write access
        T4t { cc, ndef_len: 0, ndef: [0; T4T_NDEF_CAPACITY], current_file: T4tFile::None }
    }

    pub fn set_ndef(&mut self, msg: &[u8]) -> Result<()> {
        if msg.len() + 2 > T4T_NDEF_CAPACITY || msg.len() > u16::MAX as usize {
            return Err(EmulatorError::resource_exhausted("NDEF message too large for T4T"));
        }
        self.ndef = [0; T4T_NDEF_CAPACITY];
        self.ndef[0..2].copy_from_slice(&(msg.len() as u16).to_be_bytes());
        self.ndef[2..2 + msg.len()].copy_from_slice(msg);
        self.ndef_len = 2 + msg.len() as u16;
        Ok(())
    }
}

/// Tagged union of the four supported tag kinds.
#[derive(Debug, Clone)]
pub enum Tag {
    T1t(T1t),
    T2t(T2t),
    T3t(T3t),
    T4t(T4t),
}

impl Tag {
    /// Write an NDEF message into this tag's memory using the framing
    /// appropriate to its kind.
    pub fn set_ndef(&mut self, msg: &[u8]) -> Result<()> {
        match self {
            Tag::T1t(t) => t.set_ndef(msg),
            Tag::T2t(t) => t.set_ndef(msg),
            Tag::T3t(t) => t.set_ndef(msg),
            Tag::T4t(t) => t.set_ndef(msg),
        }
    }
}

/// Result of running one tag-native command: the response bytes to send
/// back and how many of the incoming command bytes were consumed, so the
/// caller can frame multiple APDUs in one data packet (T4T).
pub struct CommandResult {
    pub response: Vec<u8>,
    pub bytes_consumed: usize,
}

/// Dispatch an incoming command to the tag's native command interpreter.
pub fn dispatch(tag: &mut Tag, cmd: &[u8]) -> Result<CommandResult> {
    match tag {
        Tag::T1t(t) => process_t1t(t, cmd),
        Tag::T2t(t) => process_t2t(t, cmd),
        Tag::T3t(t) => process_t3t(t, cmd),
        Tag::T4t(t) => process_t4t(t, cmd),
    }
}

fn process_t1t(tag: &mut T1t, cmd: &[u8]) -> Result<CommandResult> {
    let opcode = *cmd.first().ok_or_else(|| EmulatorError::wire_format("empty T1T command"))?;
    match opcode {
        t1t::RALL => {
            let mut response = Vec::with_capacity(2 + t1t::STATIC_MEMORY_SIZE + 1);
            response.push(t1t::HR0);
            response.push(t1t::HR1);
            response.extend_from_slice(&tag.static_memory());
            response.push(0); // status
            Ok(CommandResult { response, bytes_consumed: cmd.len() })
        }
        t1t::RID => {
            let mut response = vec![t1t::HR0, t1t::HR1];
            response.extend_from_slice(&tag.uid[0..4]);
            response.push(0);
            Ok(CommandResult { response, bytes_consumed: cmd.len() })
        }
        _ => Err(EmulatorError::wire_format(format!("unknown T1T opcode {opcode:#x}"))),
    }
}

fn process_t2t(tag: &mut T2t, cmd: &[u8]) -> Result<CommandResult> {
    if cmd.len() < 2 || cmd[0] != t2t::READ {
        return Err(EmulatorError::wire_format("malformed T2T READ command"));
    }
    let bno = cmd[1] as usize;
    let flat = tag.flat();
    let start = bno * 4;
    let mut response = [0u8; 16];
    for (i, slot) in response.iter_mut().enumerate() {
        if let Some(&b) = flat.get(start + i) {
            *slot = b;
        }
    }
    let mut out = response.to_vec();
    out.push(0); // status
    Ok(CommandResult { response: out, bytes_consumed: 2 })
}

fn process_t3t(tag: &mut T3t, cmd: &[u8]) -> Result<CommandResult> {
    let opcode = *cmd.first().ok_or_else(|| EmulatorError::wire_format("empty T3T command"))?;
    match opcode {
        t3t::CHECK | t3t::UPDATE => {
            // [opcode][idm(8)][nsc][sc(2*nsc)][nbl][blocklist...]
            let mut off = 1usize;
            off += 8; // IDm
            let nsc = *cmd
                .get(off)
                .ok_or_else(|| EmulatorError::wire_format("T3T command truncated at NSC"))?
                as usize;
            off += 1 + nsc * 2; // service-code list: read but not interpreted.
            let nbl = *cmd
                .get(off)
                .ok_or_else(|| EmulatorError::wire_format("T3T command truncated at NBL"))?;
            off += 1;
            let (entries, list_len) = wire::parse_t3t_block_list(nbl, &cmd[off..])?;
            off += list_len;

            let mut response = Vec::new();
            if opcode == t3t::CHECK {
                for entry in &entries {
                    let idx = entry.block_number as usize;
                    if let Some(block) = tag.blocks.get(idx) {
                        response.extend_from_slice(block);
                    } else {
                        response.extend_from_slice(&[0u8; t3t::BLOCK_SIZE]);
                    }
                }
            }
            // T3T UPDATE: parse the block list for validity but treat
            // memory as read-only for now (honour-format only; the source
            // has no T3T write support and a wire-triggered write should
            // not be able to panic the emulator).
            response.push(0); // status
            Ok(CommandResult { response, bytes_consumed: off })
        }
        _ => Err(EmulatorError::wire_format(format!("unknown T3T opcode {opcode:#x}"))),
    }
}

fn process_t4t(tag: &mut T4t, cmd: &[u8]) -> Result<CommandResult> {
    let (apdu, consumed) = t4t::parse_command_apdu(cmd)?;
    let (data, sw) = match apdu.ins {
        t4t::INS_SELECT if apdu.p1 == 0x04 => {
            // SELECT by DF name (application AID): stays in the root state.
            if apdu.data == t4t::NDEF_TAG_APPLICATION_AID {
                (Vec::new(), t4t::SW_OK)
            } else {
                (Vec::new(), t4t::SW_FILE_NOT_FOUND)
            }
        }
        t4t::INS_SELECT if apdu.p1 == 0x00 => {
            if apdu.data == t4t::CC_FILE_ID {
                tag.current_file = T4tFile::CcSelected;
                (Vec::new(), t4t::SW_OK)
            } else if apdu.data == t4t::NDEF_FILE_ID {
                tag.current_file = T4tFile::NdefSelected;
                (Vec::new(), t4t::SW_OK)
            } else {
                (Vec::new(), t4t::SW_FILE_NOT_FOUND)
            }
        }
        t4t::INS_READ_BINARY => {
            let offset = ((apdu.p1 as usize) << 8) | apdu.p2 as usize;
            let source: &[u8] = match tag.current_file {
                T4tFile::CcSelected => &tag.cc,
                T4tFile::NdefSelected => &tag.ndef[..tag.ndef_len as usize],
                T4tFile::None => {
                    return Err(EmulatorError::wrong_state("READ-BINARY with no file selected"))
                }
            };
            let end = (offset + apdu.le).min(source.len());
            let start = offset.min(end);
            (source[start..end].to_vec(), t4t::SW_OK)
        }
        _ => (Vec::new(), t4t::SW_FILE_NOT_FOUND),
    };
    Ok(CommandResult { response: t4t::encode_response_apdu(&data, sw), bytes_consumed: consumed })
}

/// Build an NDEF message carrying a single record, as used by the SNEP PUT
/// flow and the operator console's `nfc snep put`.
pub fn build_single_record_message(
    tnf: ndef::Tnf,
    type_: &[u8],
    payload: &[u8],
    id: Option<&[u8]>,
) -> Result<Vec<u8>> {
    ndef::encode_record(true, true, false, tnf, type_, payload, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t2t_read_block_zero_matches_scenario_d() {
        let mut tag = T2t::new(
            [0x04, 0x82, 0x2f, 0x21, 0x5a, 0x53, 0x28, 0x80, 0xa1, 0x48],
            [0, 0],
            [0xe1, 0x10, 0x12, 0x00],
        );
        let result = process_t2t(&mut tag, &[t2t::READ, 0]).unwrap();
        assert_eq!(result.response.len(), 17);
        assert_eq!(&result.response[0..10], &tag.internal);
        assert_eq!(result.response[16], 0); // trailing status byte
    }

    #[test]
    fn t2t_read_clamps_past_end_of_memory() {
        let mut tag = T2t::new([0; 10], [0; 2], [0; 4]);
        let result = process_t2t(&mut tag, &[t2t::READ, 200]).unwrap();
        assert!(result.response[0..16].iter().all(|&b| b == 0));
    }

    #[test]
    fn t1t_rall_reports_fixed_header_and_status() {
        let mut tag = T1t::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let result = process_t1t(&mut tag, &[t1t::RALL]).unwrap();
        assert_eq!(result.response[0], t1t::HR0);
        assert_eq!(result.response[1], t1t::HR1);
        assert_eq!(*result.response.last().unwrap(), 0);
        assert_eq!(result.response.len(), 2 + t1t::STATIC_MEMORY_SIZE + 1);
    }

    #[test]
    fn t4t_select_then_read_binary_cc() {
        let mut tag = T4t::new();
        let select_cc =
            [0x00, t4t::INS_SELECT, 0x00, 0x0c, 0x02, t4t::CC_FILE_ID[0], t4t::CC_FILE_ID[1]];
        let r = process_t4t(&mut tag, &select_cc).unwrap();
        assert_eq!(&r.response[r.response.len() - 2..], &t4t::SW_OK.to_be_bytes());
        let read = [0x00, t4t::INS_READ_BINARY, 0x00, 0x00, 0x0f];
        let r = process_t4t(&mut tag, &read).unwrap();
        assert_eq!(r.response.len(), 15 + 2);
    }

    #[test]
    fn t3t_check_reads_requested_blocks() {
        let mut tag = T3t::new();
        tag.set_ndef(b"hello").unwrap();
        let mut cmd = vec![t3t::CHECK];
        cmd.extend_from_slice(&[0u8; 8]); // IDm
        cmd.push(1); // nsc
        cmd.extend_from_slice(&[0x0b, 0x09]); // one service code
        cmd.push(1); // nbl
        cmd.extend_from_slice(&[0x80, 0x01]); // short form, block 1
        let result = process_t3t(&mut tag, &cmd).unwrap();
        assert_eq!(result.response.len(), t3t::BLOCK_SIZE + 1);
        assert_eq!(&result.response[0..5], b"hello");
    }
}
