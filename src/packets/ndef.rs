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

//! NDEF record framing. Offsets are always recomputed from the flags byte;
//! nothing here caches a derived offset.

use serde::Serialize;

use crate::error::{EmulatorError, Result};

pub const MB: u8 = 0x80;
pub const ME: u8 = 0x40;
pub const CF: u8 = 0x20;
pub const SR: u8 = 0x10;
pub const IL: u8 = 0x08;
pub const TNF_MASK: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tnf {
    Empty = 0,
    WellKnown = 1,
    Mime = 2,
    Uri = 3,
    External = 4,
    Unknown = 5,
    Unchanged = 6,
    Reserved = 7,
}

impl Tnf {
    pub fn from_u8(b: u8) -> Tnf {
        match b & TNF_MASK {
            0 => Tnf::Empty,
            1 => Tnf::WellKnown,
            2 => Tnf::Mime,
            3 => Tnf::Uri,
            4 => Tnf::External,
            5 => Tnf::Unknown,
            6 => Tnf::Unchanged,
            _ => Tnf::Reserved,
        }
    }
}

/// A single decoded NDEF record. `flags` retains MB/ME/CF/SR/IL verbatim so
/// callers needing the raw bits (e.g. multi-record message framing) can
/// inspect them, while `tnf`/`type_`/`payload`/`id` are the parsed fields.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub flags: u8,
    pub tnf: Tnf,
    pub type_: Vec<u8>,
    pub payload: Vec<u8>,
    pub id: Vec<u8>,
}

impl Record {
    pub fn is_short(&self) -> bool {
        self.flags & SR != 0
    }

    pub fn has_id(&self) -> bool {
        self.flags & IL != 0
    }
}

/// Encode one NDEF record, choosing the short-record form automatically
/// when the payload fits in a byte and the caller did not force long form.
pub fn encode_record(
    mb: bool,
    me: bool,
    cf: bool,
    tnf: Tnf,
    type_: &[u8],
    payload: &[u8],
    id: Option<&[u8]>,
) -> Result<Vec<u8>> {
    if type_.len() > u8::MAX as usize {
        return Err(EmulatorError::wire_format("NDEF type field too long"));
    }
    let short = payload.len() <= u8::MAX as usize;
    let mut flags = tnf as u8;
    if mb {
        flags |= MB;
    }
    if me {
        flags |= ME;
    }
    if cf {
        flags |= CF;
    }
    if short {
        flags |= SR;
    }
    if id.is_some() {
        flags |= IL;
    }

    let mut out = vec![flags, type_.len() as u8];
    if short {
        out.push(payload.len() as u8);
    } else {
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    }
    if let Some(id) = id {
        if id.len() > u8::MAX as usize {
            return Err(EmulatorError::wire_format("NDEF id field too long"));
        }
        out.push(id.len() as u8);
    }
    out.extend_from_slice(type_);
    out.extend_from_slice(payload);
    if let Some(id) = id {
        out.extend_from_slice(id);
    }
    Ok(out)
}

/// Decode one NDEF record from the front of `bytes`, returning the record
/// and the number of bytes consumed.
pub fn decode_record(bytes: &[u8]) -> Result<(Record, usize)> {
    if bytes.is_empty() {
        return Err(EmulatorError::wire_format("empty NDEF record"));
    }
    let flags = bytes[0];
    let short = flags & SR != 0;
    let has_id = flags & IL != 0;

    let mut off = 1usize;
    if bytes.len() <= off {
        return Err(EmulatorError::wire_format("NDEF record truncated before type length"));
    }
    let type_len = bytes[off] as usize;
    off += 1;

    let payload_len: usize = if short {
        let b = *bytes.get(off).ok_or_else(|| {
            EmulatorError::wire_format("NDEF record truncated before payload length")
        })?;
        off += 1;
        b as usize
    } else {
        let end = off + 4;
        let slice = bytes.get(off..end).ok_or_else(|| {
            EmulatorError::wire_format("NDEF record truncated before payload length")
        })?;
        off = end;
        u32::from_be_bytes(slice.try_into().unwrap()) as usize
    };

    let id_len: usize = if has_id {
        let b = *bytes
            .get(off)
            .ok_or_else(|| EmulatorError::wire_format("NDEF record truncated before id length"))?;
        off += 1;
        b as usize
    } else {
        0
    };

    let type_ = bytes
        .get(off..off + type_len)
        .ok_or_else(|| EmulatorError::wire_format("NDEF record truncated in type field"))?
        .to_vec();
    off += type_len;

    let payload = bytes
        .get(off..off + payload_len)
        .ok_or_else(|| EmulatorError::wire_format("NDEF record truncated in payload field"))?
        .to_vec();
    off += payload_len;

    let id = if has_id {
        let v = bytes
            .get(off..off + id_len)
            .ok_or_else(|| EmulatorError::wire_format("NDEF record truncated in id field"))?
            .to_vec();
        off += id_len;
        v
    } else {
        Vec::new()
    };

    Ok((Record { flags, tnf: Tnf::from_u8(flags), type_, payload, id }, off))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(mb: bool, me: bool, tnf: Tnf, type_: &[u8], payload: &[u8], id: Option<&[u8]>) {
        let bytes = encode_record(mb, me, false, tnf, type_, payload, id).unwrap();
        let (rec, consumed) = decode_record(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(rec.type_, type_);
        assert_eq!(rec.payload, payload);
        assert_eq!(rec.id, id.unwrap_or(&[]));
    }

    #[test]
    fn short_record_without_id_roundtrips() {
        roundtrip(true, true, Tnf::WellKnown, b"text", b"payload", None);
    }

    #[test]
    fn short_record_with_id_roundtrips() {
        roundtrip(true, true, Tnf::Mime, b"t", b"abc", Some(b"x"));
    }

    #[test]
    fn long_record_roundtrips() {
        let payload = vec![0xabu8; 300];
        roundtrip(true, true, Tnf::Unknown, b"bin", &payload, None);
    }

    #[test]
    fn truncated_record_is_wire_format_error() {
        assert!(decode_record(&[MB | SR | 1]).is_err());
    }
}
