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

//! BCM2079x vendor HCI transport: a secondary control channel used for
//! sleep-mode commands, layered independently of the NCI control plane.

use crate::error::{EmulatorError, Result};

pub const SERVICE_BCM2079X: u8 = 0x27;

pub mod message_type {
    pub const CMD: u8 = 0x00;
    pub const ANS: u8 = 0x40;
    pub const EVT: u8 = 0x80;
    pub const RFU: u8 = 0xc0;
}

pub mod command {
    pub const EVT_CMD_COMPLETE: u8 = 0x0e;
    pub const WRITE_SLEEP_MODE: u8 = 0x3c;
}

pub const STATUS_OK: u8 = 0;

/// `{service, cmd, len, payload[]}`.
#[derive(Debug, Clone)]
pub struct Packet {
    pub service: u8,
    pub cmd: u8,
    pub payload: Vec<u8>,
}

pub fn decode(bytes: &[u8]) -> Result<Packet> {
    if bytes.len() < 3 {
        return Err(EmulatorError::wire_format("HCI packet shorter than header"));
    }
    let len = bytes[2] as usize;
    if bytes.len() < 3 + len {
        return Err(EmulatorError::wire_format("HCI payload shorter than declared length"));
    }
    Ok(Packet { service: bytes[0], cmd: bytes[1], payload: bytes[3..3 + len].to_vec() })
}

/// Build an `EVT_CMD_COMPLETE` answer for `cmd` on `service`.
///
/// The original BCM2079x emulator sets `npackets` to the write-sleep-mode
/// command id (0x3c) instead of 1; this is a known deviation from real
/// device behavior that is preserved here bug-for-bug (see the design
/// notes on why a fix is deferred).
pub fn create_evt_cmd_complete(service: u8, cmd: u8, status: u8) -> Vec<u8> {
    vec![
        message_type::EVT | command::EVT_CMD_COMPLETE,
        4, // l: npackets+service+cmd+status
        command::WRITE_SLEEP_MODE,
        service,
        cmd,
        status,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_write_sleep_mode() {
        let bytes = [SERVICE_BCM2079X, command::WRITE_SLEEP_MODE, 2, 0x00, 0x01];
        let pkt = decode(&bytes).unwrap();
        assert_eq!(pkt.service, SERVICE_BCM2079X);
        assert_eq!(pkt.payload, vec![0x00, 0x01]);
    }

    #[test]
    fn cmd_complete_preserves_known_npackets_deviation() {
        let rsp = create_evt_cmd_complete(SERVICE_BCM2079X, command::WRITE_SLEEP_MODE, STATUS_OK);
        assert_eq!(rsp[2], command::WRITE_SLEEP_MODE);
    }
}
