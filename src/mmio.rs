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

//! The external-boundary adaptor's memory-mapped register block: a
//! 4096-byte window a virtual-machine guest would map over the controller,
//! matching the original `goldfish_nfc` device's register layout exactly.

use log::{debug, warn};

use crate::controller::Controller;
use crate::error::{EmulatorError, Result};
use crate::packets::nci::{self, MsgType};

pub const SIZE: usize = 4096;
const BUF_LEN: usize = 384;

mod offset {
    pub const STATUS: usize = 0x000;
    pub const CTRL: usize = 0x001;
    pub const RESERVED0: usize = 0x002;
    pub const RESERVED1: usize = 0x003;
    pub const CMND: usize = 0x004;
    pub const RESP: usize = 0x184;
    pub const NTFN: usize = 0x304;
    pub const DATA: usize = 0x484;
    pub const END: usize = 0x1000;
}

pub mod status_bit {
    pub const INTR: u8 = 0x01;
    pub const NCI_CMD: u8 = 0x02;
    pub const NCI_RSP: u8 = 0x04;
    pub const NCI_NTF: u8 = 0x08;
    pub const NCI_DTA: u8 = 0x10;
    pub const HCI_CMD: u8 = 0x20;
    pub const HCI_RSP: u8 = 0x40;
}

pub mod ctrl_value {
    pub const ACK_INTR: u8 = 0;
    pub const NCI_CMD_SENT: u8 = 1;
    pub const RSP_RCV: u8 = 2;
    pub const NTF_RCV: u8 = 3;
    pub const DTA_RCV: u8 = 4;
    pub const HCI_CMD_SENT: u8 = 5;
}

const SAVE_VERSION: u32 = 1;

/// A `{version, bytes}` snapshot of the register block, for the
/// save/restore contract at the virtual-device boundary.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: u32,
    pub bytes: Vec<u8>,
}

/// The 4096-byte register window. `write`/`read` address it byte-at-a-time,
/// matching the original device's 8-bit I/O port; writing `ctrl` drains the
/// staged command through the NCI or HCI processor synchronously.
pub struct RegisterBlock {
    status: u8,
    ctrl: u8,
    reserved0: u8,
    reserved1: u8,
    cmnd: [u8; BUF_LEN],
    resp: [u8; BUF_LEN],
    ntfn: [u8; BUF_LEN],
    data: [u8; BUF_LEN],
    irq: bool,
}

impl RegisterBlock {
    pub fn new() -> Self {
        RegisterBlock {
            status: 0,
            ctrl: 0,
            reserved0: 0,
            reserved1: 0,
            cmnd: [0; BUF_LEN],
            resp: [0; BUF_LEN],
            ntfn: [0; BUF_LEN],
            data: [0; BUF_LEN],
            irq: false,
        }
    }

    /// Whether the hardware IRQ line is currently asserted.
    pub fn irq_pending(&self) -> bool {
        self.irq
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn read(&self, offset: usize) -> u8 {
        match offset {
            offset::STATUS => self.status,
            offset::CTRL => self.ctrl,
            offset::RESERVED0 => self.reserved0,
            offset::RESERVED1 => self.reserved1,
            o if o < offset::RESP => self.cmnd[o - offset::CMND],
            o if o < offset::NTFN => self.resp[o - offset::RESP],
            o if o < offset::DATA => self.ntfn[o - offset::NTFN],
            o if o < offset::END => self.data.get(o - offset::DATA).copied().unwrap_or(0),
            _ => 0,
        }
    }

    /// Write one byte at `offset`. Writing [`offset::CTRL`] immediately
    /// drains the staged command through `controller` and clears the ctrl
    /// register back to zero, matching `goldfish_nfc_write8`.
    pub fn write(&mut self, offset: usize, value: u8, controller: &mut Controller) {
        match offset {
            offset::STATUS => self.status = value,
            offset::CTRL => {
                self.ctrl = value;
                self.process_ctrl(controller);
                self.ctrl = 0;
            }
            offset::RESERVED0 => self.reserved0 = value,
            offset::RESERVED1 => self.reserved1 = value,
            o if o < offset::RESP => self.cmnd[o - offset::CMND] = value,
            o if o < offset::NTFN => self.resp[o - offset::RESP] = value,
            o if o < offset::DATA => self.ntfn[o - offset::NTFN] = value,
            o if o < offset::END => {
                if let Some(slot) = self.data.get_mut(o - offset::DATA) {
                    *slot = value;
                }
            }
            _ => warn!("mmio: write to reserved offset {offset:#x} ignored"),
        }
    }

    fn raise_irq(&mut self) {
        self.status |= status_bit::INTR;
        self.irq = true;
    }

    fn process_ctrl(&mut self, controller: &mut Controller) {
        use ctrl_value::*;
        match self.ctrl {
            ACK_INTR => {
                self.status &= !status_bit::INTR;
                self.irq = false;
            }
            RSP_RCV => self.status &= !(status_bit::NCI_RSP | status_bit::HCI_RSP),
            NTF_RCV => self.status &= !status_bit::NCI_NTF,
            DTA_RCV => self.status &= !status_bit::NCI_DTA,
            NCI_CMD_SENT => self.process_nci_cmd_sent(controller),
            HCI_CMD_SENT => self.process_hci_cmd_sent(controller),
            other => warn!("mmio: unknown ctrl value {other:#x}"),
        }
    }

    /// Only one response may be staged at a time: a command issued while
    /// `NCI_RSP|HCI_RSP` is still set is silently dropped.
    fn response_slot_busy(&self) -> bool {
        self.status & (status_bit::NCI_RSP | status_bit::HCI_RSP) != 0
    }

    fn process_nci_cmd_sent(&mut self, controller: &mut Controller) {
        if self.response_slot_busy() {
            debug!("mmio: NCI command dropped, previous response still staged");
            return;
        }
        self.status |= status_bit::NCI_CMD;
        self.resp = [0; BUF_LEN];
        let outcome = dispatch_nci(&self.cmnd, controller);
        self.status &= !status_bit::NCI_CMD;
        match outcome {
            Ok((resp, ntf)) => {
                if !resp.is_empty() {
                    self.stage_resp(&resp, status_bit::NCI_RSP);
                }
                if let Some(ntf) = ntf {
                    self.stage_ntfn(&ntf);
                }
            }
            Err(e) => warn!("mmio: NCI command processing failed: {e}"),
        }
    }

    fn process_hci_cmd_sent(&mut self, controller: &mut Controller) {
        if self.response_slot_busy() {
            debug!("mmio: HCI command dropped, previous response still staged");
            return;
        }
        self.status |= status_bit::HCI_CMD;
        self.resp = [0; BUF_LEN];
        let outcome = controller.handle_hci_command(&self.cmnd);
        self.status &= !status_bit::HCI_CMD;
        match outcome {
            Ok(Some(resp)) => self.stage_resp(&resp, status_bit::HCI_RSP),
            Ok(None) => (),
            Err(e) => warn!("mmio: HCI command processing failed: {e}"),
        }
    }

    fn stage_resp(&mut self, bytes: &[u8], bit: u8) {
        let n = bytes.len().min(BUF_LEN);
        self.resp[..n].copy_from_slice(&bytes[..n]);
        self.status |= bit;
        self.raise_irq();
    }

    /// Stage an unsolicited notification produced by the operator console
    /// or an RE's own timer/LLCP activity.
    pub fn stage_notification(&mut self, bytes: &[u8]) {
        self.stage_ntfn(bytes);
    }

    fn stage_ntfn(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(BUF_LEN);
        self.ntfn[..n].copy_from_slice(&bytes[..n]);
        self.status |= status_bit::NCI_NTF;
        self.raise_irq();
    }

    /// Stage an unsolicited data packet (an RE's xmit-timer tick, or the
    /// reply to a console-initiated LLCP/SNEP exchange).
    pub fn stage_data(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(BUF_LEN);
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.status |= status_bit::NCI_DTA;
        self.raise_irq();
    }

    pub fn save(&self) -> Snapshot {
        let mut bytes = vec![0u8; SIZE];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.read(i);
        }
        Snapshot { version: SAVE_VERSION, bytes }
    }

    pub fn load(&mut self, snapshot: &Snapshot) -> Result<()> {
        if snapshot.version != SAVE_VERSION {
            return Err(EmulatorError::wire_format(format!(
                "register block snapshot version {} != {SAVE_VERSION}",
                snapshot.version
            )));
        }
        if snapshot.bytes.len() != SIZE {
            return Err(EmulatorError::wire_format("register block snapshot has wrong length"));
        }
        *self = RegisterBlock::new();
        for (i, &b) in snapshot.bytes.iter().enumerate() {
            match i {
                offset::STATUS => self.status = b,
                offset::CTRL => self.ctrl = b,
                offset::RESERVED0 => self.reserved0 = b,
                offset::RESERVED1 => self.reserved1 = b,
                o if o < offset::RESP => self.cmnd[o - offset::CMND] = b,
                o if o < offset::NTFN => self.resp[o - offset::RESP] = b,
                o if o < offset::DATA => self.ntfn[o - offset::NTFN] = b,
                o if o < offset::END => {
                    if let Some(slot) = self.data.get_mut(o - offset::DATA) {
                        *slot = b;
                    }
                }
                _ => (),
            }
        }
        self.irq = self.status & status_bit::INTR != 0;
        Ok(())
    }
}

impl Default for RegisterBlock {
    fn default() -> Self {
        RegisterBlock::new()
    }
}

/// Dispatch one staged command buffer to the NCI processor, routing by
/// message type the way `nfc_process_nci_msg` does: both Data and Command
/// packets land their reply in the `resp` register, never `data`.
fn dispatch_nci(cmnd: &[u8], controller: &mut Controller) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
    let (header, _) = nci::decode(cmnd)?;
    match header.mt {
        MsgType::Data => {
            let reply = controller.handle_data(cmnd)?;
            Ok((reply.unwrap_or_default(), None))
        }
        MsgType::Command => controller.handle_command(cmnd),
        _ => Ok((Vec::new(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::nci::{core_oid, gid};

    fn write_cmnd(reg: &mut RegisterBlock, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            reg.write(offset::CMND + i, b, &mut Controller::new());
        }
    }

    #[test]
    fn core_reset_via_register_block_matches_scenario_a() {
        let mut reg = RegisterBlock::new();
        let mut controller = Controller::new();
        let cmd = nci::encode_control(MsgType::Command, gid::CORE, core_oid::RESET, &[1]).unwrap();
        for (i, &b) in cmd.iter().enumerate() {
            reg.write(offset::CMND + i, b, &mut controller);
        }
        reg.write(offset::CTRL, ctrl_value::NCI_CMD_SENT, &mut controller);

        assert!(reg.status() & status_bit::NCI_RSP != 0);
        assert!(reg.status() & status_bit::INTR != 0);
        assert!(reg.irq_pending());
        let resp: Vec<u8> = (0..6).map(|i| reg.read(offset::RESP + i)).collect();
        assert_eq!(resp, vec![0x40, 0x00, 0x03, 0x00, 0x10, 0x01]);

        reg.write(offset::CTRL, ctrl_value::ACK_INTR, &mut controller);
        assert!(!reg.irq_pending());
        assert_eq!(reg.status() & status_bit::INTR, 0);
    }

    #[test]
    fn command_dropped_while_response_still_staged() {
        let mut reg = RegisterBlock::new();
        let mut controller = Controller::new();
        let cmd = nci::encode_control(MsgType::Command, gid::CORE, core_oid::RESET, &[0]).unwrap();
        write_cmnd(&mut reg, &cmd);
        reg.write(offset::CTRL, ctrl_value::NCI_CMD_SENT, &mut controller);
        assert!(reg.status() & status_bit::NCI_RSP != 0);

        // Overwrite cmnd with CORE_INIT, but the previous response is still
        // staged: this command must be silently dropped.
        let init_cmd = nci::encode_control(MsgType::Command, gid::CORE, core_oid::INIT, &[]).unwrap();
        write_cmnd(&mut reg, &init_cmd);
        reg.write(offset::CTRL, ctrl_value::NCI_CMD_SENT, &mut controller);
        assert_eq!(controller.state, crate::controller::FsmState::Reset);
    }

    #[test]
    fn save_and_load_roundtrips() {
        let mut reg = RegisterBlock::new();
        let mut controller = Controller::new();
        let cmd = nci::encode_control(MsgType::Command, gid::CORE, core_oid::RESET, &[0]).unwrap();
        write_cmnd(&mut reg, &cmd);
        reg.write(offset::CTRL, ctrl_value::NCI_CMD_SENT, &mut controller);

        let snap = reg.save();
        let mut reg2 = RegisterBlock::new();
        reg2.load(&snap).unwrap();
        assert_eq!(reg2.status(), reg.status());
        for i in 0..SIZE {
            assert_eq!(reg2.read(i), reg.read(i));
        }
    }

    #[test]
    fn load_rejects_version_mismatch() {
        let mut reg = RegisterBlock::new();
        let bad = Snapshot { version: 99, bytes: vec![0; SIZE] };
        assert!(reg.load(&bad).is_err());
    }
}
