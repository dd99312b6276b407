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

//! Implementation of the NFCC: the per-state command tables, RF-state
//! transitions, configuration store, and notification builders that sit on
//! top of the remote-endpoint engine.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::error::{EmulatorError, Result};
use crate::packets::nci::{
    self, core_oid, gid, nfcee_oid, prop_oid, rf_oid, DeactivationType, MsgType, RfInterface,
    RfProtocol, Status, TechMode,
};
use crate::packets::hci;
use crate::re::RemoteEndpoint;
use crate::tag::{Tag, T1t, T2t, T3t, T4t};

const NCI_VERSION: u8 = 0x11; // 1.1
const MAX_LOGICAL_CONNECTIONS: usize = 2;
const MAX_ROUTING_TABLE_SIZE: u16 = 512;
const MAX_CONTROL_PACKET_PAYLOAD_SIZE: u8 = 255;
const MAX_DATA_PACKET_PAYLOAD_SIZE: u8 = 255;

/// FSM state, NCI 1.1 §3.2: IDLE accepts only `CORE_RESET`, RESET only
/// `CORE_INIT`, INITIALIZED everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Idle,
    Reset,
    Initialized,
}

/// RF discovery sub-state machine, NCI 1.1 §5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfState {
    Idle,
    Discovery,
    W4AllDiscoveries,
    W4HostSelect,
    PollActive,
    ListenActive,
    ListenSleep,
}

/// `RF_DISCOVER_NTF` notification type, the trailing byte of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverNtfType {
    Last = 0,
    Limit = 1,
    More = 2,
}

/// `(interface_kind, tech_mode)`, immutable once the controller is built.
#[derive(Debug, Clone, Copy)]
pub struct RfTableEntry {
    pub interface: RfInterface,
    pub tech_mode: TechMode,
}

/// BCM2079x vendor config id whose low bit of byte 2 triggers an
/// asynchronous `RF_FIELD_INFO_NTF`. The exact id->name mapping in the
/// original header was not fully recovered from the retrieval pack; this
/// assignment is a documented latitude decision (see DESIGN.md).
pub const CONFIG_ID_BCM2079X_I93_DATARATE: u8 = 0xa5;

/// The opaque 128-byte configuration block, addressed as `id -> (offset,
/// length)`. Ids outside this table are accepted but ignored: `CORE_SET_CONFIG`
/// never fails a parameter, it just has nothing to do with unknown ones.
pub struct ConfigStore {
    bytes: [u8; 128],
    table: HashMap<u8, (usize, usize)>,
}

impl ConfigStore {
    pub fn new() -> Self {
        let ids: &[(u8, usize)] = &[
            (0x00, 1), // TOTAL_DURATION (kept 1-byte here for table simplicity)
            (0x01, 1),
            (0x02, 1),
            (0x18, 1), // PA_BAIL_OUT
            (0x29, 1), // LA_BIT_FRAME_SDD
            (0x31, 1), // LB_SENSB_INFO
            (0x50, 1), // LF_PROTOCOL_TYPE
            (0x80, 1), // FWI
            (CONFIG_ID_BCM2079X_I93_DATARATE, 4),
            (0xb7, 4),
            (0xb9, 4),
            (0xc5, 4),
            (0xca, 4),
            (0xcb, 4),
        ];
        let mut table = HashMap::new();
        let mut offset = 0usize;
        for &(id, len) in ids {
            table.insert(id, (offset, len));
            offset += len;
        }
        assert!(offset <= 128, "config table overflowed the 128-byte block");
        ConfigStore { bytes: [0; 128], table }
    }

    /// Write `value` at `id`'s offset, truncating/zero-padding to the
    /// table's declared length for that id. Unknown ids are ignored.
    pub fn set(&mut self, id: u8, value: &[u8]) {
        if let Some(&(offset, len)) = self.table.get(&id) {
            let n = value.len().min(len);
            self.bytes[offset..offset + n].copy_from_slice(&value[..n]);
            for b in &mut self.bytes[offset + n..offset + len] {
                *b = 0;
            }
        } else {
            debug!("CORE_SET_CONFIG: unknown parameter id {id:#x}, ignoring");
        }
    }

    pub fn get(&self, id: u8) -> Option<&[u8]> {
        self.table.get(&id).map(|&(offset, len)| &self.bytes[offset..offset + len])
    }
}

/// BCM2079x `GET_BUILD_INFO` response, reproduced byte-for-byte from the
/// original emulator's hardcoded blob.
fn bcm2079x_build_info() -> Vec<u8> {
    let mut payload = vec![0u8; 36];
    payload[0] = Status::Ok as u8;
    let date = b"Mar 17 2012:10:54:15";
    payload[1..1 + date.len()].copy_from_slice(date);
    let off = 1 + date.len();
    payload[off..off + 4].copy_from_slice(&[0x03, 0x1b, 0x79, 0x20]);
    payload[off + 4] = 7;
    let chipver = b"2079 1B3";
    payload[off + 5..off + 5 + chipver.len()].copy_from_slice(chipver);
    payload
}

/// BCM2079x `GET_PATCH_VERSION` response, reproduced from the original.
fn bcm2079x_patch_version() -> Vec<u8> {
    let mut payload = Vec::with_capacity(40);
    payload.extend_from_slice(&0x0100u16.to_le_bytes()); // projectid
    payload.push(7); // chipver
    let mut patchinfover = [0u8; 16];
    patchinfover[..8].copy_from_slice(b"2079 1B3");
    payload.extend_from_slice(&patchinfover);
    payload.extend_from_slice(&0x0093u16.to_le_bytes()); // major
    payload.extend_from_slice(&0x009du16.to_le_bytes()); // minor
    payload.extend_from_slice(&256u16.to_le_bytes()); // maxsize
    payload.extend_from_slice(&256u16.to_le_bytes()); // patchmaxsize
    payload.extend_from_slice(&0u16.to_le_bytes()); // lpmsize
    payload.extend_from_slice(&0x1b52u16.to_le_bytes()); // fpmsize
    payload.push(0); // lpmbadcrc
    payload.push(0); // fpmbadcrc
    payload.push(0); // nvmtype = EEPROM
    payload
}

/// State of the NFCC instance: FSM/RF state machines, the fixed RF
/// interface and remote-endpoint tables, and the configuration block.
pub struct Controller {
    pub state: FsmState,
    pub rf_state: RfState,
    pub rf_table: [RfTableEntry; 8],
    pub config: ConfigStore,
    id_counter: u8,
    pub res: Vec<RemoteEndpoint>,
    pub active_re: Option<usize>,
    pub active_rf: Option<usize>,
    logical_connections: [Option<usize>; MAX_LOGICAL_CONNECTIONS],
}

impl Controller {
    /// Create a new NFCC instance with the fixed 8-entry RF interface table
    /// and 6-entry remote-endpoint roster (2 NFC-DEP peers, one tag of each
    /// of T1T/T2T/T3T/T4T).
    pub fn new() -> Controller {
        let rf_table = [
            RfTableEntry { interface: RfInterface::NfcDep, tech_mode: TechMode::NfcAPassivePoll },
            RfTableEntry { interface: RfInterface::NfcDep, tech_mode: TechMode::NfcFPassivePoll },
            RfTableEntry { interface: RfInterface::Frame, tech_mode: TechMode::NfcAPassivePoll },
            RfTableEntry { interface: RfInterface::Frame, tech_mode: TechMode::NfcBPassivePoll },
            RfTableEntry { interface: RfInterface::Frame, tech_mode: TechMode::NfcFPassivePoll },
            RfTableEntry { interface: RfInterface::IsoDep, tech_mode: TechMode::NfcAPassivePoll },
            RfTableEntry { interface: RfInterface::IsoDep, tech_mode: TechMode::NfcBPassivePoll },
            RfTableEntry { interface: RfInterface::IsoDep, tech_mode: TechMode::NfcFPassivePoll },
        ];

        let res = vec![
            RemoteEndpoint::new(
                RfProtocol::NfcDep,
                TechMode::NfcFPassiveListen,
                vec![0xde, 0xad, 0xbe, 0xaf, 0x00],
                [0; 10],
            ),
            RemoteEndpoint::new(
                RfProtocol::NfcDep,
                TechMode::NfcAPassiveListen,
                vec![0xde, 0xad, 0xbe, 0xaf, 0x01],
                [0; 10],
            ),
            RemoteEndpoint::new(
                RfProtocol::T1t,
                TechMode::NfcAPassiveListen,
                vec![0xde, 0xad, 0xbe, 0xaf, 0x02],
                [0; 10],
            )
            .with_tag(Tag::T1t(T1t::new([0xde, 0xad, 0xbe, 0xaf, 0x02, 0x00, 0x00, 0x00]))),
            RemoteEndpoint::new(
                RfProtocol::T2t,
                TechMode::NfcAPassiveListen,
                vec![0xde, 0xad, 0xbe, 0xaf, 0x03],
                [0; 10],
            )
            .with_tag(Tag::T2t(T2t::new(
                [0x04, 0x82, 0x2f, 0x21, 0x5a, 0x53, 0x28, 0x80, 0xa1, 0x48],
                [0, 0],
                [0xe1, 0x10, 0x12, 0x00],
            ))),
            RemoteEndpoint::new(
                RfProtocol::T3t,
                TechMode::NfcFPassiveListen,
                vec![0xde, 0xad, 0xbe, 0xaf, 0x04],
                [0; 10],
            )
            .with_tag(Tag::T3t(T3t::new())),
            RemoteEndpoint::new(
                RfProtocol::IsoDep,
                TechMode::NfcAPassiveListen,
                vec![0xde, 0xad, 0xbe, 0xaf, 0x05],
                [0; 10],
            )
            .with_tag(Tag::T4t(T4t::new())),
        ];

        Controller {
            state: FsmState::Idle,
            rf_state: RfState::Idle,
            rf_table,
            config: ConfigStore::new(),
            id_counter: 0,
            res,
            active_re: None,
            active_rf: None,
            logical_connections: [None; MAX_LOGICAL_CONNECTIONS],
        }
    }

    /// Next free id in `1..=254`, wrapping and never handing out 0 or 255.
    fn next_id(&mut self) -> u8 {
        self.id_counter = (self.id_counter % 254) + 1;
        self.id_counter
    }

    fn rf_transition(&mut self, allowed: &[RfState], next: RfState) -> Result<()> {
        if allowed.iter().any(|&s| s == self.rf_state) {
            self.rf_state = next;
            Ok(())
        } else {
            Err(EmulatorError::InvariantViolation(format!(
                "illegal RF state transition from {:?} to {:?}",
                self.rf_state, next
            )))
        }
    }

    /// Reset the RF side of the controller, as both `CORE_RESET` and
    /// `RF_DEACTIVATE(IdleMode)` do via slightly different callers.
    fn deactivate_to_idle(&mut self) {
        self.active_re = None;
        self.active_rf = None;
        for re in &mut self.res {
            re.clear();
        }
        self.rf_state = RfState::Idle;
    }

    /// Handle one incoming NCI control packet, returning the response
    /// control packet bytes (header included) to send back, plus any
    /// notification that must be emitted alongside it.
    pub fn handle_command(&mut self, bytes: &[u8]) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let (header, payload) =
            nci::decode(bytes).map_err(|e| EmulatorError::wire_format(e.to_string()))?;
        if header.mt != MsgType::Command {
            return Err(EmulatorError::wire_format("expected an NCI command packet"));
        }
        match self.state {
            FsmState::Idle => self.dispatch_idle(header.gid, header.oid_or_connid, payload),
            FsmState::Reset => self.dispatch_reset(header.gid, header.oid_or_connid, payload),
            FsmState::Initialized => {
                self.dispatch_initialized(header.gid, header.oid_or_connid, payload)
            }
        }
    }

    fn respond(gid: u8, oid: u8, payload: Vec<u8>) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        Ok((nci::encode_control(MsgType::Response, gid, oid, &payload)?, None))
    }

    fn semantic_error(gid: u8, oid: u8) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        warn!("command gid={gid:#x} oid={oid:#x} rejected: wrong state");
        Self::respond(gid, oid, vec![Status::SemanticError as u8])
    }

    fn prop_command(&self, oid: u8) -> Option<Result<(Vec<u8>, Option<Vec<u8>>)>> {
        match oid {
            prop_oid::GET_BUILD_INFO => Some(Self::respond(gid::PROP, oid, bcm2079x_build_info())),
            prop_oid::GET_PATCH_VERSION => {
                Some(Self::respond(gid::PROP, oid, bcm2079x_patch_version()))
            }
            _ => None,
        }
    }

    fn dispatch_idle(
        &mut self,
        gid: u8,
        oid: u8,
        payload: &[u8],
    ) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        if gid == gid::PROP {
            if let Some(r) = self.prop_command(oid) {
                return r;
            }
        }
        if gid == gid::CORE && oid == core_oid::RESET {
            return self.core_reset(payload);
        }
        Self::semantic_error(gid, oid)
    }

    fn dispatch_reset(
        &mut self,
        gid: u8,
        oid: u8,
        payload: &[u8],
    ) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        if gid == gid::CORE && oid == core_oid::INIT {
            return self.core_init(payload);
        }
        Self::semantic_error(gid, oid)
    }

    fn dispatch_initialized(
        &mut self,
        gid: u8,
        oid: u8,
        payload: &[u8],
    ) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        if gid == gid::PROP {
            if let Some(r) = self.prop_command(oid) {
                return r;
            }
        }
        match (gid, oid) {
            (gid::CORE, core_oid::RESET) => self.core_reset(payload),
            (gid::CORE, core_oid::SET_CONFIG) => self.core_set_config(payload),
            (gid::CORE, core_oid::GET_CONFIG) => self.core_get_config(payload),
            (gid::CORE, core_oid::SET_POWER_SUB_STATE) => {
                Self::respond(gid::CORE, core_oid::SET_POWER_SUB_STATE, vec![Status::Ok as u8])
            }
            (gid::RF, rf_oid::DISCOVER_MAP) => {
                info!("RF_DISCOVER_MAP accepted");
                Self::respond(gid::RF, rf_oid::DISCOVER_MAP, vec![Status::Ok as u8])
            }
            (gid::RF, rf_oid::DISCOVER) => self.rf_discover(),
            (gid::RF, rf_oid::DISCOVER_SELECT) => self.rf_discover_select(payload),
            (gid::RF, rf_oid::DEACTIVATE) => self.rf_deactivate(payload),
            (gid::NFCEE, nfcee_oid::DISCOVER) => {
                Self::respond(gid::NFCEE, nfcee_oid::DISCOVER, vec![Status::Ok as u8, 0])
            }
            _ => Self::semantic_error(gid, oid),
        }
    }

    fn core_reset(&mut self, payload: &[u8]) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let reset_config = payload.first().copied().unwrap_or(0);
        self.state = FsmState::Reset;
        if reset_config != 0 {
            self.deactivate_to_idle();
        }
        Self::respond(
            gid::CORE,
            core_oid::RESET,
            vec![Status::Ok as u8, NCI_VERSION, reset_config],
        )
    }

    fn core_init(&mut self, _payload: &[u8]) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        self.state = FsmState::Initialized;
        let mut body = vec![Status::Ok as u8];
        body.extend_from_slice(&0u32.to_le_bytes()); // NfccFeatures: all disabled
        body.push(self.rf_table.len() as u8);
        for entry in &self.rf_table {
            body.push(entry.interface as u8);
        }
        body.push(MAX_CONTROL_PACKET_PAYLOAD_SIZE);
        body.push(MAX_LOGICAL_CONNECTIONS as u8);
        body.extend_from_slice(&MAX_ROUTING_TABLE_SIZE.to_le_bytes());
        body.push(MAX_DATA_PACKET_PAYLOAD_SIZE);
        body.push(0); // NUMBER_OF_CREDITS
        body.extend_from_slice(&0u16.to_le_bytes()); // max nfcv rf frame size
        body.push(0); // vendor
        body.extend_from_slice(&0u32.to_le_bytes()); // device
        Self::respond(gid::CORE, core_oid::INIT, body)
    }

    fn core_set_config(&mut self, payload: &[u8]) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        if payload.is_empty() {
            return Self::respond(gid::CORE, core_oid::SET_CONFIG, vec![Status::Ok as u8, 0]);
        }
        let nparams = payload[0];
        let mut off = 1usize;
        let mut field_info_ntf = None;
        for _ in 0..nparams {
            if off + 2 > payload.len() {
                break;
            }
            let id = payload[off];
            let len = payload[off + 1] as usize;
            off += 2;
            let end = (off + len).min(payload.len());
            let value = &payload[off..end];
            if id == CONFIG_ID_BCM2079X_I93_DATARATE && value.len() >= 3 && value[2] & 0x01 != 0 {
                field_info_ntf = Some(self.rf_field_info_ntf());
            }
            self.config.set(id, value);
            off = end;
        }
        let (rsp, _) = Self::respond(gid::CORE, core_oid::SET_CONFIG, vec![Status::Ok as u8, 0])?;
        Ok((rsp, field_info_ntf))
    }

    fn core_get_config(&mut self, payload: &[u8]) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let nparams = payload.first().copied().unwrap_or(0);
        let mut body = vec![Status::Ok as u8, nparams];
        for &id in payload.iter().skip(1).take(nparams as usize) {
            let value = self.config.get(id).unwrap_or(&[]);
            body.push(id);
            body.push(value.len() as u8);
            body.extend_from_slice(value);
        }
        Self::respond(gid::CORE, core_oid::GET_CONFIG, body)
    }

    fn rf_discover(&mut self) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        self.rf_transition(&[RfState::Idle], RfState::Discovery)?;
        Self::respond(gid::RF, rf_oid::DISCOVER, vec![Status::Ok as u8])
    }

    fn rf_discover_select(&mut self, payload: &[u8]) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        if payload.len() < 3 {
            return Self::respond(gid::RF, rf_oid::DISCOVER_SELECT, vec![Status::Rejected as u8]);
        }
        let id = payload[0];
        let rfproto = payload[1];
        let iface = payload[2];
        if id == 0 || id == 0xff {
            return Self::respond(gid::RF, rf_oid::DISCOVER_SELECT, vec![Status::Rejected as u8]);
        }
        let Some(idx) = self.res.iter().position(|re| re.id == id) else {
            return Self::respond(gid::RF, rf_oid::DISCOVER_SELECT, vec![Status::Rejected as u8]);
        };
        if self.res[idx].rfproto as u8 != rfproto {
            return Self::respond(gid::RF, rf_oid::DISCOVER_SELECT, vec![Status::Rejected as u8]);
        }
        let Some(rf_idx) = self.rf_table.iter().position(|e| e.interface as u8 == iface) else {
            return Self::respond(gid::RF, rf_oid::DISCOVER_SELECT, vec![Status::Rejected as u8]);
        };
        self.active_re = Some(idx);
        self.active_rf = Some(rf_idx);
        self.rf_transition(&[RfState::W4HostSelect], RfState::W4HostSelect)?;
        Self::respond(gid::RF, rf_oid::DISCOVER_SELECT, vec![Status::Ok as u8])
    }

    fn rf_deactivate(&mut self, payload: &[u8]) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let ty = DeactivationType::from_u8(*payload.first().unwrap_or(&0))?;
        use RfState::*;
        match ty {
            DeactivationType::IdleMode => {
                self.rf_transition(
                    &[Discovery, W4AllDiscoveries, W4HostSelect, PollActive, ListenActive, ListenSleep],
                    Idle,
                )?;
                self.deactivate_to_idle();
            }
            DeactivationType::SleepMode | DeactivationType::SleepAfMode => {
                if self.rf_state == PollActive {
                    self.rf_transition(&[PollActive], W4HostSelect)?;
                } else {
                    self.rf_transition(&[ListenActive], ListenSleep)?;
                }
            }
            DeactivationType::Discovery => {
                self.rf_transition(&[PollActive, ListenActive], Discovery)?;
            }
        }
        Self::respond(gid::RF, rf_oid::DEACTIVATE, vec![Status::Ok as u8])
    }

    /// `RF_DISCOVER_NTF`: assign the next id to `re_idx` if it has none,
    /// and drive the RF discovery sub-state machine forward.
    pub fn rf_discover_ntf(&mut self, re_idx: usize, ty: DiscoverNtfType) -> Result<Vec<u8>> {
        if self.res[re_idx].id == 0 {
            let id = self.next_id();
            self.res[re_idx].id = id;
        }
        match ty {
            DiscoverNtfType::More => {
                self.rf_transition(&[RfState::Discovery], RfState::W4AllDiscoveries)?;
            }
            DiscoverNtfType::Last | DiscoverNtfType::Limit => {
                self.rf_transition(&[RfState::W4AllDiscoveries], RfState::W4HostSelect)?;
            }
        }
        let re = &self.res[re_idx];
        let mut payload = vec![re.id, re.rfproto as u8, re.tech_mode as u8, 0]; // nparams=0
        payload.push(ty as u8);
        nci::encode_control(MsgType::Notification, gid::RF, rf_oid::DISCOVER, &payload)
    }

    /// `RF_INTF_ACTIVATED_NTF` for `re_idx`, auto-selecting the RF
    /// interface from the RE's RF protocol when `active_rf` is unset.
    pub fn rf_intf_activated_ntf(&mut self, re_idx: usize) -> Result<Vec<u8>> {
        let rf_idx = match self.active_rf {
            Some(i) => i,
            None => {
                let iface = match self.res[re_idx].rfproto {
                    RfProtocol::T1t | RfProtocol::T2t | RfProtocol::T3t => RfInterface::Frame,
                    RfProtocol::IsoDep => RfInterface::IsoDep,
                    RfProtocol::NfcDep => RfInterface::NfcDep,
                    RfProtocol::Undetermined => {
                        return Err(EmulatorError::wire_format(
                            "no RF interface for undetermined protocol",
                        ))
                    }
                };
                self.rf_table
                    .iter()
                    .position(|e| e.interface as u8 == iface as u8)
                    .ok_or_else(|| EmulatorError::wire_format("no matching RF interface"))?
            }
        };
        self.active_rf = Some(rf_idx);
        self.active_re = Some(re_idx);

        let re = &self.res[re_idx];
        let tech_mode = re.tech_mode;
        let next = if tech_mode.is_listen() { RfState::ListenActive } else { RfState::PollActive };
        self.rf_transition(
            &[RfState::Discovery, RfState::W4HostSelect, RfState::ListenSleep],
            next,
        )?;

        let mut payload = vec![
            self.rf_table[rf_idx].interface as u8,
            re.rfproto as u8,
            tech_mode as u8,
            MAX_DATA_PACKET_PAYLOAD_SIZE,
            0xff, // ncredits
            0,    // nparams (tech-specific activation params)
        ];
        // ATR_REQ/RES block: NFCID3(10), DID=BS=BR=0, TO, PP, LLCP tail.
        payload.extend_from_slice(&re.nfcid3);
        payload.extend_from_slice(&[0, 0, 0]); // DID, BS, BR
        payload.push(if tech_mode.is_listen() { 14 } else { 0 }); // TO
        payload.push(0x02); // PP = NFC_DEP_PP_G
        payload.extend_from_slice(&crate::packets::llcp::param_tail());
        payload.push(0); // activation-params length byte

        nci::encode_control(MsgType::Notification, gid::RF, rf_oid::INTF_ACTIVATED_NTF, &payload)
    }

    pub fn rf_field_info_ntf(&self) -> Vec<u8> {
        nci::encode_control(MsgType::Notification, gid::RF, rf_oid::FIELD_INFO_NTF, &[Status::Ok as u8])
            .expect("fixed-size field info notification always encodes")
    }

    /// `CORE_RESET_NTF` sent on controller creation, matching a power-on.
    pub fn core_reset_ntf(&self) -> Vec<u8> {
        nci::encode_control(MsgType::Notification, gid::CORE, core_oid::RESET, &[0, 0])
            .expect("fixed-size reset notification always encodes")
    }

    /// Data-packet path: validate state, dispatch to the active RE, and
    /// wrap any reply in an NCI data header.
    pub fn handle_data(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let (header, payload) =
            nci::decode(bytes).map_err(|e| EmulatorError::wire_format(e.to_string()))?;
        if header.mt != MsgType::Data {
            return Err(EmulatorError::wire_format("expected an NCI data packet"));
        }
        if !matches!(self.rf_state, RfState::PollActive | RfState::ListenActive) {
            warn!("data packet dropped: rf_state={:?}", self.rf_state);
            return Err(EmulatorError::wrong_state("data packet outside an active RF session"));
        }
        let Some(re_idx) = self.active_re else {
            return Err(EmulatorError::wrong_state("no active remote endpoint"));
        };
        let conn_id = header.oid_or_connid;
        let reply = self.res[re_idx].process_data(payload)?;
        match reply {
            Some(reply_payload) if !reply_payload.is_empty() => {
                let wrapped = nci::encode_data(nci::Pbf::CompleteOrFinal, conn_id, &reply_payload)?;
                Ok(Some(wrapped))
            }
            _ => Ok(None),
        }
    }

    /// The vendor HCI transport's only handled command: BCM2079x's
    /// write-sleep-mode. Per the original device, RESET-state traffic on
    /// this channel is unconditionally ignored rather than rejected, since
    /// it arrives from the host and must never be allowed to abort the
    /// emulator.
    pub fn handle_hci_command(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let pkt = hci::decode(bytes)?;
        if self.state == FsmState::Reset {
            debug!("HCI command ignored while in reset state");
            return Ok(None);
        }
        if pkt.service != hci::SERVICE_BCM2079X || pkt.cmd != hci::command::WRITE_SLEEP_MODE {
            debug!("HCI command ignored: service={:#x} cmd={:#x}", pkt.service, pkt.cmd);
            return Ok(None);
        }
        Ok(Some(hci::create_evt_cmd_complete(pkt.service, pkt.cmd, hci::STATUS_OK)))
    }
}

impl Default for Controller {
    fn default() -> Self {
        Controller::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_then_init_matches_scenario_a() {
        let mut c = Controller::new();
        let cmd = nci::encode_control(MsgType::Command, gid::CORE, core_oid::RESET, &[1]).unwrap();
        let (rsp, _) = c.handle_command(&cmd).unwrap();
        assert_eq!(rsp, vec![0x40, 0x00, 0x03, 0x00, 0x10, 0x01]);
        assert_eq!(c.state, FsmState::Reset);
        assert_eq!(c.rf_state, RfState::Idle);

        let cmd = nci::encode_control(MsgType::Command, gid::CORE, core_oid::INIT, &[]).unwrap();
        let (rsp, _) = c.handle_command(&cmd).unwrap();
        let (hdr, body) = nci::decode(&rsp).unwrap();
        assert_eq!(hdr.gid, gid::CORE);
        assert_eq!(hdr.oid_or_connid, core_oid::INIT);
        assert_eq!(body[0], Status::Ok as u8);
        assert_eq!(body[5], 8); // N = 8 RF interfaces
        assert_eq!(c.state, FsmState::Initialized);
    }

    fn init_controller() -> Controller {
        let mut c = Controller::new();
        c.handle_command(
            &nci::encode_control(MsgType::Command, gid::CORE, core_oid::RESET, &[0]).unwrap(),
        )
        .unwrap();
        c.handle_command(&nci::encode_control(MsgType::Command, gid::CORE, core_oid::INIT, &[]).unwrap())
            .unwrap();
        c
    }

    #[test]
    fn discovery_and_activation_matches_scenario_b() {
        let mut c = init_controller();
        let ntf = c.rf_discover_ntf(0, DiscoverNtfType::More).unwrap();
        assert_eq!(ntf[0], 0x61);
        assert_eq!(ntf[1], rf_oid::DISCOVER);
        assert_eq!(c.res[0].id, 1);
        assert_eq!(c.rf_state, RfState::W4AllDiscoveries);

        c.rf_transition(&[RfState::W4AllDiscoveries], RfState::W4HostSelect).unwrap();
        let ntf = c.rf_intf_activated_ntf(0).unwrap();
        assert_eq!(ntf[0], 0x61);
        assert_eq!(ntf[1], rf_oid::INTF_ACTIVATED_NTF);
        assert_eq!(ntf[5], TechMode::NfcFPassiveListen as u8); // actmode=0x82
        assert_eq!(c.rf_state, RfState::ListenActive);
        let tail_start = ntf.len() - 9 - 1;
        assert_eq!(
            &ntf[tail_start..tail_start + 9],
            &[0x46, 0x66, 0x6d, 0x01, 0x01, 0x11, 0x04, 0x01, 0xfa]
        );
    }

    #[test]
    fn rf_deactivate_to_idle_matches_scenario_e() {
        let mut c = init_controller();
        c.rf_discover_ntf(0, DiscoverNtfType::Last).unwrap();
        c.active_re = Some(0);
        c.active_rf = Some(0);
        c.rf_state = RfState::PollActive;
        let cmd = nci::encode_control(MsgType::Command, gid::RF, rf_oid::DEACTIVATE, &[0]).unwrap();
        let (rsp, _) = c.handle_command(&cmd).unwrap();
        let (_, body) = nci::decode(&rsp).unwrap();
        assert_eq!(body[0], Status::Ok as u8);
        assert_eq!(c.rf_state, RfState::Idle);
        assert!(c.active_re.is_none());
        assert!(c.active_rf.is_none());
        assert!(c.res.iter().all(|re| re.id == 0));
    }

    #[test]
    fn t2t_data_packet_matches_scenario_d() {
        let mut c = init_controller();
        c.active_re = Some(3);
        c.active_rf = Some(2);
        c.rf_state = RfState::ListenActive;
        c.res[3].xmit_next = true;
        let data = nci::encode_data(nci::Pbf::CompleteOrFinal, 0, &[0x30, 0x00]).unwrap();
        let reply = c.handle_data(&data).unwrap().unwrap();
        let (hdr, body) = nci::decode(&reply).unwrap();
        assert_eq!(hdr.mt, MsgType::Data);
        assert_eq!(body.len(), 17);
        assert_eq!(*body.last().unwrap(), 0);
    }

    #[test]
    fn hci_write_sleep_mode_answers_with_deviation_preserved() {
        let mut c = init_controller();
        let cmd = [hci::SERVICE_BCM2079X, hci::command::WRITE_SLEEP_MODE, 0];
        let rsp = c.handle_hci_command(&cmd).unwrap().unwrap();
        assert_eq!(rsp[2], hci::command::WRITE_SLEEP_MODE);
    }

    #[test]
    fn hci_command_ignored_while_in_reset_state() {
        let mut c = Controller::new();
        c.handle_command(
            &nci::encode_control(MsgType::Command, gid::CORE, core_oid::RESET, &[1]).unwrap(),
        )
        .unwrap();
        assert_eq!(c.state, FsmState::Reset);
        let cmd = [hci::SERVICE_BCM2079X, hci::command::WRITE_SLEEP_MODE, 0];
        assert!(c.handle_hci_command(&cmd).unwrap().is_none());
    }
}
