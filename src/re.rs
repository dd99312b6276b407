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

//! Remote-endpoint engine: the per-peer simulation that owns an RF
//! protocol, the LLCP data-link matrix, xmit scheduling, and the glue to
//! SNEP/NDEF and tag-command dispatch.

use std::collections::{HashMap, VecDeque};

use log::{debug, trace, warn};

use crate::error::{EmulatorError, Result};
use crate::llcp::{self, DataLink};
use crate::packets::llcp::{PType, SAP_COUNT as LLCP_SAP_COUNT};
use crate::packets::nci::{RfProtocol, TechMode};
use crate::snep;
use crate::tag::Tag;

pub const SAP_COUNT: usize = LLCP_SAP_COUNT;
pub const SBUF_CAPACITY: usize = 1024;
pub const RBUF_CAPACITY: usize = 1024;

/// Interval (ms) at which a RE's xmit timer is (re)armed on every received
/// PDU, matching the LLCP link-timeout keep-alive cadence.
pub const XMIT_TIMER_MS: u64 = 2000;

#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    pub rfproto: RfProtocol,
    pub tech_mode: TechMode,
    pub nfcid1: Vec<u8>,
    pub nfcid3: [u8; 10],
    pub tag: Option<Tag>,
    /// 0 means "not yet discovered"; assigned on first RF_DISCOVER_NTF.
    pub id: u8,
    pub data_links: HashMap<(u8, u8), DataLink>,
    pub last_dsap: Option<u8>,
    pub last_ssap: Option<u8>,
    pub xmit_next: bool,
    pub xmit_timer_armed: bool,
    pub xmit_q: VecDeque<Vec<u8>>,
    pub connid: Option<u8>,
    pub sbuf: Vec<u8>,
    pub rbuf: Vec<u8>,
}

impl RemoteEndpoint {
    pub fn new(rfproto: RfProtocol, tech_mode: TechMode, nfcid1: Vec<u8>, nfcid3: [u8; 10]) -> Self {
        RemoteEndpoint {
            rfproto,
            tech_mode,
            nfcid1,
            nfcid3,
            tag: None,
            id: 0,
            data_links: HashMap::new(),
            last_dsap: None,
            last_ssap: None,
            xmit_next: false,
            xmit_timer_armed: false,
            xmit_q: VecDeque::new(),
            connid: None,
            sbuf: Vec::new(),
            rbuf: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Clear on `RF_DEACTIVATE(IdleMode)`: zero the id so the next
    /// discovery cycle re-announces this RE, and drop all link state.
    pub fn clear(&mut self) {
        self.id = 0;
        self.data_links.clear();
        self.last_dsap = None;
        self.last_ssap = None;
        self.xmit_next = false;
        self.xmit_timer_armed = false;
        self.xmit_q.clear();
        self.connid = None;
    }

    /// Single API used by upper layers to emit a PDU: send immediately if
    /// it is our turn, otherwise queue it for the next xmit-timer fire or
    /// the next time the host yields the turn back to us.
    pub fn send_pdu_from_re(&mut self, pdu: Vec<u8>) -> Option<Vec<u8>> {
        if self.xmit_next {
            self.xmit_next = false;
            self.xmit_timer_armed = false;
            Some(pdu)
        } else {
            self.xmit_q.push_back(pdu);
            None
        }
    }

    /// Called whenever a PDU arrives from the host: it becomes our turn to
    /// send, and the xmit timer is (re)armed.
    fn on_host_pdu(&mut self) {
        self.xmit_next = true;
        self.xmit_timer_armed = true;
    }

    /// Timer fire: synthesize the next outbound packet, either the head of
    /// the xmit queue or a SYMM if nothing is queued, and clear the turn.
    pub fn tick(&mut self) -> Vec<u8> {
        self.xmit_timer_armed = false;
        self.xmit_next = false;
        self.xmit_q.pop_front().unwrap_or_else(symm_pdu)
    }

    /// Dispatch one incoming data-packet payload by RF protocol.
    /// Returns the reply payload (if any) to wrap in an NCI
    /// data packet; bytes the protocol handler didn't consume are
    /// appended to `sbuf`.
    pub fn process_data(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        self.on_host_pdu();
        match self.rfproto {
            RfProtocol::NfcDep => self.process_llcp(payload),
            RfProtocol::T1t | RfProtocol::T2t | RfProtocol::T3t | RfProtocol::IsoDep
                if self.tag.is_some() =>
            {
                let tag = self.tag.as_mut().expect("checked above");
                let result = crate::tag::dispatch(tag, payload)?;
                if result.bytes_consumed < payload.len() {
                    self.sbuf.extend_from_slice(&payload[result.bytes_consumed..]);
                }
                Ok(Some(result.response))
            }
            other => {
                warn!("data packet for unsupported RF protocol {other:?}; dropping");
                Ok(None)
            }
        }
    }

    fn process_llcp(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        let (header, info) = crate::packets::llcp::decode(payload)
            .map_err(|e| EmulatorError::wire_format(e.to_string()))?;
        trace!("LLCP {:?} dsap={} ssap={}", header.ptype, header.dsap, header.ssap);

        if header.ptype == PType::Symm {
            return Ok(None);
        }

        self.last_dsap = Some(header.dsap);
        self.last_ssap = Some(header.ssap);

        let key = (header.dsap, header.ssap);
        let mut dl = self.data_links.remove(&key).unwrap_or_default();
        let action = llcp::step(&mut dl, header.dsap, header.ssap, header.ptype, info, |dl, frame| {
            snep::handle(dl, frame)
        })?;
        self.data_links.insert(key, dl);

        match action {
            llcp::Action::None => Ok(None),
            llcp::Action::Reply(pdu) => Ok(self.send_pdu_from_re(pdu)),
            llcp::Action::FlushPending(mut queue) => {
                self.xmit_q.append(&mut queue);
                Ok(None)
            }
        }
    }

    /// Resolve `-1` sentinels used by the operator console to mean "the
    /// last observed DSAP/SSAP for this RE".
    pub fn resolve_sap(&self, requested: i32, last: Option<u8>) -> Result<u8> {
        if requested >= 0 {
            return Ok(requested as u8);
        }
        last.ok_or(EmulatorError::NoActiveEndpoint)
    }

    /// `nfc_re_send_llcp_connect` / `send_snep_over_llcp`: route a PUT
    /// through the data link's current status, connecting first if
    /// necessary.
    pub fn send_snep_put(&mut self, local_sap: u8, remote_sap: u8, ndef_msg: &[u8]) -> Result<()> {
        let frame = snep::build_put_request(ndef_msg);
        let key = (remote_sap, local_sap);
        let status = self.data_links.get(&key).map(|dl| dl.status).unwrap_or(llcp::Status::Disconnected);

        match status {
            llcp::Status::Disconnected => {
                let dl = self.data_links.entry(key).or_insert_with(DataLink::default);
                dl.status = llcp::Status::Connecting;
                let pdu = llcp::build_information(dl, local_sap, remote_sap, &frame);
                dl.pending.push_back(pdu);
                let connect = llcp::build_connect(local_sap, remote_sap, Some("urn:nfc:sn:snep"));
                debug!("RE connecting SNEP data link ({local_sap},{remote_sap})");
                if let Some(out) = self.send_pdu_from_re(connect) {
                    self.xmit_q.push_front(out);
                }
                Ok(())
            }
            llcp::Status::Connecting => {
                let dl = self.data_links.get_mut(&key).expect("just checked");
                let pdu = llcp::build_information(dl, local_sap, remote_sap, &frame);
                dl.pending.push_back(pdu);
                Ok(())
            }
            llcp::Status::Connected => {
                let dl = self.data_links.get_mut(&key).expect("just checked");
                let pdu = llcp::build_information(dl, local_sap, remote_sap, &frame);
                if let Some(out) = self.send_pdu_from_re(pdu) {
                    self.xmit_q.push_front(out);
                }
                Ok(())
            }
            llcp::Status::Disconnecting => {
                Err(EmulatorError::wrong_state("data link is disconnecting"))
            }
        }
    }

    /// `nfc_re_send_llcp_connect`: open a data link toward the host with no
    /// payload queued on it, as the bare `nfc llcp connect` console command
    /// does. A no-op if the link is already connecting or connected.
    pub fn send_llcp_connect(&mut self, local_sap: u8, remote_sap: u8) {
        let key = (remote_sap, local_sap);
        let dl = self.data_links.entry(key).or_insert_with(DataLink::default);
        if dl.status != llcp::Status::Disconnected {
            return;
        }
        dl.status = llcp::Status::Connecting;
        let connect = llcp::build_connect(local_sap, remote_sap, None);
        debug!("RE opening LLCP data link ({local_sap},{remote_sap}) via console command");
        if let Some(out) = self.send_pdu_from_re(connect) {
            self.xmit_q.push_front(out);
        }
    }
}

fn symm_pdu() -> Vec<u8> {
    crate::packets::llcp::encode_header(0, PType::Symm, 0).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep_re() -> RemoteEndpoint {
        RemoteEndpoint::new(
            RfProtocol::NfcDep,
            TechMode::NfcFPassiveListen,
            vec![0xde, 0xad, 0xbe, 0xaf, 0x00],
            [0; 10],
        )
    }

    #[test]
    fn clear_zeroes_id_and_drops_links() {
        let mut re = dep_re();
        re.id = 7;
        re.data_links.insert((4, 32), DataLink::default());
        re.clear();
        assert_eq!(re.id, 0);
        assert!(re.data_links.is_empty());
    }

    #[test]
    fn immediate_send_clears_turn() {
        let mut re = dep_re();
        re.xmit_next = true;
        let sent = re.send_pdu_from_re(vec![1, 2, 3]);
        assert_eq!(sent, Some(vec![1, 2, 3]));
        assert!(!re.xmit_next);
    }

    #[test]
    fn deferred_send_enqueues() {
        let mut re = dep_re();
        re.xmit_next = false;
        let sent = re.send_pdu_from_re(vec![9]);
        assert_eq!(sent, None);
        assert_eq!(re.xmit_q.len(), 1);
    }

    #[test]
    fn tick_emits_symm_when_queue_empty() {
        let mut re = dep_re();
        let pdu = re.tick();
        let (hdr, _) = crate::packets::llcp::decode(&pdu).unwrap();
        assert_eq!(hdr.ptype, PType::Symm);
    }

    #[test]
    fn process_llcp_connect_replies_cc() {
        let mut re = dep_re();
        let connect = crate::packets::llcp::encode_header(4, PType::Connect, 32);
        re.xmit_next = true;
        let reply = re.process_data(&connect).unwrap().unwrap();
        let (hdr, _) = crate::packets::llcp::decode(&reply).unwrap();
        assert_eq!(hdr.ptype, PType::Cc);
    }
}
