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

//! LLCP data-link state machine and per-PDU-type dispatch. A data link is
//! identified by `(local_sap, remote_sap)`: inbound PDUs address us via
//! `dsap` (our local SAP) and name the sender via `ssap` (their SAP); the
//! key is taken directly from those two fields.

use std::collections::VecDeque;

use crate::error::{EmulatorError, Result};
use crate::packets::llcp::{self, PType};

/// The SNEP server listens on this well-known SAP, matching the original
/// emulator's `LLCP_SAP_SNEP`.
pub const SAP_SNEP: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone)]
pub struct DataLink {
    pub status: Status,
    pub v_s: u8,
    pub v_sa: u8,
    pub v_r: u8,
    pub v_ra: u8,
    pub miu: u16,
    pub rw_l: u8,
    pub rw_r: u8,
    /// PDUs queued locally while `Connecting`, flushed to the RE's global
    /// xmit queue once the peer's CC arrives.
    pub pending: VecDeque<Vec<u8>>,
    /// The last fully received Information-PDU payload, for SAPs with no
    /// registered service handler.
    pub rbuf: Vec<u8>,
}

impl Default for DataLink {
    fn default() -> Self {
        DataLink {
            status: Status::Disconnected,
            v_s: 0,
            v_sa: 0,
            v_r: 0,
            v_ra: 0,
            miu: llcp::DEFAULT_MIU,
            rw_l: 1,
            rw_r: 1,
            pending: VecDeque::new(),
            rbuf: Vec::new(),
        }
    }
}

/// What the caller (the RE engine) should do after dispatching one PDU.
pub enum Action {
    /// Nothing to send.
    None,
    /// Send this PDU back to the host immediately, following the same
    /// send-or-enqueue rule as everything else leaving the RE.
    Reply(Vec<u8>),
    /// The data link's own pending queue should be appended to the RE's
    /// global xmit queue (on CC received while Connecting).
    FlushPending(VecDeque<Vec<u8>>),
}

/// One step of the LLCP data-link state machine for a single PDU addressed
/// to `(local_sap, remote_sap)`. `snep` is invoked for Information PDUs
/// addressed to [`SAP_SNEP`]; any other destination SAP just appends to
/// `dl.rbuf`.
pub fn step(
    dl: &mut DataLink,
    local_sap: u8,
    remote_sap: u8,
    ptype: PType,
    info: &[u8],
    snep: impl FnOnce(&mut DataLink, &[u8]) -> Result<Vec<u8>>,
) -> Result<Action> {
    match ptype {
        PType::Symm => Ok(Action::None),
        PType::Connect => {
            *dl = DataLink::default();
            dl.status = Status::Connected;
            for param in llcp::parse_params(info) {
                apply_param(dl, param);
            }
            let header = llcp::encode_header(remote_sap, PType::Cc, local_sap);
            Ok(Action::Reply(header.to_vec()))
        }
        PType::Cc => {
            if dl.status != Status::Connecting {
                return Ok(Action::None);
            }
            for param in llcp::parse_params(info) {
                apply_param(dl, param);
            }
            dl.status = Status::Connected;
            let flushed = std::mem::take(&mut dl.pending);
            Ok(Action::FlushPending(flushed))
        }
        PType::Disc => {
            dl.status = Status::Disconnected;
            let header = llcp::encode_header(remote_sap, PType::Dm, local_sap);
            Ok(Action::Reply([header.to_vec(), vec![0]].concat()))
        }
        PType::Dm => {
            dl.status = Status::Disconnected;
            Ok(Action::None)
        }
        PType::I => {
            dl.v_r = (dl.v_r + 1) % 16;
            let reply_info = if local_sap == SAP_SNEP {
                let info = if info.len() >= 1 { &info[1..] } else { info };
                Some(snep(dl, info)?)
            } else {
                dl.rbuf = info.to_vec();
                None
            };
            match reply_info {
                Some(reply) if !reply.is_empty() => {
                    let header = llcp::encode_header(remote_sap, PType::I, local_sap);
                    let seq = llcp::encode_sequence(dl.v_s, dl.v_r);
                    dl.v_s = (dl.v_s + 1) % 16;
                    let mut out = header.to_vec();
                    out.push(seq);
                    out.extend_from_slice(&reply);
                    Ok(Action::Reply(out))
                }
                _ => Ok(Action::None),
            }
        }
        PType::Rr | PType::Rnr => {
            if let Some(&nr) = info.first() {
                dl.v_sa = nr & 0x0f;
            }
            Ok(Action::None)
        }
        PType::Frmr => Ok(Action::None),
        PType::Pax | PType::Agf | PType::Ui | PType::Snl => Ok(Action::None),
    }
}

fn apply_param(dl: &mut DataLink, param: llcp::Param) {
    match param {
        llcp::Param::Miux(miux) => dl.miu = 128u16.saturating_sub(miux),
        llcp::Param::Rw(rw) => dl.rw_r = rw,
        _ => {}
    }
}

/// Build an outbound Information PDU carrying `payload`, advancing `v_s`.
pub fn build_information(dl: &mut DataLink, local_sap: u8, remote_sap: u8, payload: &[u8]) -> Vec<u8> {
    let header = llcp::encode_header(local_sap, PType::I, remote_sap);
    let seq = llcp::encode_sequence(dl.v_s, dl.v_r);
    dl.v_s = (dl.v_s + 1) % 16;
    let mut out = header.to_vec();
    out.push(seq);
    out.extend_from_slice(payload);
    out
}

/// Begin an outbound connection: the caller enqueues the returned CONNECT
/// PDU through the RE's normal send path and transitions to `Connecting`.
pub fn build_connect(local_sap: u8, remote_sap: u8, service_name: Option<&str>) -> Vec<u8> {
    let header = llcp::encode_header(local_sap, PType::Connect, remote_sap);
    let mut out = header.to_vec();
    if let Some(sn) = service_name {
        out.push(0x06); // SN
        out.push(sn.len() as u8);
        out.extend_from_slice(sn.as_bytes());
    }
    out
}

pub fn decode_errors_are_wire_format(bytes: &[u8]) -> Result<()> {
    llcp::decode(bytes).map(|_| ()).map_err(|e| EmulatorError::wire_format(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_snep(_dl: &mut DataLink, _info: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    #[test]
    fn inbound_connect_emits_cc_with_swapped_saps() {
        let mut dl = DataLink::default();
        let action = step(&mut dl, 4, 32, PType::Connect, &[], noop_snep).unwrap();
        assert_eq!(dl.status, Status::Connected);
        match action {
            Action::Reply(bytes) => {
                let (hdr, _) = llcp::decode(&bytes).unwrap();
                assert_eq!(hdr.dsap, 32);
                assert_eq!(hdr.ssap, 4);
                assert_eq!(hdr.ptype, PType::Cc);
            }
            _ => panic!("expected a CC reply"),
        }
    }

    #[test]
    fn cc_while_connecting_flushes_pending_queue() {
        let mut dl = DataLink::default();
        dl.status = Status::Connecting;
        dl.pending.push_back(vec![1, 2, 3]);
        let action = step(&mut dl, 32, 4, PType::Cc, &[], noop_snep).unwrap();
        assert_eq!(dl.status, Status::Connected);
        match action {
            Action::FlushPending(q) => assert_eq!(q.len(), 1),
            _ => panic!("expected a flush"),
        }
    }

    #[test]
    fn disc_emits_dm_reason_zero() {
        let mut dl = DataLink::default();
        dl.status = Status::Connected;
        let action = step(&mut dl, 4, 32, PType::Disc, &[], noop_snep).unwrap();
        assert_eq!(dl.status, Status::Disconnected);
        match action {
            Action::Reply(bytes) => {
                let (hdr, body) = llcp::decode(&bytes).unwrap();
                assert_eq!(hdr.ptype, PType::Dm);
                assert_eq!(body, &[0]);
            }
            _ => panic!("expected a DM reply"),
        }
    }

    #[test]
    fn information_pdu_advances_v_r() {
        let mut dl = DataLink::default();
        dl.status = Status::Connected;
        step(&mut dl, 9, 32, PType::I, &[0u8], noop_snep).unwrap();
        assert_eq!(dl.v_r, 1);
    }

    #[test]
    fn rr_stores_v_sa() {
        let mut dl = DataLink::default();
        step(&mut dl, 4, 32, PType::Rr, &[7], noop_snep).unwrap();
        assert_eq!(dl.v_sa, 7);
    }
}
