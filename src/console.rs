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

//! Line-oriented operator console: `nfc nci ...` / `nfc snep ...` /
//! `nfc llcp ...` commands that let a test harness script discovery,
//! activation, and peer-to-peer traffic without a real RF front end.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;

use crate::controller::{Controller, DiscoverNtfType};
use crate::error::{EmulatorError, Result};
use crate::packets::ndef;

/// Outcome of one console line: the text reply to send back over the
/// console connection, plus any NCI bytes the command caused the
/// controller to emit toward the (simulated) host.
pub struct ConsoleReply {
    pub text: String,
    pub emitted: Vec<Vec<u8>>,
}

impl ConsoleReply {
    fn ok(text: impl Into<String>) -> Self {
        ConsoleReply { text: text.into(), emitted: Vec::new() }
    }

    fn ko(reason: impl std::fmt::Display) -> Self {
        ConsoleReply { text: format!("KO: {reason}\r\n"), emitted: Vec::new() }
    }
}

/// Parse and execute one console line against `controller`. Never returns
/// an `Err`: failures are folded into a `KO:` reply.
pub fn handle_line(line: &str, controller: &mut Controller) -> ConsoleReply {
    let normalized = space_out_brackets(line);
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    match dispatch(&tokens, controller) {
        Ok(reply) => reply,
        Err(e) => ConsoleReply::ko(e),
    }
}

/// `[`/`]` delimit a record group and may appear glued to the adjacent
/// field (`[1` / `foo]`); pad them with spaces so a plain whitespace split
/// sees them as their own tokens.
fn space_out_brackets(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + 8);
    for ch in line.chars() {
        if ch == '[' || ch == ']' {
            out.push(' ');
            out.push(ch);
            out.push(' ');
        } else {
            out.push(ch);
        }
    }
    out
}

fn dispatch(tokens: &[&str], controller: &mut Controller) -> Result<ConsoleReply> {
    match tokens {
        ["nfc", "nci", "rf_discover_ntf", re_idx, ty] => {
            cmd_rf_discover_ntf(controller, re_idx, ty)
        }
        ["nfc", "nci", "rf_intf_activated_ntf"] => {
            cmd_rf_intf_activated_ntf(controller, None, None)
        }
        ["nfc", "nci", "rf_intf_activated_ntf", re_idx] => {
            cmd_rf_intf_activated_ntf(controller, Some(re_idx), None)
        }
        ["nfc", "nci", "rf_intf_activated_ntf", re_idx, rf_idx] => {
            cmd_rf_intf_activated_ntf(controller, Some(re_idx), Some(rf_idx))
        }
        ["nfc", "snep", "put", dsap, ssap, rest @ ..] => {
            cmd_snep_put(controller, dsap, ssap, rest)
        }
        ["nfc", "llcp", "connect", dsap, ssap] => cmd_llcp_connect(controller, dsap, ssap),
        [] => Err(EmulatorError::wire_format("empty command")),
        _ => Err(EmulatorError::wire_format(format!("unknown command '{}'", tokens.join(" ")))),
    }
}

fn parse_index(s: &str, bound: usize) -> Result<usize> {
    let i: usize = s
        .parse()
        .map_err(|_| EmulatorError::wire_format(format!("invalid index '{s}'")))?;
    if i >= bound {
        return Err(EmulatorError::wire_format(format!("index {i} out of range")));
    }
    Ok(i)
}

fn parse_sap(s: &str) -> Result<i32> {
    s.parse().map_err(|_| EmulatorError::wire_format(format!("invalid SAP '{s}'")))
}

fn cmd_rf_discover_ntf(
    controller: &mut Controller,
    re_idx: &str,
    ty: &str,
) -> Result<ConsoleReply> {
    let re_idx = parse_index(re_idx, controller.res.len())?;
    let ty = match ty {
        "0" => DiscoverNtfType::Last,
        "1" => DiscoverNtfType::Limit,
        "2" => DiscoverNtfType::More,
        other => return Err(EmulatorError::wire_format(format!("invalid discover type '{other}'"))),
    };
    let ntf = controller.rf_discover_ntf(re_idx, ty)?;
    Ok(ConsoleReply { text: "OK\r\n".into(), emitted: vec![ntf] })
}

fn cmd_rf_intf_activated_ntf(
    controller: &mut Controller,
    re_idx: Option<&str>,
    rf_idx: Option<&str>,
) -> Result<ConsoleReply> {
    let re_index = match re_idx {
        Some(s) => parse_index(s, controller.res.len())?,
        None => controller.active_re.ok_or(EmulatorError::NoActiveEndpoint)?,
    };
    if let Some(s) = rf_idx {
        controller.active_rf = Some(parse_index(s, controller.rf_table.len())?);
    }
    let ntf = controller.rf_intf_activated_ntf(re_index)?;
    Ok(ConsoleReply { text: "OK\r\n".into(), emitted: vec![ntf] })
}

/// Decode a console base64 field. An empty token decodes to an empty
/// byte string (used for the absent-id case in the scenario (c) example).
fn decode_field(s: &str) -> Result<Vec<u8>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    STANDARD_NO_PAD
        .decode(s)
        .map_err(|e| EmulatorError::wire_format(format!("bad base64 field: {e}")))
}

fn cmd_snep_put(
    controller: &mut Controller,
    dsap: &str,
    ssap: &str,
    rest: &[&str],
) -> Result<ConsoleReply> {
    let re_index = controller.active_re.ok_or(EmulatorError::NoActiveEndpoint)?;
    let dsap_req = parse_sap(dsap)?;
    let ssap_req = parse_sap(ssap)?;
    let re = &controller.res[re_index];
    let local_sap = re.resolve_sap(dsap_req, re.last_dsap)?;
    let remote_sap = re.resolve_sap(ssap_req, re.last_ssap)?;

    if rest.is_empty() {
        let rbuf = controller.res[re_index]
            .data_links
            .get(&(local_sap, remote_sap))
            .map(|dl| dl.rbuf.clone())
            .unwrap_or_default();
        let records = decode_ndef_message(&rbuf)?;
        let json = serde_json::to_string(&records)
            .map_err(|e| EmulatorError::wire_format(e.to_string()))?;
        return Ok(ConsoleReply::ok(format!("{json}\r\n")));
    }

    let groups = parse_record_groups(rest)?;
    if groups.is_empty() || groups.len() > 4 {
        return Err(EmulatorError::wire_format("snep put takes 1 to 4 records"));
    }

    let mut msg = Vec::new();
    let nrecords = groups.len();
    for (i, fields) in groups.iter().enumerate() {
        if fields.len() < 4 || fields.len() > 5 {
            return Err(EmulatorError::wire_format("ndef record takes 4 or 5 fields"));
        }
        let (flags_s, tnf_s, type_b64, payload_b64) = (fields[0], fields[1], fields[2], fields[3]);
        let id_b64 = fields.get(4).copied().unwrap_or("");
        let flags: u8 = flags_s
            .parse()
            .map_err(|_| EmulatorError::wire_format(format!("invalid record flags '{flags_s}'")))?;
        let tnf_raw: u8 = tnf_s
            .parse()
            .map_err(|_| EmulatorError::wire_format(format!("invalid record tnf '{tnf_s}'")))?;
        let type_ = decode_field(type_b64)?;
        let payload = decode_field(payload_b64)?;
        let id = decode_field(id_b64)?;

        let mb = i == 0;
        let me = i == nrecords - 1;
        let cf = flags & 0x20 != 0;
        let id_opt = if id.is_empty() { None } else { Some(id.as_slice()) };
        let tnf = ndef::Tnf::from_u8(tnf_raw);
        let rec = ndef::encode_record(mb, me, cf, tnf, &type_, &payload, id_opt)?;
        msg.extend_from_slice(&rec);
    }

    controller.res[re_index].send_snep_put(local_sap, remote_sap, &msg)?;
    Ok(ConsoleReply::ok("OK\r\n"))
}

/// Group `[field field ...]` brackets into one `Vec<&str>` per record,
/// in the order they appear. The id field is optional; when omitted the
/// group is 4 long instead of 5 (see scenario (c): an empty base64 id
/// vanishes entirely under whitespace splitting rather than surviving as
/// an empty token).
fn parse_record_groups<'a>(tokens: &[&'a str]) -> Result<Vec<Vec<&'a str>>> {
    let mut groups = Vec::new();
    let mut iter = tokens.iter();
    while let Some(&tok) = iter.next() {
        if tok != "[" {
            return Err(EmulatorError::wire_format(format!(
                "expected '[' to start an ndef record, got '{tok}'"
            )));
        }
        let mut fields = Vec::new();
        loop {
            match iter.next() {
                Some(&"]") => break,
                Some(&field) => fields.push(field),
                None => {
                    return Err(EmulatorError::wire_format("unterminated ndef record, missing ']'"))
                }
            }
        }
        groups.push(fields);
    }
    Ok(groups)
}

fn cmd_llcp_connect(controller: &mut Controller, dsap: &str, ssap: &str) -> Result<ConsoleReply> {
    let re_index = controller.active_re.ok_or(EmulatorError::NoActiveEndpoint)?;
    let dsap_req = parse_sap(dsap)?;
    let ssap_req = parse_sap(ssap)?;
    let re = &controller.res[re_index];
    let local_sap = re.resolve_sap(dsap_req, re.last_dsap)?;
    let remote_sap = re.resolve_sap(ssap_req, re.last_ssap)?;
    controller.res[re_index].send_llcp_connect(local_sap, remote_sap);
    Ok(ConsoleReply::ok("OK\r\n"))
}

/// Decode a flat byte buffer as a sequence of back-to-back NDEF records
/// (as SNEP stores them), stopping at the ME record or when exhausted.
fn decode_ndef_message(bytes: &[u8]) -> Result<Vec<ndef::Record>> {
    let mut records = Vec::new();
    let mut off = 0;
    while off < bytes.len() {
        let (record, consumed) = ndef::decode_record(&bytes[off..])
            .map_err(|e| EmulatorError::wire_format(e.to_string()))?;
        let me = record.flags & ndef::ME != 0;
        records.push(record);
        off += consumed;
        if me {
            break;
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::nci::{self, core_oid, gid, MsgType};

    fn active_controller() -> Controller {
        let mut c = Controller::new();
        c.handle_command(
            &nci::encode_control(MsgType::Command, gid::CORE, core_oid::RESET, &[0]).unwrap(),
        )
        .unwrap();
        c.handle_command(&nci::encode_control(MsgType::Command, gid::CORE, core_oid::INIT, &[]).unwrap())
            .unwrap();
        handle_line("nfc nci rf_discover_ntf 0 2", &mut c);
        handle_line("nfc nci rf_intf_activated_ntf 0", &mut c);
        c
    }

    #[test]
    fn rf_discover_ntf_assigns_id_and_emits_notification() {
        let mut c = Controller::new();
        c.handle_command(
            &nci::encode_control(MsgType::Command, gid::CORE, core_oid::RESET, &[0]).unwrap(),
        )
        .unwrap();
        c.handle_command(&nci::encode_control(MsgType::Command, gid::CORE, core_oid::INIT, &[]).unwrap())
            .unwrap();
        let reply = handle_line("nfc nci rf_discover_ntf 0 2", &mut c);
        assert_eq!(reply.text, "OK\r\n");
        assert_eq!(reply.emitted.len(), 1);
        assert_eq!(c.res[0].id, 1);
    }

    #[test]
    fn unknown_command_is_ko() {
        let mut c = Controller::new();
        let reply = handle_line("nfc bogus thing", &mut c);
        assert!(reply.text.starts_with("KO:"));
        assert!(reply.emitted.is_empty());
    }

    #[test]
    fn rf_intf_activated_ntf_without_active_re_is_ko() {
        let mut c = Controller::new();
        let reply = handle_line("nfc nci rf_intf_activated_ntf", &mut c);
        assert!(reply.text.starts_with("KO:"));
    }

    #[test]
    fn snep_put_scenario_c_queues_a_connect() {
        let mut c = active_controller();
        let reply = handle_line("nfc snep put 4 32 [1 1 dGV4dA cGF5bG9hZA ]", &mut c);
        assert_eq!(reply.text, "OK\r\n");
        assert_eq!(c.res[0].data_links.len(), 1);
        let pdu = c.res[0].xmit_q.front().expect("connect queued");
        let (hdr, _) = crate::packets::llcp::decode(pdu).unwrap();
        assert_eq!(hdr.dsap, 4);
        assert_eq!(hdr.ssap, 32);
    }

    #[test]
    fn snep_put_with_no_records_prints_empty_buffer_as_json() {
        let mut c = active_controller();
        let reply = handle_line("nfc snep put 4 32", &mut c);
        assert_eq!(reply.text, "[]\r\n");
    }

    #[test]
    fn llcp_connect_resolves_last_sap_sentinel() {
        let mut c = active_controller();
        handle_line("nfc snep put 4 32 [1 1 dGV4dA cGF5bG9hZA ]", &mut c);
        c.res[0].last_dsap = Some(4);
        c.res[0].last_ssap = Some(32);
        let reply = handle_line("nfc llcp connect -1 -1", &mut c);
        assert_eq!(reply.text, "OK\r\n");
    }
}
