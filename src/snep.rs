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

//! SNEP request/response layer riding over an LLCP data link.

use crate::error::Result;
use crate::llcp::DataLink;
use crate::packets::snep::{self, MsgCode};

/// Reassembly capacity for a PUT payload landing in `dl.rbuf`.
pub const RBUF_CAPACITY: usize = 512;

/// Handle one SNEP message received on the data link's Information PDU
/// info field. Returns the reply payload to wrap in an outbound I-PDU (may
/// be empty, meaning "no reply").
pub fn handle(dl: &mut DataLink, frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < snep::HEADER_LEN {
        return Ok(snep::encode_empty_response(MsgCode::RspBadRequest));
    }
    let header = match snep::decode_header(frame) {
        Ok(h) => h,
        Err(_) => return Ok(snep::encode_empty_response(MsgCode::RspBadRequest)),
    };
    let snep_len = header.len as usize;

    if header.len as u64 > u32::MAX as u64 - snep::HEADER_LEN as u64
        || snep_len + snep::HEADER_LEN != frame.len()
    {
        return Ok(snep::encode_empty_response(MsgCode::RspExcessData));
    }

    if !snep::version_is_supported(header.major, header.minor) {
        return Ok(snep::encode_empty_response(MsgCode::RspUnsupportedVersion));
    }

    match header.msg {
        Some(MsgCode::ReqPut) => {
            if snep_len > RBUF_CAPACITY {
                return Ok(snep::encode_empty_response(MsgCode::RspExcessData));
            }
            dl.rbuf = frame[snep::HEADER_LEN..].to_vec();
            Ok(snep::encode_empty_response(MsgCode::RspSuccess))
        }
        Some(MsgCode::RspSuccess) => Ok(Vec::new()),
        _ => Ok(snep::encode_empty_response(MsgCode::RspNotImplemented)),
    }
}

/// Build a PUT request frame carrying `info` (a complete NDEF message).
pub fn build_put_request(info: &[u8]) -> Vec<u8> {
    let mut out = snep::encode_header(
        snep::VERSION_MAJOR,
        snep::VERSION_MINOR,
        MsgCode::ReqPut,
        info.len() as u32,
    )
    .to_vec();
    out.extend_from_slice(info);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_within_capacity_succeeds_and_fills_rbuf() {
        let mut dl = DataLink::default();
        let frame = build_put_request(b"hello");
        let reply = handle(&mut dl, &frame).unwrap();
        let hdr = snep::decode_header(&reply).unwrap();
        assert_eq!(hdr.msg, Some(MsgCode::RspSuccess));
        assert_eq!(dl.rbuf, b"hello");
    }

    #[test]
    fn oversized_put_is_excess_data_and_does_not_touch_rbuf() {
        let mut dl = DataLink::default();
        dl.rbuf = b"untouched".to_vec();
        let payload = vec![0u8; RBUF_CAPACITY + 1];
        let frame = build_put_request(&payload);
        let reply = handle(&mut dl, &frame).unwrap();
        let hdr = snep::decode_header(&reply).unwrap();
        assert_eq!(hdr.msg, Some(MsgCode::RspExcessData));
        assert_eq!(hdr.len, 0);
        assert_eq!(dl.rbuf, b"untouched");
    }

    #[test]
    fn rsp_success_has_no_reply() {
        let mut dl = DataLink::default();
        let frame = snep::encode_empty_response(MsgCode::RspSuccess);
        let reply = handle(&mut dl, &frame).unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn too_short_frame_is_bad_request() {
        let mut dl = DataLink::default();
        let reply = handle(&mut dl, &[1, 2]).unwrap();
        let hdr = snep::decode_header(&reply).unwrap();
        assert_eq!(hdr.msg, Some(MsgCode::RspBadRequest));
    }
}
