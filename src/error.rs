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

//! Error kinds shared across the protocol stack.
//!
//! Only [`EmulatorError::InvariantViolation`] is meant to end a process:
//! every other variant is produced from host/network-controlled input and
//! must be turned into a protocol-level status code by its caller, never
//! propagated as a panic.

use thiserror::Error;

/// Result alias used throughout the protocol layers.
pub type Result<T> = std::result::Result<T, EmulatorError>;

#[derive(Error, Debug)]
pub enum EmulatorError {
    /// A buffer could not be decoded: length mismatch, reserved value,
    /// unknown PType/OID/command id.
    #[error("wire format error: {0}")]
    WireFormat(String),

    /// A command arrived in a controller or data-link state that does not
    /// permit it.
    #[error("wrong state: {0}")]
    WrongState(String),

    /// A console command requires an active remote endpoint but none is
    /// set.
    #[error("no active endpoint")]
    NoActiveEndpoint,

    /// A queue or buffer allocation failed (e.g. SNEP payload exceeds the
    /// data-link reassembly capacity).
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An impossible transition was attempted; this is a programming bug,
    /// not a recoverable condition. Callers that can prove unreachability
    /// should use this in a `panic!`/`unreachable!`, not propagate it.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl EmulatorError {
    pub fn wire_format(msg: impl Into<String>) -> Self {
        EmulatorError::WireFormat(msg.into())
    }

    pub fn wrong_state(msg: impl Into<String>) -> Self {
        EmulatorError::WrongState(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        EmulatorError::ResourceExhausted(msg.into())
    }
}
