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

//! A software emulation of a Broadcom BCM2079x-class NFC controller: the
//! NCI/HCI control plane, the RF discovery and activation state machines,
//! LLCP+SNEP peer-to-peer stacks, and T1T/T2T/T3T/T4T tag command
//! interpreters, all reachable through a 4096-byte memory-mapped register
//! block or a line-oriented operator console.

pub mod console;
pub mod controller;
pub mod error;
pub mod llcp;
pub mod mmio;
pub mod packets;
pub mod re;
pub mod snep;
pub mod tag;
