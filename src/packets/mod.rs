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

//! Wire codecs: bit-packed header encode/decode for every protocol layer
//! this emulator terminates. Each submodule is self-contained and
//! endianness-explicit at every multi-byte field.

pub mod hci;
pub mod llcp;
pub mod ndef;
pub mod nci;
pub mod snep;
pub mod tag;
