// Copyright 2023 Google LLC
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

//! Beeline is a host-side Bluetooth Low Energy stack that talks to a
//! controller through a raw kernel HCI socket, with no Bluetooth daemon in
//! between.
//!
//! That makes it good for tools that need direct control over scanning,
//! connection establishment, and attribute-protocol traffic: an
//! [adapter](device::Adapter) opens a session on a controller, drives
//! discovery from the socket's event stream, and hands out connection
//! handles; the codec modules cover the binary formats those exchanges
//! are made of, down to the IEEE-11073 values health devices put in their
//! attributes.
//!
//! Everything blocks: one thread drives one discovery or connect call at a
//! time, bounded by caller-supplied timeouts.

#![deny(missing_docs, unsafe_code)]

pub mod adv;

pub mod att;

pub mod codec;

pub mod core;

pub mod device;

pub mod hci;

pub mod ieee11073;

pub mod transport;
