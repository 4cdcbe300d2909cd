// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! A communication pool for multi-party protocols over HTTP(S).
//!
//! A [`pool::Pool`] gives every party in an N-party protocol a name-addressed
//! handle to every other party: `send`/`recv` a single value, `broadcast` one
//! value to several peers at once, and receive back either a concrete type or
//! the raw structural wire value. Transport is plain or mutually authenticated
//! HTTP, peers are identified by TLS client certificate or by address,
//! and payloads pass through an extensible, type-name-keyed codec so
//! applications can register their own wire formats alongside the bundled
//! ones (arbitrary-precision integers, tuples, n-dimensional arrays, bit
//! sets, and tabular data).

/// The outbound/inbound peer connection handle (component C4).
pub mod client;
/// The extensible, type-name-keyed serialization registry (component C2).
pub mod codec;
/// Pool and TLS configuration, loadable from a TOML file.
pub mod config;
/// The crate's consolidated error type.
pub mod error;
/// Peer identity resolution (certificate or address).
pub mod identity;
/// Message identifiers and the envelope wrapping every value sent on the wire.
pub mod message;
/// The top-level pool composing a server and its client handlers (component C5).
pub mod pool;
/// The listening endpoint a pool's peers post to (component C3).
pub mod server;
/// Mutual TLS setup and certificate-based peer identity (component C6).
pub mod tls;
/// The structural wire value every registered type is encoded into.
pub mod value;
