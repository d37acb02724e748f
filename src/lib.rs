//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: madb-core — a client-side Android Debug Bridge wire protocol implementation.
//

//! Client-side implementation of the Android Debug Bridge wire protocol:
//! the binary message codec, the CNXN/AUTH/STLS connection state machine,
//! a multiplexed per-connection stream transport with flow control, and
//! the SPAKE2/TLS pairing handshake used for wireless debugging enrolment.
//!
//! This crate does not run a server side, does not interpret any
//! service-level payload (shell, file-sync), does not schedule reconnects,
//! and does not cache sessions — all caller concerns.

pub mod collaborators;
pub mod connection;
pub mod error;
pub mod keys;
pub mod manager;
pub mod message;
pub mod pairing;
pub mod stream;
pub mod tls;

pub use collaborators::{AddressResolver, Credentials, MdnsDiscovery};
pub use connection::{Connection, ConnectionHandle, ConnectionState};
pub use error::{AdbError, Result};
pub use keys::KeyPair;
pub use manager::{ConnectionManager, ConnectionManagerConfig};
pub use message::{auth_type, Command, Message};
pub use pairing::{PairingResult, PairingPacket};
pub use stream::{Stream, StreamState};
