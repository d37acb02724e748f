//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: madb-core — a client-side Android Debug Bridge wire protocol implementation.
//

//! Unified error hierarchy for the ADB client core.

use thiserror::Error;

/// Top-level error type for all ADB client operations.
#[derive(Error, Debug)]
pub enum AdbError {
    /// Underlying socket read/write failure. The connection transitions to CLOSED.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message validation failed, or an illegal command arrived in the current state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer issued a second AUTH token while fail-fast authentication is enabled.
    #[error("authentication rejected by peer")]
    AuthRejected,

    /// TLS handshake signalled a missing-trust condition while fail-fast is enabled.
    #[error("pairing required before this connection can proceed")]
    PairingRequired,

    /// The destination refused the stream (peer replied with CLSE to an OPEN).
    #[error("peer refused to open stream: {0}")]
    OpenRejected(String),

    /// Attempted I/O on a stream that has already transitioned to CLOSED.
    #[error("stream closed")]
    StreamClosed,

    /// The connect deadline elapsed before the handshake completed.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Pairing failed at some sub-phase; the pairing connection has been closed.
    #[error("pairing failed: {0}")]
    PairingFailed(String),

    /// A cryptographic operation (signing, key parsing, key generation) failed.
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// A TLS-layer error outside the handshake-result cases above.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl AdbError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        AdbError::Protocol(msg.into())
    }

    pub fn pairing_failed(msg: impl Into<String>) -> Self {
        AdbError::PairingFailed(msg.into())
    }
}

impl From<rsa::Error> for AdbError {
    fn from(e: rsa::Error) -> Self {
        AdbError::Crypto(e.to_string())
    }
}

impl From<rustls::Error> for AdbError {
    fn from(e: rustls::Error) -> Self {
        AdbError::Tls(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AdbError>;
