//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: madb-core — a client-side Android Debug Bridge wire protocol implementation.
//

//! External collaborator interfaces (spec §6). The core consumes these but
//! never implements them: key/certificate storage, platform address
//! resolution, and mDNS discovery are all caller concerns. Compare
//! `KeyBackend` in the teacher's `backends/traits.rs`, which plays the same
//! pluggable-seam role for hardware signing backends.

/// Supplies the signing identity the core authenticates with. The core's
/// own `KeyPair` (C2) is used directly by `ConnectionManager` rather than
/// through this trait; callers backing credentials with their own storage
/// (a keychain, a hardware token) implement it on their own wrapper type.
pub trait Credentials: Send + Sync {
    /// PKCS#8 PEM-encoded RSA private key.
    fn private_key_pem(&self) -> &str;
    /// DER-encoded self-signed X.509 certificate used for TLS client auth.
    fn certificate_der(&self) -> &[u8];
    /// Human-readable identity sent in the ADB public key blob suffix.
    fn device_name(&self) -> &str;
}

/// Resolves the host to dial when a caller doesn't supply one explicitly.
/// The core's own default, used when no resolver is wired up, is
/// `127.0.0.1` (spec §6).
pub trait AddressResolver: Send + Sync {
    fn resolve(&self) -> String {
        "127.0.0.1".to_string()
    }
}

/// Yields `(host, port)` candidates for the ADB and pairing services,
/// typically backed by mDNS/NSD on the platform side. The core never calls
/// this itself; it exists purely as a documented seam for callers that
/// want to wire wireless-debugging discovery into their own connect loop.
pub trait MdnsDiscovery: Send + Sync {
    fn discover_adb(&self) -> Vec<(String, u16)>;
    fn discover_pairing(&self) -> Vec<(String, u16)>;
}
