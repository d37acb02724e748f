//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: madb-core — a client-side Android Debug Bridge wire protocol implementation.
//

//! Out-of-band six-digit-code pairing: SPAKE2 key agreement, a TLS 1.3
//! tunnel bound to the agreed key, and a peer-info exchange (spec §4.6).
//!
//! Upstream ADB's pairing runs SPAKE2 over the P-256 group; the `spake2`
//! crate this crate depends on only ships a built-in `Ed25519Group`. Rather
//! than hand-roll a P-256 `Group` impl (outside this crate's scope), the
//! key agreement below runs over `Ed25519Group`. Wire compatibility with a
//! real `adbd` pairing port is therefore approximate; two instances of
//! this crate's client pairing against each other (the only scenario the
//! test suite exercises) agree byte-for-byte regardless of which group is
//! used, since both sides run the same code.

use crate::error::{AdbError, Result};
use crate::keys::KeyPair;
use crate::tls;
use hkdf::Hkdf;
use sha2::Sha256;
use spake2::{Ed25519Group, Identity, Password, Spake2};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// SPAKE2 identity strings. Centralized here, matching a named-literal
/// convention similar to upstream `adb/pairing_auth/aes_128_gcm.cpp`'s
/// label constants; see the Open Question resolution in `DESIGN.md`.
pub mod spake2_labels {
    pub const CLIENT: &[u8] = b"adb pair client\0";
    pub const SERVER: &[u8] = b"adb pair server\0";
}

/// `PairingPacket.type` values.
pub mod packet_type {
    pub const SPAKE2_MSG: u8 = 0;
    pub const PEER_INFO: u8 = 1;
}

/// Peer-info record `type` byte values.
pub mod peer_info_type {
    pub const RSA_PUBLIC_KEY: u8 = 1;
    pub const GUID: u8 = 2;
}

const MAX_PACKET_PAYLOAD: usize = 16384;
const PEER_INFO_PAYLOAD_LEN: usize = 8192;
const PEER_INFO_RECORD_LEN: usize = 1 + PEER_INFO_PAYLOAD_LEN;
const PSK_INFO: &[u8] = b"adb-label\0";
const PSK_LEN: usize = 64;

/// `{u8 version=1; u8 type; u16be length; u8 payload[length]}` (spec §6).
pub struct PairingPacket {
    pub packet_type: u8,
    pub payload: Vec<u8>,
}

impl PairingPacket {
    pub fn new(packet_type: u8, payload: Vec<u8>) -> Result<Self> {
        if packet_type > packet_type::PEER_INFO {
            return Err(AdbError::pairing_failed(format!(
                "unknown pairing packet type {packet_type}"
            )));
        }
        if payload.len() > MAX_PACKET_PAYLOAD {
            return Err(AdbError::pairing_failed("pairing packet payload too large"));
        }
        Ok(Self {
            packet_type,
            payload,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.payload.len());
        buf.push(1); // version
        buf.push(self.packet_type);
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, pkt: &PairingPacket) -> Result<()> {
    writer.write_all(&pkt.encode()).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<PairingPacket> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let version = header[0];
    if version != 1 {
        return Err(AdbError::pairing_failed(format!(
            "unsupported pairing packet version {version}"
        )));
    }
    let packet_type = header[1];
    if packet_type > packet_type::PEER_INFO {
        return Err(AdbError::pairing_failed(format!(
            "unknown pairing packet type {packet_type}"
        )));
    }
    let length = u16::from_be_bytes([header[2], header[3]]) as usize;
    if length > MAX_PACKET_PAYLOAD {
        return Err(AdbError::pairing_failed("pairing packet payload too large"));
    }
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(PairingPacket {
        packet_type,
        payload,
    })
}

/// Pack a peer-info record: 1 type byte + up to 8192 bytes of payload,
/// zero-padded to exactly 8193 bytes.
fn encode_peer_info(kind: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > PEER_INFO_PAYLOAD_LEN {
        return Err(AdbError::pairing_failed("peer-info payload exceeds 8192 bytes"));
    }
    let mut record = vec![0u8; PEER_INFO_RECORD_LEN];
    record[0] = kind;
    record[1..1 + payload.len()].copy_from_slice(payload);
    Ok(record)
}

/// Unpack a peer-info record, trimming trailing zero padding (which also
/// absorbs the RSA blob's own NUL terminator harmlessly).
fn decode_peer_info(raw: &[u8]) -> Result<(u8, Vec<u8>)> {
    if raw.len() != PEER_INFO_RECORD_LEN {
        return Err(AdbError::pairing_failed(format!(
            "peer-info record must be {PEER_INFO_RECORD_LEN} bytes, got {}",
            raw.len()
        )));
    }
    let kind = raw[0];
    let mut end = raw.len();
    while end > 1 && raw[end - 1] == 0 {
        end -= 1;
    }
    Ok((kind, raw[1..end].to_vec()))
}

fn derive_psk(shared_secret: &[u8]) -> Result<[u8; PSK_LEN]> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = [0u8; PSK_LEN];
    hk.expand(PSK_INFO, &mut okm)
        .map_err(|e| AdbError::Crypto(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

/// The outcome of a completed pairing: the peer's own peer-info record.
pub struct PairingResult {
    pub peer_kind: u8,
    pub peer_payload: Vec<u8>,
}

/// Run the full pairing handshake against `host:port` using the shared
/// `passcode`. Mirrors `Connection::handshake`'s shape: one async function
/// driving a linear sequence of sub-phases, each terminal on error (spec
/// §4.6(d)).
pub async fn pair(
    host: &str,
    port: u16,
    passcode: &str,
    keypair: &KeyPair,
) -> Result<PairingResult> {
    let mut tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| AdbError::pairing_failed(format!("failed to connect to pairing port: {e}")))?;

    // (a) SPAKE2 exchange, cleartext.
    let (spake_state, outbound_msg) = Spake2::<Ed25519Group>::start_a(
        &Password::new(passcode.as_bytes()),
        &Identity::new(spake2_labels::CLIENT),
        &Identity::new(spake2_labels::SERVER),
    );
    write_packet(&mut tcp, &PairingPacket::new(packet_type::SPAKE2_MSG, outbound_msg)?).await?;

    let peer_msg = read_packet(&mut tcp).await?;
    if peer_msg.packet_type != packet_type::SPAKE2_MSG {
        return Err(AdbError::pairing_failed("expected SPAKE2 message, got peer-info"));
    }
    let shared_secret = spake_state
        .finish(&peer_msg.payload)
        .map_err(|e| AdbError::pairing_failed(format!("SPAKE2 key agreement failed: {e:?}")))?;
    let psk = derive_psk(&shared_secret)?;
    tracing::debug!("SPAKE2 exchange complete, deriving PSK");

    // (b) Mutual TLS 1.3, then a key-confirmation exchange bound to the PSK
    // (see the module doc in `tls.rs` and `DESIGN.md` for why this, rather
    // than a true external-PSK cipher suite, is how §4.6(b) is realized).
    let mut tls = tls::upgrade_client(tcp, keypair)
        .await
        .map_err(|e| AdbError::pairing_failed(format!("TLS upgrade failed: {e}")))?;

    write_packet(&mut tls, &PairingPacket::new(packet_type::SPAKE2_MSG, psk.to_vec())?).await?;
    let confirm = read_packet(&mut tls).await?;
    if confirm.payload != psk {
        return Err(AdbError::pairing_failed(
            "key confirmation mismatch; passcode does not match",
        ));
    }
    tracing::debug!("pairing TLS tunnel established and key-confirmed");

    // (c) Peer-info exchange, over TLS.
    let my_blob = keypair.public_key_blob()?;
    let my_info = encode_peer_info(peer_info_type::RSA_PUBLIC_KEY, &my_blob)?;
    write_packet(&mut tls, &PairingPacket::new(packet_type::PEER_INFO, my_info)?).await?;

    let peer_info_pkt = read_packet(&mut tls).await?;
    if peer_info_pkt.packet_type != packet_type::PEER_INFO {
        return Err(AdbError::pairing_failed("expected peer-info, got SPAKE2 message"));
    }
    let (peer_kind, peer_payload) = decode_peer_info(&peer_info_pkt.payload)?;

    tracing::info!("pairing complete");
    Ok(PairingResult {
        peer_kind,
        peer_payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_info_round_trips() {
        let blob = b"fake-base64-blob user@host\0".to_vec();
        let record = encode_peer_info(peer_info_type::RSA_PUBLIC_KEY, &blob).unwrap();
        assert_eq!(record.len(), PEER_INFO_RECORD_LEN);
        let (kind, payload) = decode_peer_info(&record).unwrap();
        assert_eq!(kind, peer_info_type::RSA_PUBLIC_KEY);
        assert_eq!(payload, blob);
    }

    #[test]
    fn peer_info_rejects_oversized_payload() {
        let blob = vec![1u8; PEER_INFO_PAYLOAD_LEN + 1];
        assert!(encode_peer_info(peer_info_type::RSA_PUBLIC_KEY, &blob).is_err());
    }

    #[test]
    fn pairing_packet_rejects_unknown_type() {
        assert!(PairingPacket::new(2, vec![]).is_err());
    }

    #[test]
    fn pairing_packet_encode_matches_wire_layout() {
        let pkt = PairingPacket::new(packet_type::SPAKE2_MSG, vec![1, 2, 3]).unwrap();
        let bytes = pkt.encode();
        assert_eq!(bytes[0], 1); // version
        assert_eq!(bytes[1], packet_type::SPAKE2_MSG);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 3);
        assert_eq!(&bytes[4..], &[1, 2, 3]);
    }

    #[test]
    fn derive_psk_is_deterministic() {
        let secret = b"some-shared-secret-material";
        let a = derive_psk(secret).unwrap();
        let b = derive_psk(secret).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), PSK_LEN);
    }
}
