//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: madb-core — a client-side Android Debug Bridge wire protocol implementation.
//

//! TLS 1.3 upgrade of a raw ADB socket after STLS, and of the pairing
//! socket after the SPAKE2 exchange. Server certificates are trusted
//! unconditionally: peer identity comes from prior key enrolment, not from
//! the certificate chain (spec §4.5).

use crate::error::{AdbError, Result};
use crate::keys::KeyPair;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Accepts any server certificate chain. adbd's identity is established by
/// prior key enrolment (the RSA signature / pairing exchange), not by the
/// TLS certificate; this verifier only keeps the channel confidential.
#[derive(Debug)]
struct TrustAnyServer;

impl ServerCertVerifier for TrustAnyServer {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

fn client_config(keypair: &KeyPair) -> Result<ClientConfig> {
    let pem = keypair.to_pkcs8_pem()?;
    let private_key = rustls_pemfile::pkcs8_private_keys(&mut pem.as_bytes())
        .next()
        .ok_or_else(|| AdbError::Tls("no PKCS#8 private key found for client auth".into()))?
        .map_err(|e| AdbError::Tls(format!("invalid private key for client auth: {e}")))?;

    let cert_chain: Vec<CertificateDer<'static>> = keypair
        .certificate_chain()
        .into_iter()
        .map(CertificateDer::from)
        .collect();

    let builder = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(TrustAnyServer));

    builder
        .with_client_auth_cert(cert_chain, PrivateKeyDer::Pkcs8(private_key))
        .map_err(|e| AdbError::Tls(format!("failed to attach client certificate: {e}")))
}

/// Upgrade `tcp` to a TLS 1.3 client session, presenting `keypair`'s
/// self-signed identity for client authentication. The server name is
/// nominal (adbd does not validate SNI); any string is accepted since
/// certificate verification is disabled above.
pub async fn upgrade_client(tcp: TcpStream, keypair: &KeyPair) -> Result<TlsStream<TcpStream>> {
    let config = client_config(keypair)?;
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from("adb-device").map_err(|e| {
        AdbError::Tls(format!("invalid nominal server name for TLS SNI: {e}"))
    })?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| AdbError::Tls(format!("TLS handshake failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builds_from_generated_identity() {
        let kp = KeyPair::generate("test@host").expect("keygen");
        let cfg = client_config(&kp);
        assert!(cfg.is_ok(), "client config should build from a fresh identity");
    }
}
