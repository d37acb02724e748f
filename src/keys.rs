//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: madb-core — a client-side Android Debug Bridge wire protocol implementation.
//

//! Key pair and credential handling: RSA signing key, ADB public-key blob
//! encoding, and the self-signed X.509 identity used for TLS client auth.

use crate::error::{AdbError, Result};
use base64::{engine::general_purpose, Engine as _};
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use zeroize::Zeroize;

/// Bits of the RSA modulus used for ADB device identity keys.
pub const RSA_KEY_BITS: usize = 2048;

/// Number of 32-bit words in the modulus (`n32` in the ADB public key blob).
const RSANUMWORDS: usize = RSA_KEY_BITS / 32;

/// Holds a device's asymmetric signing identity: the RSA private key, a
/// self-signed X.509 certificate over the same key (for TLS client auth
/// after STLS), and a human-readable name embedded in the ADB public key
/// blob suffix.
pub struct KeyPair {
    private_key: Option<RsaPrivateKey>,
    certificate_der: Vec<u8>,
    device_name: String,
}

impl KeyPair {
    /// Generate a fresh RSA-2048 identity and a matching self-signed
    /// certificate, labelled with `device_name` (used both as the X.509
    /// common name and in the public key blob's ` user@host` suffix).
    pub fn generate(device_name: impl Into<String>) -> Result<Self> {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| AdbError::Crypto(format!("RSA key generation failed: {e}")))?;
        let device_name = device_name.into();
        let certificate_der = build_self_signed_cert(&private_key, &device_name)?;
        Ok(Self {
            private_key: Some(private_key),
            certificate_der,
            device_name,
        })
    }

    /// Load an existing identity from a PKCS#8 PEM-encoded RSA private key.
    pub fn from_pkcs8_pem(pem: &str, device_name: impl Into<String>) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| AdbError::Crypto(format!("invalid PKCS#8 private key: {e}")))?;
        let device_name = device_name.into();
        let certificate_der = build_self_signed_cert(&private_key, &device_name)?;
        Ok(Self {
            private_key: Some(private_key),
            certificate_der,
            device_name,
        })
    }

    /// Borrow the private key, failing once `destroy()` has erased it.
    fn private_key(&self) -> Result<&RsaPrivateKey> {
        self.private_key
            .as_ref()
            .ok_or_else(|| AdbError::Crypto("key pair has been destroyed".to_string()))
    }

    /// Export the private key as PKCS#8 PEM, for callers that persist keys
    /// across runs. Storage itself is a caller concern (see spec §6).
    pub fn to_pkcs8_pem(&self) -> Result<String> {
        self.private_key()?
            .to_pkcs8_pem(LineEnding::LF)
            .map(|z| z.to_string())
            .map_err(|e| AdbError::Crypto(format!("failed to encode private key: {e}")))
    }

    /// Sign a 20-byte SHA1 token using RSA-PKCS1v1.5 with the digest-only
    /// encoding: `token` is already the hash, and the DigestInfo prefix for
    /// SHA1 is prepended internally, matching what `adbd` expects.
    pub fn sign(&self, token: &[u8; 20]) -> Result<Vec<u8>> {
        let padding = Pkcs1v15Sign::new::<Sha1>();
        self.private_key()?
            .sign(padding, token)
            .map_err(|e| AdbError::Crypto(format!("RSA signing failed: {e}")))
    }

    /// Produce the legacy Android ADB public-key blob: Base64 of a fixed
    /// binary layout (`n32 | n0inv | N | RR | exponent`), suffixed with
    /// ` <device_name>\0`.
    pub fn public_key_blob(&self) -> Result<Vec<u8>> {
        let public_key = RsaPublicKey::from(self.private_key()?);
        let raw = encode_adb_public_key(&public_key)?;
        let mut blob = general_purpose::STANDARD.encode(raw).into_bytes();
        blob.push(b' ');
        blob.extend_from_slice(self.device_name.as_bytes());
        blob.push(0);
        Ok(blob)
    }

    /// The single self-signed X.509 certificate used for TLS client auth,
    /// as DER bytes. Spec's "certificate_chain()" is a single-element
    /// chain since only one self-signed cert is ever produced.
    pub fn certificate_chain(&self) -> Vec<Vec<u8>> {
        vec![self.certificate_der.clone()]
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Erase the private key material, rendering this `KeyPair` unusable.
    /// Dropping `self.private_key` here (rather than waiting on `self`'s own
    /// `Drop`) runs the `rsa` crate's `Drop`-based zeroizing of the RSA
    /// scalars immediately, not whenever the owning `ConnectionManager`
    /// eventually goes away; the cached device name and certificate bytes
    /// are zeroized directly since they're plain `Vec`/`String` with no such
    /// `Drop` behavior of their own. Never fails — failures during
    /// credential destruction are logged, never surfaced (spec §7).
    pub fn destroy(&mut self) {
        self.private_key = None;
        self.certificate_der.zeroize();
        self.device_name.zeroize();
    }
}

/// Encode the ADB legacy public key binary layout (before Base64/suffix).
fn encode_adb_public_key(public_key: &RsaPublicKey) -> Result<Vec<u8>> {
    let n = public_key.n();
    let e = public_key.e();

    if n.bits() as usize > RSA_KEY_BITS {
        return Err(AdbError::Crypto(format!(
            "modulus too large for ADB public key blob: {} bits",
            n.bits()
        )));
    }

    let n0inv = compute_n0inv(n);

    let r = BigUint::from(2u32).modpow(&BigUint::from((32 * RSANUMWORDS) as u32), n);
    let rr = (&r * &r) % n;

    let n_words = biguint_to_words_le(n, RSANUMWORDS);
    let rr_words = biguint_to_words_le(&rr, RSANUMWORDS);

    let mut out = Vec::with_capacity(4 + 4 + RSANUMWORDS * 4 * 2 + 4);
    out.extend_from_slice(&(RSANUMWORDS as u32).to_le_bytes());
    out.extend_from_slice(&n0inv.to_le_bytes());
    for w in &n_words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    for w in &rr_words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    let e_bytes = e.to_bytes_le();
    if e_bytes.len() > 4 {
        return Err(AdbError::Crypto(
            "public exponent does not fit in u32".to_string(),
        ));
    }
    let mut exponent_buf = [0u8; 4];
    exponent_buf[..e_bytes.len()].copy_from_slice(&e_bytes);
    out.extend_from_slice(&exponent_buf);
    Ok(out)
}

/// `n0inv = -N^{-1} mod 2^32`, computed via the standard Newton iteration
/// on the odd least-significant word of `N` (four doublings of precision
/// take a 3-bit initial guess to the full 32 bits).
fn compute_n0inv(n: &BigUint) -> u32 {
    let bytes = n.to_bytes_le();
    let n0 = u32::from_le_bytes([
        bytes.first().copied().unwrap_or(0),
        bytes.get(1).copied().unwrap_or(0),
        bytes.get(2).copied().unwrap_or(0),
        bytes.get(3).copied().unwrap_or(0),
    ]);

    // n0 itself is a valid 3-bit inverse guess mod 8 (odd^2 == 1 mod 8);
    // each iteration below doubles the number of correct low bits.
    let mut inv = n0;
    for _ in 0..4 {
        inv = inv.wrapping_mul(2u32.wrapping_sub(n0.wrapping_mul(inv)));
    }
    inv.wrapping_neg()
}

/// Split `value` into `num_words` little-endian 32-bit words, zero-padded.
fn biguint_to_words_le(value: &BigUint, num_words: usize) -> Vec<u32> {
    let bytes = value.to_bytes_le();
    let mut words = Vec::with_capacity(num_words);
    for i in 0..num_words {
        let start = i * 4;
        let w = u32::from_le_bytes([
            bytes.get(start).copied().unwrap_or(0),
            bytes.get(start + 1).copied().unwrap_or(0),
            bytes.get(start + 2).copied().unwrap_or(0),
            bytes.get(start + 3).copied().unwrap_or(0),
        ]);
        words.push(w);
    }
    words
}

fn build_self_signed_cert(private_key: &RsaPrivateKey, device_name: &str) -> Result<Vec<u8>> {
    let pkcs8_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AdbError::Crypto(format!("failed to encode private key for cert: {e}")))?;

    let rcgen_key = rcgen::KeyPair::from_pem(&pkcs8_pem)
        .map_err(|e| AdbError::Crypto(format!("rcgen rejected private key: {e}")))?;

    let mut params = rcgen::CertificateParams::new(vec![device_name.to_string()])
        .map_err(|e| AdbError::Crypto(format!("invalid certificate SAN: {e}")))?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, device_name);

    let cert = params
        .self_signed(&rcgen_key)
        .map_err(|e| AdbError::Crypto(format!("self-signed certificate generation failed: {e}")))?;

    Ok(cert.der().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keypair_signs_and_produces_blob() {
        let kp = KeyPair::generate("test@host").expect("keygen");
        let token = [7u8; 20];
        let sig = kp.sign(&token).expect("sign");
        assert_eq!(sig.len(), RSA_KEY_BITS / 8);

        let blob = kp.public_key_blob().expect("blob");
        assert!(blob.ends_with(b"\0"));
        assert!(blob.windows(b" test@host".len()).any(|w| w == b" test@host"));
    }

    #[test]
    fn destroy_erases_the_private_key() {
        let mut kp = KeyPair::generate("dev").expect("keygen");
        kp.destroy();
        assert!(kp.sign(&[0u8; 20]).is_err());
        assert!(kp.public_key_blob().is_err());
        assert!(kp.to_pkcs8_pem().is_err());
    }

    #[test]
    fn certificate_chain_has_one_entry() {
        let kp = KeyPair::generate("dev").expect("keygen");
        let chain = kp.certificate_chain();
        assert_eq!(chain.len(), 1);
        assert!(!chain[0].is_empty());
    }

    #[test]
    fn pem_round_trip_preserves_signing_capability() {
        let kp = KeyPair::generate("dev").expect("keygen");
        let pem = kp.to_pkcs8_pem().expect("export");
        let kp2 = KeyPair::from_pkcs8_pem(&pem, "dev").expect("import");
        let token = [1u8; 20];
        assert_eq!(kp.sign(&token).unwrap(), kp2.sign(&token).unwrap());
    }

    #[test]
    fn n0inv_satisfies_montgomery_identity() {
        let kp = KeyPair::generate("dev").expect("keygen");
        let public_key = RsaPublicKey::from(kp.private_key().unwrap());
        let n = public_key.n();
        let n0inv = compute_n0inv(n);
        let bytes = n.to_bytes_le();
        let n0 = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        // N * n0inv == -1 mod 2^32
        let product = n0.wrapping_mul(n0inv);
        assert_eq!(product, u32::MAX);
    }
}
