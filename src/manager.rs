//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: madb-core — a client-side Android Debug Bridge wire protocol implementation.
//

//! `ConnectionManager`: the public lifecycle wrapper around a `Connection`,
//! with optional pairing. Config is a plain struct (no file/env parsing —
//! that stays a caller concern, spec §1/§6).

use crate::connection::Connection;
use crate::error::{AdbError, Result};
use crate::keys::KeyPair;
use crate::pairing::{self, PairingResult};
use crate::stream::Stream;
use std::time::Duration;
use tokio::sync::Mutex;

/// Builder-style configuration, matching the options table in spec §6.
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    pub host_address: String,
    pub api_level: u32,
    pub timeout: Duration,
    pub throw_on_unauthorized: bool,
    pub device_name: String,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            host_address: "127.0.0.1".to_string(),
            api_level: 0,
            timeout: Duration::from_secs(10),
            throw_on_unauthorized: false,
            device_name: "adb-client".to_string(),
        }
    }
}

struct ActiveConnection {
    host: String,
    port: u16,
    connection: Connection,
}

/// Owns the device identity and the lifecycle of at most one live
/// connection at a time. Multiple instances are independent — there is no
/// process-wide singleton (spec §9 "Global state").
pub struct ConnectionManager {
    config: Mutex<ConnectionManagerConfig>,
    keypair: Mutex<KeyPair>,
    active: Mutex<Option<ActiveConnection>>,
}

impl ConnectionManager {
    pub fn new(keypair: KeyPair) -> Self {
        Self::with_config(keypair, ConnectionManagerConfig::default())
    }

    pub fn with_config(keypair: KeyPair, config: ConnectionManagerConfig) -> Self {
        Self {
            config: Mutex::new(config),
            keypair: Mutex::new(keypair),
            active: Mutex::new(None),
        }
    }

    pub async fn set_host(&self, host: impl Into<String>) {
        self.config.lock().await.host_address = host.into();
    }

    pub async fn set_timeout(&self, timeout: Duration) {
        self.config.lock().await.timeout = timeout;
    }

    pub async fn set_fail_fast(&self, fail_fast: bool) {
        self.config.lock().await.throw_on_unauthorized = fail_fast;
    }

    /// Set the numeric API-level hint (spec §6): STLS is only accepted from
    /// the peer once this is at or above the TLS-era threshold (29).
    pub async fn set_api_level(&self, api_level: u32) {
        self.config.lock().await.api_level = api_level;
    }

    /// Connect to `host:port`. A no-op returning `false` if already
    /// connected to the same address (spec §4.7 idempotence).
    pub async fn connect(&self, host: &str, port: u16) -> Result<bool> {
        {
            let active = self.active.lock().await;
            if let Some(existing) = active.as_ref() {
                if existing.host == host
                    && existing.port == port
                    && existing.connection.is_connected().await
                {
                    return Ok(false);
                }
            }
        }

        let (timeout, fail_fast, api_level) = {
            let cfg = self.config.lock().await;
            (cfg.timeout, cfg.throw_on_unauthorized, cfg.api_level)
        };
        let keypair = self.keypair.lock().await;
        let connection =
            Connection::connect(host, port, &keypair, timeout, fail_fast, api_level).await?;
        drop(keypair);

        *self.active.lock().await = Some(ActiveConnection {
            host: host.to_string(),
            port,
            connection,
        });
        Ok(true)
    }

    /// Connect to `port` on the configured `host_address`.
    pub async fn connect_to_port(&self, port: u16) -> Result<bool> {
        let host = self.config.lock().await.host_address.clone();
        self.connect(&host, port).await
    }

    /// Run the SPAKE2/TLS pairing handshake against the pairing port.
    /// Independent of any ADB connection (spec §2 "Data flow (pair)").
    pub async fn pair(&self, host: &str, port: u16, code: &str) -> Result<PairingResult> {
        let keypair = self.keypair.lock().await;
        pairing::pair(host, port, code, &keypair).await
    }

    pub async fn open_stream(&self, destination: &str) -> Result<Stream> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(a) => a.connection.open(destination).await,
            None => Err(AdbError::StreamClosed),
        }
    }

    pub async fn is_connected(&self) -> bool {
        match self.active.lock().await.as_ref() {
            Some(a) => a.connection.is_connected().await,
            None => false,
        }
    }

    /// Tear down the live connection, if any, without destroying the
    /// device identity. A reconnect afterwards reuses the same `KeyPair`.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(active) = self.active.lock().await.take() {
            active.connection.close().await?;
        }
        Ok(())
    }

    /// Disconnect and destroy the private key (best-effort; failures are
    /// logged, never surfaced — spec §7). The manager is unusable for a
    /// new `connect` afterwards; construct a new `ConnectionManager` for a
    /// fresh identity (spec §3, "Re-keying on reconnect").
    pub async fn close(&self) -> Result<()> {
        self.disconnect().await?;
        self.keypair.lock().await.destroy();
        tracing::info!("connection manager closed, credentials destroyed");
        Ok(())
    }
}
