//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: madb-core — a client-side Android Debug Bridge wire protocol implementation.
//

//! The connection state machine: CNXN/AUTH/STLS handshake, the reader task
//! that dispatches inbound frames to streams, and stream lifecycle.

use crate::error::{AdbError, Result};
use crate::keys::KeyPair;
use crate::message::{self, auth_type, Command, Message, DEFAULT_MAX_PAYLOAD, MAX_ADB_DATA};
use crate::stream::{Stream, StreamShared, StreamState};
use crate::tls;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// States reachable once a `Connection` value exists. The handshake states
/// from spec §4.4 (IDLE/CONNECTING/AUTH_WAIT/STLS_WAIT) are transient and
/// live only inside `handshake()`'s local loop, before a `Connection` (and
/// therefore this enum) exists at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Running,
    Closed,
}

/// Either a raw TCP byte stream or one wrapped in TLS after an STLS upgrade.
/// Both variants are `Unpin`, so polling just delegates through the pin.
pub(crate) enum Transport {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

pub(crate) struct ConnectionInner {
    write_half: Mutex<WriteHalf<Transport>>,
    streams: Mutex<HashMap<u32, Arc<StreamShared>>>,
    next_local_id: AtomicU32,
    max_payload: usize,
    state: Mutex<ConnectionState>,
    state_changed: Notify,
}

impl ConnectionInner {
    pub(crate) async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    async fn set_state(&self, s: ConnectionState) {
        *self.state.lock().await = s;
        self.state_changed.notify_waiters();
    }

    async fn send_raw(&self, msg: Message) -> Result<()> {
        let mut w = self.write_half.lock().await;
        message::write_message(&mut *w, &msg).await
    }
}

/// A cheaply-cloneable handle streams use to write frames and deregister
/// themselves, without holding a strong reference to the whole `Connection`.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    pub(crate) async fn send_wrte(&self, shared: &StreamShared, payload: &[u8]) -> Result<()> {
        let remote_id = shared.remote_id.load(Ordering::SeqCst);
        self.inner
            .send_raw(Message::new(
                Command::WRTE,
                shared.local_id,
                remote_id,
                payload.to_vec(),
            ))
            .await
    }

    pub(crate) async fn send_clse(&self, shared: &StreamShared) -> Result<()> {
        let remote_id = shared.remote_id.load(Ordering::SeqCst);
        self.inner
            .send_raw(Message::new(Command::CLSE, shared.local_id, remote_id, vec![]))
            .await
    }

    pub(crate) async fn forget_stream(&self, local_id: u32) {
        self.inner.streams.lock().await.remove(&local_id);
    }
}

/// A live connection to an `adbd` endpoint: owns the socket, the reader
/// task, and the local-id → `Stream` table.
pub struct Connection {
    inner: Arc<ConnectionInner>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Run the full opening sequence (spec §4.4.1) against `host:port` within
    /// `timeout`, then spawn the reader task and return a running connection.
    pub async fn connect(
        host: &str,
        port: u16,
        keypair: &KeyPair,
        timeout: Duration,
        fail_fast: bool,
        api_level: u32,
    ) -> Result<Self> {
        let addr = (host.to_string(), port);
        let handshake = async {
            let tcp = TcpStream::connect(addr).await?;
            Self::handshake(tcp, keypair, fail_fast, api_level).await
        };
        let (transport, max_payload) = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| AdbError::Timeout(format!("connect to {host}:{port}")))??;

        let (read_half, write_half) = io::split(transport);
        let inner = Arc::new(ConnectionInner {
            write_half: Mutex::new(write_half),
            streams: Mutex::new(HashMap::new()),
            next_local_id: AtomicU32::new(1),
            max_payload: max_payload as usize,
            state: Mutex::new(ConnectionState::Running),
            state_changed: Notify::new(),
        });

        let reader_inner = inner.clone();
        let reader_handle = tokio::task::spawn(Self::run_reader(reader_inner, read_half));

        tracing::info!(%host, port, max_payload, "adb connection established");

        Ok(Self {
            inner,
            reader_handle: Mutex::new(Some(reader_handle)),
        })
    }

    async fn handshake(
        tcp: TcpStream,
        keypair: &KeyPair,
        fail_fast: bool,
        api_level: u32,
    ) -> Result<(Transport, u32)> {
        /// Android API level at which `adbd` started speaking TLS (spec §6,
        /// `api_level` option). Below this, STLS is refused rather than
        /// accepted, regardless of what the peer offers.
        const TLS_ERA_API_LEVEL: u32 = 29;

        let mut transport = Transport::Plain(tcp);

        message::write_message(
            &mut transport,
            &Message::new(
                Command::CNXN,
                message::A_VERSION,
                MAX_ADB_DATA,
                b"host::\0".to_vec(),
            ),
        )
        .await?;

        let mut token_replies_sent = 0u32;

        loop {
            let msg = message::decode(&mut transport, DEFAULT_MAX_PAYLOAD).await?;
            match msg.command() {
                Some(Command::Cnxn) => {
                    if !msg.validate() {
                        return Err(AdbError::protocol(
                            "CNXN failed the magic/checksum validation law",
                        ));
                    }
                    tracing::info!("handshake complete, transitioning to RUNNING");
                    return Ok((transport, msg.arg1.min(MAX_ADB_DATA)));
                }
                Some(Command::Auth) if msg.arg0 == auth_type::TOKEN => {
                    if msg.payload.len() != 20 {
                        return Err(AdbError::protocol("AUTH token payload must be 20 bytes"));
                    }
                    if token_replies_sent == 0 {
                        let mut token = [0u8; 20];
                        token.copy_from_slice(&msg.payload);
                        let sig = keypair.sign(&token)?;
                        token_replies_sent += 1;
                        message::write_message(
                            &mut transport,
                            &Message::new(Command::AUTH, auth_type::SIGNATURE, 0, sig),
                        )
                        .await?;
                    } else if fail_fast {
                        return Err(AdbError::AuthRejected);
                    } else {
                        tracing::warn!("peer rejected saved key, sending public key for enrolment");
                        let blob = keypair.public_key_blob()?;
                        message::write_message(
                            &mut transport,
                            &Message::new(Command::AUTH, auth_type::RSAPUBLICKEY, 0, blob),
                        )
                        .await?;
                    }
                }
                Some(Command::Stls) => {
                    if api_level < TLS_ERA_API_LEVEL {
                        return Err(AdbError::protocol(format!(
                            "peer offered STLS but api_level {api_level} is below the TLS-era threshold ({TLS_ERA_API_LEVEL})"
                        )));
                    }
                    message::write_message(
                        &mut transport,
                        &Message::new(Command::STLS, msg.arg0, 0, vec![]),
                    )
                    .await?;
                    let tcp = match transport {
                        Transport::Plain(tcp) => tcp,
                        Transport::Tls(_) => {
                            return Err(AdbError::protocol("STLS received twice"))
                        }
                    };
                    transport = match tls::upgrade_client(tcp, keypair).await {
                        Ok(tls_stream) => Transport::Tls(Box::new(tls_stream)),
                        Err(e) if fail_fast => {
                            tracing::warn!(error = %e, "TLS upgrade failed, pairing required");
                            return Err(AdbError::PairingRequired);
                        }
                        Err(e) => return Err(e),
                    };
                }
                _ => {
                    return Err(AdbError::protocol(format!(
                        "unexpected command 0x{:08x} during handshake",
                        msg.command
                    )));
                }
            }
        }
    }

    async fn run_reader(inner: Arc<ConnectionInner>, mut read_half: ReadHalf<Transport>) {
        loop {
            match message::decode(&mut read_half, DEFAULT_MAX_PAYLOAD).await {
                Ok(msg) => {
                    if let Err(e) = Self::dispatch(&inner, msg).await {
                        tracing::warn!(error = %e, "tearing down connection on protocol error");
                        break;
                    }
                }
                Err(e) => {
                    tracing::info!(error = %e, "reader observed I/O error, tearing down");
                    break;
                }
            }
        }
        Self::teardown(&inner).await;
    }

    async fn dispatch(inner: &Arc<ConnectionInner>, msg: Message) -> Result<()> {
        match msg.command() {
            Some(Command::Okay) => {
                let local_id = msg.arg1;
                let remote_id = msg.arg0;
                let shared = inner.streams.lock().await.get(&local_id).cloned();
                if let Some(shared) = shared {
                    if matches!(shared.state().await, StreamState::Opening) {
                        shared.set_state(StreamState::Open).await;
                    }
                    shared.on_okay(remote_id);
                }
                Ok(())
            }
            Some(Command::Wrte) => {
                let local_id = msg.arg1;
                let remote_id = msg.arg0;
                let shared = inner.streams.lock().await.get(&local_id).cloned();
                match shared {
                    Some(shared) if !matches!(shared.state().await, StreamState::Closed) => {
                        shared.push_inbound(msg.payload);
                        inner
                            .send_raw(Message::new(Command::OKAY, local_id, remote_id, vec![]))
                            .await
                    }
                    _ => {
                        inner
                            .send_raw(Message::new(Command::CLSE, local_id, remote_id, vec![]))
                            .await
                    }
                }
            }
            Some(Command::Clse) => {
                let local_id = msg.arg1;
                let shared = inner.streams.lock().await.remove(&local_id);
                if let Some(shared) = shared {
                    shared.mark_eof();
                    shared.set_state(StreamState::Closed).await;
                    shared.wake_writers();
                }
                Ok(())
            }
            _ => Err(AdbError::protocol(format!(
                "illegal command 0x{:08x} in RUNNING state",
                msg.command
            ))),
        }
    }

    async fn teardown(inner: &Arc<ConnectionInner>) {
        inner.set_state(ConnectionState::Closed).await;
        let mut streams = inner.streams.lock().await;
        for (_, shared) in streams.drain() {
            shared.mark_eof();
            shared.set_state(StreamState::Closed).await;
            shared.wake_writers();
        }
    }

    /// Open a new logical stream to `destination` (e.g. `"shell:"`,
    /// `"echo:"`). Blocks until the peer's first OKAY or CLSE arrives.
    pub async fn open(&self, destination: &str) -> Result<Stream> {
        if !matches!(self.inner.state().await, ConnectionState::Running) {
            return Err(AdbError::StreamClosed);
        }

        let local_id = self.inner.next_local_id.fetch_add(1, Ordering::SeqCst);
        let shared = StreamShared::new(local_id, self.inner.max_payload);
        self.inner
            .streams
            .lock()
            .await
            .insert(local_id, shared.clone());

        let mut dest = destination.as_bytes().to_vec();
        dest.push(0);
        self.inner
            .send_raw(Message::new(Command::OPEN, local_id, 0, dest))
            .await?;

        loop {
            let notified = shared.state_changed.notified();
            match shared.state().await {
                StreamState::Opening => notified.await,
                StreamState::Open => {
                    let handle = ConnectionHandle {
                        inner: self.inner.clone(),
                    };
                    return Ok(Stream::new(shared, handle));
                }
                StreamState::Closed => {
                    self.inner.streams.lock().await.remove(&local_id);
                    return Err(AdbError::OpenRejected(destination.to_string()));
                }
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.inner.state().await, ConnectionState::Running)
    }

    pub fn max_payload(&self) -> usize {
        self.inner.max_payload
    }

    /// Tear down the connection: closes the socket, marks every stream
    /// CLOSED, and wakes all waiters. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if matches!(self.inner.state().await, ConnectionState::Closed) {
            return Ok(());
        }
        {
            let mut w = self.inner.write_half.lock().await;
            let _ = w.shutdown().await;
        }
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        Self::teardown(&self.inner).await;
        tracing::info!("connection closed");
        Ok(())
    }
}
