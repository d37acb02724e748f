//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: madb-core — a client-side Android Debug Bridge wire protocol implementation.
//

//! A single logical ADB stream multiplexed over a `Connection`.
//!
//! Grounded on the local-id/remote-id/ack bookkeeping of a classic
//! thread-and-channel ADB client mux, translated here to `tokio` channels
//! and a `Notify`-based ack-gate so the whole connection stays
//! cooperatively scheduled (spec §5, §9).

use crate::connection::ConnectionHandle;
use crate::error::{AdbError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Opening,
    Open,
    Closed,
}

/// Shared state a `Connection` reader task pushes updates into, and that a
/// `Stream` handle reads from. Kept out of the public API; `Connection`
/// holds the strong `Arc`, `Stream` holds a clone (spec §5 "Resource
/// ownership").
pub(crate) struct StreamShared {
    pub local_id: u32,
    pub remote_id: std::sync::atomic::AtomicU32,
    pub state: Mutex<StreamState>,
    pub state_changed: Notify,
    pub inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    pub inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    pub eof: AtomicBool,
    pub write_acked: AtomicBool,
    pub write_ack_notify: Notify,
    pub max_payload: usize,
}

impl StreamShared {
    pub fn new(local_id: u32, max_payload: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            local_id,
            remote_id: std::sync::atomic::AtomicU32::new(0),
            state: Mutex::new(StreamState::Opening),
            state_changed: Notify::new(),
            inbound: Mutex::new(rx),
            inbound_tx: tx,
            eof: AtomicBool::new(false),
            write_acked: AtomicBool::new(true),
            write_ack_notify: Notify::new(),
            max_payload,
        })
    }

    pub async fn set_state(&self, new_state: StreamState) {
        let mut guard = self.state.lock().await;
        *guard = new_state;
        drop(guard);
        self.state_changed.notify_waiters();
    }

    pub async fn state(&self) -> StreamState {
        *self.state.lock().await
    }

    pub fn on_okay(&self, remote_id: u32) {
        self.remote_id.store(remote_id, Ordering::SeqCst);
        self.write_acked.store(true, Ordering::SeqCst);
        self.write_ack_notify.notify_waiters();
    }

    pub fn push_inbound(&self, payload: Vec<u8>) {
        let _ = self.inbound_tx.send(payload);
    }

    pub fn mark_eof(&self) {
        self.eof.store(true, Ordering::SeqCst);
    }

    /// Unblock any writer stuck on the ack-gate, used when the stream or
    /// connection is closing rather than when a real OKAY arrived.
    pub fn wake_writers(&self) {
        self.write_acked.store(true, Ordering::SeqCst);
        self.write_ack_notify.notify_waiters();
    }
}

/// A bidirectional logical stream opened over an ADB `Connection`.
pub struct Stream {
    pub(crate) shared: Arc<StreamShared>,
    pub(crate) conn: ConnectionHandle,
    pending: Vec<u8>,
}

impl Stream {
    pub(crate) fn new(shared: Arc<StreamShared>, conn: ConnectionHandle) -> Self {
        Self {
            shared,
            conn,
            pending: Vec::new(),
        }
    }

    pub fn local_id(&self) -> u32 {
        self.shared.local_id
    }

    pub fn remote_id(&self) -> u32 {
        self.shared.remote_id.load(Ordering::SeqCst)
    }

    pub async fn is_closed(&self) -> bool {
        matches!(self.shared.state().await, StreamState::Closed)
    }

    /// Read up to `buf.len()` bytes. Blocks until data arrives, the stream
    /// is closed, or the connection tears down. Returns `Ok(0)` exactly
    /// once, when the stream is closed and its buffered bytes are drained
    /// (EOF).
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.pending.is_empty() {
            return Ok(self.drain_pending(buf));
        }

        loop {
            // Subscribe before checking anything: a state-change (CLSE,
            // teardown) notified between our checks and the select below
            // must still be observed, not lost.
            let state_notified = self.shared.state_changed.notified();

            {
                let mut inbound = self.shared.inbound.lock().await;
                match inbound.try_recv() {
                    Ok(chunk) => {
                        self.pending = chunk;
                        return Ok(self.drain_pending(buf));
                    }
                    Err(mpsc::error::TryRecvError::Empty) => {}
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        return Ok(0);
                    }
                }
            }

            if self.shared.eof.load(Ordering::SeqCst) {
                // One more drain attempt: a WRTE may have raced the CLSE.
                let mut inbound = self.shared.inbound.lock().await;
                match inbound.try_recv() {
                    Ok(chunk) => {
                        self.pending = chunk;
                        return Ok(self.drain_pending(buf));
                    }
                    _ => return Ok(0),
                }
            }

            // Wait for either new data or a state transition, whichever comes first.
            let mut inbound = self.shared.inbound.lock().await;
            tokio::select! {
                maybe = inbound.recv() => {
                    drop(inbound);
                    match maybe {
                        Some(chunk) => {
                            self.pending = chunk;
                            return Ok(self.drain_pending(buf));
                        }
                        None => return Ok(0),
                    }
                }
                _ = state_notified => {
                    drop(inbound);
                    continue;
                }
            }
        }
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }

    /// Fragment `data` into chunks no larger than the negotiated max
    /// payload, sending one WRTE per chunk and waiting for the peer's OKAY
    /// before sending the next (the "one outstanding WRTE" rule).
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(self.shared.max_payload.max(1)) {
            if self.is_closed().await {
                return Err(AdbError::StreamClosed);
            }
            self.shared.write_acked.store(false, Ordering::SeqCst);
            self.conn.send_wrte(&self.shared, chunk).await?;
            self.await_ack().await?;
        }
        Ok(())
    }

    async fn await_ack(&self) -> Result<()> {
        loop {
            // Subscribe before checking the predicate: a notify_waiters()
            // that lands between our check and the await below must still
            // be observed, not lost.
            let acked = self.shared.write_ack_notify.notified();
            let state_changed = self.shared.state_changed.notified();

            if self.shared.write_acked.load(Ordering::SeqCst) {
                return Ok(());
            }
            if matches!(self.shared.state().await, StreamState::Closed) {
                return Err(AdbError::StreamClosed);
            }
            tokio::select! {
                _ = acked => {}
                _ = state_changed => {}
            }
        }
    }

    /// Send CLSE (if still open) and transition to CLOSED. A no-op if
    /// already closed.
    pub async fn close(&mut self) -> Result<()> {
        let was_open = {
            let mut guard = self.shared.state.lock().await;
            let was = !matches!(*guard, StreamState::Closed);
            *guard = StreamState::Closed;
            was
        };
        self.shared.state_changed.notify_waiters();
        self.shared.mark_eof();
        if was_open {
            self.conn.send_clse(&self.shared).await.ok();
            self.conn.forget_stream(self.shared.local_id).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shared_state_transitions_notify_waiters() {
        let shared = StreamShared::new(1, 4096);
        assert_eq!(shared.state().await, StreamState::Opening);
        shared.set_state(StreamState::Open).await;
        assert_eq!(shared.state().await, StreamState::Open);
    }

    #[tokio::test]
    async fn on_okay_opens_ack_gate() {
        let shared = StreamShared::new(1, 4096);
        shared.write_acked.store(false, Ordering::SeqCst);
        shared.on_okay(42);
        assert_eq!(shared.remote_id.load(Ordering::SeqCst), 42);
        assert!(shared.write_acked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn inbound_queue_delivers_in_order() {
        let shared = StreamShared::new(1, 4096);
        shared.push_inbound(b"ab".to_vec());
        shared.push_inbound(b"cd".to_vec());
        let mut inbound = shared.inbound.lock().await;
        assert_eq!(inbound.recv().await.unwrap(), b"ab");
        assert_eq!(inbound.recv().await.unwrap(), b"cd");
    }
}
