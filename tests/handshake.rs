//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: madb-core — a client-side Android Debug Bridge wire protocol implementation.
//

//! End-to-end connection handshake scenarios, driven against an in-process
//! mock `adbd` over loopback TCP: a direct CNXN reply, the token-signature
//! AUTH loop, and fail-fast rejection on a second token.

use madb_core::message::{self, auth_type, Command, Message};
use madb_core::{AdbError, Connection, KeyPair};
use std::time::Duration;
use tokio::net::TcpListener;

async fn bind_loopback() -> (TcpListener, u16) {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("bind mock adbd listener");
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn device_banner() -> Vec<u8> {
    b"device::ro.product.name=mock\0".to_vec()
}

#[tokio::test]
async fn happy_path_v1_cnxn_exchange() {
    let (listener, port) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let cnxn = message::decode(&mut sock, message::DEFAULT_MAX_PAYLOAD)
            .await
            .unwrap();
        assert_eq!(cnxn.command(), Some(Command::Cnxn));
        assert_eq!(cnxn.arg0, message::A_VERSION);

        message::write_message(
            &mut sock,
            &Message::new(Command::CNXN, message::A_VERSION, 4096, device_banner()),
        )
        .await
        .unwrap();
    });

    let keypair = KeyPair::generate("test@host").unwrap();
    let conn = Connection::connect("127.0.0.1", port, &keypair, Duration::from_secs(5), false, 29)
        .await
        .expect("handshake should complete on a direct CNXN reply");

    assert!(conn.is_connected().await);
    assert_eq!(conn.max_payload(), 4096);

    server.await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
async fn token_signature_auth_flow_succeeds() {
    let (listener, port) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let cnxn = message::decode(&mut sock, message::DEFAULT_MAX_PAYLOAD)
            .await
            .unwrap();
        assert_eq!(cnxn.command(), Some(Command::Cnxn));

        let token = [9u8; 20];
        message::write_message(
            &mut sock,
            &Message::new(Command::AUTH, auth_type::TOKEN, 0, token.to_vec()),
        )
        .await
        .unwrap();

        let reply = message::decode(&mut sock, message::DEFAULT_MAX_PAYLOAD)
            .await
            .unwrap();
        assert_eq!(reply.command(), Some(Command::Auth));
        assert_eq!(reply.arg0, auth_type::SIGNATURE);
        assert_eq!(reply.payload.len(), 256, "RSA-2048 signature is 256 bytes");

        message::write_message(
            &mut sock,
            &Message::new(Command::CNXN, message::A_VERSION, 4096, device_banner()),
        )
        .await
        .unwrap();
    });

    let keypair = KeyPair::generate("test@host").unwrap();
    let conn = Connection::connect("127.0.0.1", port, &keypair, Duration::from_secs(5), false, 29)
        .await
        .expect("handshake should succeed after signing the AUTH token");

    assert!(conn.is_connected().await);

    server.await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
async fn second_token_fails_fast_when_enabled() {
    let (listener, port) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let _cnxn = message::decode(&mut sock, message::DEFAULT_MAX_PAYLOAD)
            .await
            .unwrap();

        message::write_message(
            &mut sock,
            &Message::new(Command::AUTH, auth_type::TOKEN, 0, [1u8; 20].to_vec()),
        )
        .await
        .unwrap();
        let _signature = message::decode(&mut sock, message::DEFAULT_MAX_PAYLOAD)
            .await
            .unwrap();

        // The peer doesn't recognize the signing key: reject with a second
        // token instead of CNXN, as a real adbd does when the saved key
        // isn't on its authorized list.
        message::write_message(
            &mut sock,
            &Message::new(Command::AUTH, auth_type::TOKEN, 0, [2u8; 20].to_vec()),
        )
        .await
        .unwrap();
    });

    let keypair = KeyPair::generate("test@host").unwrap();
    let result =
        Connection::connect("127.0.0.1", port, &keypair, Duration::from_secs(5), true, 29).await;

    assert!(
        matches!(result, Err(AdbError::AuthRejected)),
        "fail_fast must reject on a second AUTH token instead of sending the public key"
    );

    server.await.unwrap();
}

#[tokio::test]
async fn second_token_without_fail_fast_offers_public_key() {
    let (listener, port) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let _cnxn = message::decode(&mut sock, message::DEFAULT_MAX_PAYLOAD)
            .await
            .unwrap();

        message::write_message(
            &mut sock,
            &Message::new(Command::AUTH, auth_type::TOKEN, 0, [3u8; 20].to_vec()),
        )
        .await
        .unwrap();
        let _signature = message::decode(&mut sock, message::DEFAULT_MAX_PAYLOAD)
            .await
            .unwrap();

        message::write_message(
            &mut sock,
            &Message::new(Command::AUTH, auth_type::TOKEN, 0, [4u8; 20].to_vec()),
        )
        .await
        .unwrap();

        let offer = message::decode(&mut sock, message::DEFAULT_MAX_PAYLOAD)
            .await
            .unwrap();
        assert_eq!(offer.command(), Some(Command::Auth));
        assert_eq!(offer.arg0, auth_type::RSAPUBLICKEY);
        assert!(!offer.payload.is_empty());

        message::write_message(
            &mut sock,
            &Message::new(Command::CNXN, message::A_VERSION, 4096, device_banner()),
        )
        .await
        .unwrap();
    });

    let keypair = KeyPair::generate("test@host").unwrap();
    let conn = Connection::connect("127.0.0.1", port, &keypair, Duration::from_secs(5), false, 29)
        .await
        .expect("without fail_fast the client should offer its public key for enrolment");

    assert!(conn.is_connected().await);

    server.await.unwrap();
    conn.close().await.unwrap();
}
