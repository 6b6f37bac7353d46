//! Single-node relay behavior: handshake, local routing, duplicates.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::connect_async;

use drift_core::crypto::SigningIdentity;
use drift_core::frame::{DeliveryFrame, HandshakeFrame, ALREADY_CONNECTED, GREETING};

use crate::{join, recv_text, send_json, signed_chat, start_node, test_bus, test_config};

#[tokio::test]
async fn local_delivery_does_not_touch_the_bus() {
    let bus = test_bus();
    let node = start_node(bus.clone()).await;

    let alice = SigningIdentity::generate();
    let bob = SigningIdentity::generate();
    let mut alice_ws = join(node.local_addr, &alice, "alice").await;
    let mut bob_ws = join(node.local_addr, &bob, "bob").await;

    send_json(
        &mut alice_ws,
        &signed_chat(&alice, bob.peer_id(), b"hi bob", 1),
    )
    .await;

    let delivery: DeliveryFrame = serde_json::from_str(&recv_text(&mut bob_ws).await).unwrap();
    assert_eq!(delivery.from.id, alice.peer_id());
    assert_eq!(delivery.from.name, "alice");
    assert_eq!(delivery.from.nonce, 1);
    assert_eq!(delivery.text, b"hi bob");
    assert!(!delivery.encrypted);
    delivery
        .signature
        .verify(&alice.peer_id(), &bob.peer_id(), b"hi bob", 1)
        .expect("relayed signature must still verify");

    assert_eq!(bus.published(), 0, "local traffic must not reach the bus");
    node.shutdown();
}

#[tokio::test]
async fn duplicate_identity_is_rejected_and_first_wins() {
    let node = start_node(test_bus()).await;

    let alice = SigningIdentity::generate();
    let mut first = join(node.local_addr, &alice, "alice").await;

    // Same identity, second connection.
    let (mut second, _) = connect_async(format!("ws://{}", node.local_addr))
        .await
        .unwrap();
    assert_eq!(recv_text(&mut second).await, GREETING);
    send_json(
        &mut second,
        &HandshakeFrame {
            id: alice.peer_id(),
            name: "impostor".to_string(),
        },
    )
    .await;
    assert_eq!(recv_text(&mut second).await, ALREADY_CONNECTED);

    // The original session is unaffected: it can still receive.
    let bob = SigningIdentity::generate();
    let mut bob_ws = join(node.local_addr, &bob, "bob").await;
    send_json(&mut bob_ws, &signed_chat(&bob, alice.peer_id(), b"still here", 1)).await;
    let delivery: DeliveryFrame = serde_json::from_str(&recv_text(&mut first).await).unwrap();
    assert_eq!(delivery.text, b"still here");

    node.shutdown();
}

#[tokio::test]
async fn silent_client_is_cut_off_after_the_handshake_window() {
    let mut config = test_config();
    config.node.handshake_timeout_ms = 100;
    let node = driftd::node::start(config, test_bus()).await.unwrap();

    let (mut ws, _) = connect_async(format!("ws://{}", node.local_addr))
        .await
        .unwrap();
    assert_eq!(recv_text(&mut ws).await, GREETING);

    // Say nothing. The server must end the connection.
    let outcome = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(msg)) if msg.is_close() => return,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return,
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "connection was not closed");

    node.shutdown();
}

#[tokio::test]
async fn unroutable_frame_does_not_end_the_session() {
    let bus = test_bus();
    let node = start_node(bus.clone()).await;

    let alice = SigningIdentity::generate();
    let bob = SigningIdentity::generate();
    let ghost = SigningIdentity::generate();
    let mut alice_ws = join(node.local_addr, &alice, "alice").await;
    let mut bob_ws = join(node.local_addr, &bob, "bob").await;

    // Nobody named ghost is connected anywhere: goes to the bus.
    send_json(
        &mut alice_ws,
        &signed_chat(&alice, ghost.peer_id(), b"anyone there?", 1),
    )
    .await;

    // The session survives and still routes locally.
    send_json(
        &mut alice_ws,
        &signed_chat(&alice, bob.peer_id(), b"you there", 2),
    )
    .await;
    let delivery: DeliveryFrame = serde_json::from_str(&recv_text(&mut bob_ws).await).unwrap();
    assert_eq!(delivery.text, b"you there");
    assert_eq!(bus.published(), 1);

    node.shutdown();
}
