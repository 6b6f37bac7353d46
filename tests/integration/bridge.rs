//! Two nodes on one shared bus: cross-node delivery and loop prevention.

use std::time::Duration;

use drift_core::crypto::SigningIdentity;
use drift_core::frame::DeliveryFrame;

use crate::{join, recv_text, send_json, signed_chat, start_node, test_bus};

#[tokio::test]
async fn message_crosses_nodes_over_the_shared_bus() {
    let bus = test_bus();
    let node_a = start_node(bus.clone()).await;
    let node_b = start_node(bus.clone()).await;

    let alice = SigningIdentity::generate();
    let bob = SigningIdentity::generate();
    let mut alice_ws = join(node_a.local_addr, &alice, "alice").await;
    let mut bob_ws = join(node_b.local_addr, &bob, "bob").await;

    send_json(
        &mut alice_ws,
        &signed_chat(&alice, bob.peer_id(), b"across the wire", 1),
    )
    .await;

    let delivery: DeliveryFrame = serde_json::from_str(&recv_text(&mut bob_ws).await).unwrap();
    assert_eq!(delivery.from.id, alice.peer_id());
    assert_eq!(delivery.from.name, "alice");
    assert_eq!(delivery.text, b"across the wire");
    delivery
        .signature
        .verify(&alice.peer_id(), &bob.peer_id(), b"across the wire", 1)
        .expect("signature must survive the bus hop");

    assert_eq!(bus.published(), 1);
    // Consuming node acked; publishing node discarded its own envelope
    // without acking.
    assert_eq!(bus.ack_count(1), 1);

    node_a.shutdown();
    node_b.shutdown();
}

#[tokio::test]
async fn publisher_discards_its_own_envelope() {
    let bus = test_bus();
    let node_a = start_node(bus.clone()).await;
    let node_b = start_node(bus.clone()).await;

    let alice = SigningIdentity::generate();
    let nobody = SigningIdentity::generate();
    let mut alice_ws = join(node_a.local_addr, &alice, "alice").await;

    // Recipient is connected nowhere: node A publishes, node B acks,
    // node A must not re-deliver its own envelope back to alice.
    send_json(
        &mut alice_ws,
        &signed_chat(&alice, nobody.peer_id(), b"void", 1),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(bus.published(), 1);
    assert_eq!(bus.ack_count(1), 1, "exactly the foreign node acks");

    node_a.shutdown();
    node_b.shutdown();
}

#[tokio::test]
async fn each_direction_crosses_independently() {
    let bus = test_bus();
    let node_a = start_node(bus.clone()).await;
    let node_b = start_node(bus.clone()).await;

    let alice = SigningIdentity::generate();
    let bob = SigningIdentity::generate();
    let mut alice_ws = join(node_a.local_addr, &alice, "alice").await;
    let mut bob_ws = join(node_b.local_addr, &bob, "bob").await;

    send_json(&mut alice_ws, &signed_chat(&alice, bob.peer_id(), b"ping", 1)).await;
    let to_bob: DeliveryFrame = serde_json::from_str(&recv_text(&mut bob_ws).await).unwrap();
    assert_eq!(to_bob.text, b"ping");

    send_json(&mut bob_ws, &signed_chat(&bob, alice.peer_id(), b"pong", 1)).await;
    let to_alice: DeliveryFrame = serde_json::from_str(&recv_text(&mut alice_ws).await).unwrap();
    assert_eq!(to_alice.text, b"pong");

    assert_eq!(bus.published(), 2);

    node_a.shutdown();
    node_b.shutdown();
}
