//! End-to-end authenticated messaging through the real client pipelines.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use drift_client::{Client, ClientError, ClientEvent, ContactStore, MemoryContacts};
use drift_core::crypto::{EncryptionIdentity, SigningIdentity};

use crate::{start_node, test_bus};

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a client event")
        .expect("event channel closed")
}

async fn connect(
    addr: SocketAddr,
    signer: SigningIdentity,
    name: &str,
) -> (Client, mpsc::UnboundedReceiver<ClientEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Client::connect(
        &format!("ws://{addr}"),
        signer,
        EncryptionIdentity::generate(),
        name,
        Arc::new(MemoryContacts::new()),
        tx,
    )
    .await
    .expect("client failed to connect");

    // The handshake ack arrives as the first system event.
    match next_event(&mut rx).await {
        ClientEvent::System(line) => assert_eq!(line, format!("Welcome, {name}")),
        other => panic!("expected welcome, got {other:?}"),
    }
    (client, rx)
}

#[tokio::test]
async fn clients_exchange_verified_messages() {
    let node = start_node(test_bus()).await;

    let (alice, _alice_rx) = connect(node.local_addr, SigningIdentity::generate(), "alice").await;
    let (bob, mut bob_rx) = connect(node.local_addr, SigningIdentity::generate(), "bob").await;

    alice.send(bob.peer_id(), "hello bob").await.unwrap();

    assert_eq!(
        next_event(&mut bob_rx).await,
        ClientEvent::ContactAdded {
            id: alice.peer_id(),
            name: "alice".to_string(),
        }
    );
    assert_eq!(
        next_event(&mut bob_rx).await,
        ClientEvent::Message {
            from: alice.peer_id(),
            name: "alice".to_string(),
            text: "hello bob".to_string(),
        }
    );

    node.shutdown();
}

#[tokio::test]
async fn key_exchange_upgrades_the_conversation() {
    let node = start_node(test_bus()).await;

    let (alice, mut alice_rx) = connect(node.local_addr, SigningIdentity::generate(), "alice").await;
    let (bob, mut bob_rx) = connect(node.local_addr, SigningIdentity::generate(), "bob").await;

    // Alice shares her key; bob's client intercepts it.
    alice.send(bob.peer_id(), "/share key").await.unwrap();
    assert_eq!(
        next_event(&mut bob_rx).await,
        ClientEvent::ContactAdded {
            id: alice.peer_id(),
            name: "alice".to_string(),
        }
    );
    assert_eq!(
        next_event(&mut bob_rx).await,
        ClientEvent::KeyUpdated { id: alice.peer_id() }
    );

    // Bob shares back; alice already has a record for bob from her send.
    bob.send(alice.peer_id(), "/share key").await.unwrap();
    assert_eq!(
        next_event(&mut alice_rx).await,
        ClientEvent::KeyUpdated { id: bob.peer_id() }
    );

    // Alice now has bob's key on file, so this travels encrypted end to
    // end and still reads as plaintext on bob's side.
    alice.send(bob.peer_id(), "between us").await.unwrap();
    assert_eq!(
        next_event(&mut bob_rx).await,
        ClientEvent::Message {
            from: alice.peer_id(),
            name: "alice".to_string(),
            text: "between us".to_string(),
        }
    );

    node.shutdown();
}

#[tokio::test]
async fn second_connection_for_an_identity_is_refused() {
    let node = start_node(test_bus()).await;

    let signer = SigningIdentity::generate();
    let key_bytes = signer.to_bytes();
    let (_alice, _alice_rx) = connect(node.local_addr, signer, "alice").await;

    let twin = SigningIdentity::from_bytes(&key_bytes).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = Client::connect(
        &format!("ws://{}", node.local_addr),
        twin,
        EncryptionIdentity::generate(),
        "alice",
        Arc::new(MemoryContacts::new()),
        tx,
    )
    .await;
    assert!(matches!(result, Err(ClientError::AlreadyConnected)));

    node.shutdown();
}

#[tokio::test]
async fn concurrent_sends_mint_consecutive_nonces() {
    let node = start_node(test_bus()).await;

    // Alice's store is held by the test so the counters can be inspected.
    let store = Arc::new(MemoryContacts::new());
    let (tx, mut alice_rx) = mpsc::unbounded_channel();
    let alice = Client::connect(
        &format!("ws://{}", node.local_addr),
        SigningIdentity::generate(),
        EncryptionIdentity::generate(),
        "alice",
        store.clone(),
        tx,
    )
    .await
    .unwrap();
    assert!(matches!(
        next_event(&mut alice_rx).await,
        ClientEvent::System(_)
    ));
    let (bob, mut bob_rx) = connect(node.local_addr, SigningIdentity::generate(), "bob").await;

    // Racing senders: every frame must still carry a distinct consecutive
    // nonce, or bob's strict ordering check drops the collisions.
    let alice = Arc::new(alice);
    let mut senders = Vec::new();
    for i in 0..8u32 {
        let alice = alice.clone();
        let to = bob.peer_id();
        senders.push(tokio::spawn(async move {
            alice.send(to, &format!("m{i}")).await.unwrap();
        }));
    }
    for sender in senders {
        sender.await.unwrap();
    }

    assert!(matches!(
        next_event(&mut bob_rx).await,
        ClientEvent::ContactAdded { .. }
    ));
    let mut texts = Vec::new();
    for _ in 0..8 {
        match next_event(&mut bob_rx).await {
            ClientEvent::Message { text, .. } => texts.push(text),
            other => panic!("expected a message, got {other:?}"),
        }
    }
    texts.sort();
    let expected: Vec<String> = (0..8).map(|i| format!("m{i}")).collect();
    assert_eq!(texts, expected);

    let contact = store.lookup(&bob.peer_id()).unwrap().unwrap();
    assert_eq!(contact.outgoing_nonce, 8);

    node.shutdown();
}

#[tokio::test]
async fn conversation_nonces_advance_per_direction() {
    let node = start_node(test_bus()).await;

    let (alice, mut alice_rx) = connect(node.local_addr, SigningIdentity::generate(), "alice").await;
    let (bob, mut bob_rx) = connect(node.local_addr, SigningIdentity::generate(), "bob").await;

    for i in 1..=3u32 {
        alice.send(bob.peer_id(), &format!("a{i}")).await.unwrap();
    }
    bob.send(alice.peer_id(), "b1").await.unwrap();

    // Bob sees contact-added then a1, a2, a3 in order.
    assert!(matches!(
        next_event(&mut bob_rx).await,
        ClientEvent::ContactAdded { .. }
    ));
    for i in 1..=3u32 {
        assert_eq!(
            next_event(&mut bob_rx).await,
            ClientEvent::Message {
                from: alice.peer_id(),
                name: "alice".to_string(),
                text: format!("a{i}"),
            }
        );
    }
    assert_eq!(
        next_event(&mut alice_rx).await,
        ClientEvent::Message {
            from: bob.peer_id(),
            name: "bob".to_string(),
            text: "b1".to_string(),
        }
    );

    node.shutdown();
}
