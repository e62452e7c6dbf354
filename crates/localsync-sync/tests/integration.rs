use localsync_core::{Crdt, Hlc, NestedValue, Schema};
use localsync_proto::{ClientMessage, ServerMessage, WireMessage};
use localsync_sync::{
    Authority, AuthorityRuntime, ChannelTransport, ClientLink, ClientSession, MemoryStore,
    SessionConfig, Store, SyncError, Transport, TransportError,
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_test::assert_ok;

type Doc = NestedValue;

fn recipe_schema() -> Schema {
    Schema::from_json(&json!({
        "type": "object",
        "attributes": {
            "title": "string",
            "body": "rich-text",
            "servings": "int"
        }
    }))
    .unwrap()
}

fn client(site: &str) -> ClientSession<Doc> {
    let mut session = ClientSession::new(SessionConfig::new(site)).unwrap();
    session.register_schema("recipes", recipe_schema());
    session
}

fn runtime() -> AuthorityRuntime<Doc, MemoryStore<Doc>> {
    AuthorityRuntime::new(Authority::new(MemoryStore::new(), Hlc::new("server")))
}

async fn next_message(link: &mut ClientLink<Doc>) -> ServerMessage<Doc> {
    timeout(Duration::from_secs(5), link.inbox.recv())
        .await
        .expect("timeout waiting for server message")
        .expect("runtime dropped")
}

async fn receive(link: &mut ClientLink<Doc>, session: &mut ClientSession<Doc>) {
    let message = next_message(link).await;
    assert_ok!(session.handle_message(message));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sessions_converge_through_runtime() {
    let mut runtime = runtime();
    let mut alice_link = runtime.connect("alice");
    let mut bob_link = runtime.connect("bob");
    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(runtime.run(stop_rx));

    let mut alice = client("alice");
    let mut bob = client("bob");

    alice
        .collection("recipes")
        .save("r1", &json!({ "title": "Soup", "body": "Boil water.", "servings": 2 }))
        .unwrap();
    assert_eq!(alice.flush(&mut alice_link.transport).unwrap(), 1);
    receive(&mut bob_link, &mut bob).await;
    assert_eq!(
        bob.collection("recipes").load("r1"),
        alice.collection("recipes").load("r1")
    );

    // concurrent edits on both sides
    alice
        .collection("recipes")
        .insert_text("r1", &["body"], 11, " Add salt.")
        .unwrap();
    let mut recipes = bob.collection("recipes");
    recipes.set_attribute("r1", &["title"], &json!("Stew")).unwrap();
    recipes.delete_text("r1", &["body"], 0, 5).unwrap();

    assert_eq!(alice.flush(&mut alice_link.transport).unwrap(), 1);
    assert_eq!(bob.flush(&mut bob_link.transport).unwrap(), 2);
    receive(&mut bob_link, &mut bob).await;
    receive(&mut alice_link, &mut alice).await;

    let expected = json!({ "title": "Stew", "body": "water. Add salt.", "servings": 2 });
    assert_eq!(alice.collection("recipes").load("r1"), Some(expected.clone()));
    assert_eq!(bob.collection("recipes").load("r1"), Some(expected.clone()));

    stop_tx.send(()).unwrap();
    let authority = handle.await.unwrap();
    let stored = authority.store().get("recipes", "r1").unwrap().unwrap();
    assert_eq!(stored.value(), Some(expected));
}

#[tokio::test]
async fn late_session_catches_up_with_full_snapshot() {
    let mut runtime = runtime();
    let mut alice_link = runtime.connect("alice");
    let mut carol_link = runtime.connect("carol");
    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(runtime.run(stop_rx));

    let mut alice = client("alice");
    let mut recipes = alice.collection("recipes");
    recipes
        .save("r1", &json!({ "title": "Soup", "body": "Boil water.", "servings": 2 }))
        .unwrap();
    recipes
        .save("r2", &json!({ "title": "Stew", "body": "Brown the meat.", "servings": 4 }))
        .unwrap();
    recipes.delete("r1").unwrap();
    alice.flush(&mut alice_link.transport).unwrap();

    // carol was offline and missed the broadcast
    let missed = next_message(&mut carol_link).await;
    assert!(matches!(missed, ServerMessage::Sync { .. }));

    let mut carol = client("carol");
    carol.request_full(&mut carol_link.transport, "recipes").unwrap();
    let full = next_message(&mut carol_link).await;
    assert!(matches!(full, ServerMessage::Full { .. }));
    carol.handle_message(full).unwrap();

    let all = carol.collection("recipes").load_all();
    assert_eq!(all.keys().collect::<Vec<_>>(), vec!["r2"]);
    assert_eq!(all["r2"]["title"], "Stew");

    stop_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn listeners_see_remote_batches() {
    let mut runtime = runtime();
    let mut alice_link = runtime.connect("alice");
    let mut bob_link = runtime.connect("bob");
    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(runtime.run(stop_rx));

    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut bob = client("bob");
    bob.collection("recipes").on_changes(move |changes| {
        let ids: Vec<String> = changes.iter().map(|change| change.id.clone()).collect();
        let _ = seen_tx.send(ids);
    });

    let mut alice = client("alice");
    let mut recipes = alice.collection("recipes");
    for (id, title) in [("r1", "Soup"), ("r2", "Stew")] {
        recipes
            .save(id, &json!({ "title": title, "body": "", "servings": 1 }))
            .unwrap();
    }
    alice.flush(&mut alice_link.transport).unwrap();
    receive(&mut bob_link, &mut bob).await;

    assert_eq!(seen_rx.try_recv().unwrap(), vec!["r1", "r2"]);
    assert!(seen_rx.try_recv().is_err());

    stop_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn flush_after_shutdown_keeps_deltas() {
    let mut runtime = runtime();
    let mut link = runtime.connect("alice");
    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(runtime.run(stop_rx));
    stop_tx.send(()).unwrap();
    handle.await.unwrap();

    let mut alice = client("alice");
    alice
        .collection("recipes")
        .save("r1", &json!({ "title": "Soup", "body": "Boil water.", "servings": 2 }))
        .unwrap();

    let result = alice.flush(&mut link.transport);
    assert!(matches!(
        result,
        Err(SyncError::Transport(TransportError::Closed))
    ));
    assert_eq!(alice.pending(), 1);
}

/// Keeps sent messages instead of delivering them.
#[derive(Default)]
struct Captured(Vec<ClientMessage<Doc>>);

impl Transport<ClientMessage<Doc>> for Captured {
    fn send(&mut self, messages: Vec<ClientMessage<Doc>>) -> Result<(), TransportError> {
        self.0.extend(messages);
        Ok(())
    }
}

#[tokio::test]
async fn rejected_batch_is_answered_with_snapshot() {
    let mut runtime = runtime();
    let mut alice_link = runtime.connect("alice");
    let mut bob_link = runtime.connect("bob");
    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(runtime.run(stop_rx));

    let mut alice = client("alice");
    alice
        .collection("recipes")
        .save("r1", &json!({ "title": "Soup", "body": "Boil water.", "servings": 2 }))
        .unwrap();
    alice.flush(&mut alice_link.transport).unwrap();
    receive(&mut bob_link, &mut client("bob")).await;

    // a text edit whose document the authority never received
    let mut captured = Captured::default();
    let mut recipes = alice.collection("recipes");
    recipes
        .save("r2", &json!({ "title": "Stew", "body": "Brown", "servings": 4 }))
        .unwrap();
    recipes.insert_text("r2", &["body"], 5, " the meat.").unwrap();
    alice.flush(&mut captured).unwrap();
    let Some(ClientMessage::Delta { collection, deltas }) = captured.0.pop() else {
        panic!("expected a delta batch");
    };
    assert_eq!(deltas.len(), 2);
    let edit_only = ClientMessage::Delta {
        collection,
        deltas: deltas[1..].to_vec(),
    };
    alice_link.transport.send(vec![edit_only]).unwrap();

    let reply = next_message(&mut alice_link).await;
    let ServerMessage::Full { data, .. } = &reply else {
        panic!("expected full snapshot");
    };
    assert_eq!(data.keys().collect::<Vec<_>>(), vec!["r1"]);
    assert_ok!(alice.handle_message(reply));
    assert!(bob_link.inbox.try_recv().is_err());

    stop_tx.send(()).unwrap();
    let authority = handle.await.unwrap();
    assert!(authority.store().get("recipes", "r2").unwrap().is_none());
}

/// Pushes every message through its CBOR encoding before delivery.
struct CborTransport {
    inner: ChannelTransport<Doc>,
    bytes_sent: usize,
}

impl Transport<ClientMessage<Doc>> for CborTransport {
    fn send(&mut self, messages: Vec<ClientMessage<Doc>>) -> Result<(), TransportError> {
        let mut decoded = Vec::with_capacity(messages.len());
        for message in &messages {
            let bytes = message
                .to_cbor()
                .map_err(|err| TransportError::Failed(err.to_string()))?;
            self.bytes_sent += bytes.len();
            decoded.push(
                ClientMessage::from_cbor(&bytes)
                    .map_err(|err| TransportError::Failed(err.to_string()))?,
            );
        }
        self.inner.send(decoded)
    }
}

#[tokio::test]
async fn edits_survive_the_wire_encoding() {
    let mut runtime = runtime();
    let alice_link = runtime.connect("alice");
    let mut bob_link = runtime.connect("bob");
    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(runtime.run(stop_rx));

    let mut wire = CborTransport {
        inner: alice_link.transport,
        bytes_sent: 0,
    };
    let mut alice = client("alice");
    let mut recipes = alice.collection("recipes");
    recipes
        .save("r1", &json!({ "title": "Soup", "body": "Boil water.", "servings": 2 }))
        .unwrap();
    recipes.insert_text("r1", &["body"], 0, "First, ").unwrap();
    alice.flush(&mut wire).unwrap();
    assert!(wire.bytes_sent > 0);

    let message = next_message(&mut bob_link).await;
    let message = ServerMessage::<Doc>::from_json(&message.to_json().unwrap()).unwrap();
    let mut bob = client("bob");
    bob.handle_message(message).unwrap();
    assert_eq!(
        bob.collection("recipes").load("r1"),
        Some(json!({ "title": "Soup", "body": "First, Boil water.", "servings": 2 }))
    );

    stop_tx.send(()).unwrap();
    handle.await.unwrap();
}
