//! Multi-client scenarios through the development relay.

mod common;

use std::time::Duration;

use common::{TestRelay, WAIT, connected_client, wait_for_revision};
use hanaxia::features::chat::{DEFAULT_TITLE, REMOTE_TITLE};
use hanaxia::features::{
    AgentFeature, ChatFeature, ConversationStore, DocFeature, GoalStore, PresenceFeature,
    SessionIdentity, TemplateStore,
};
use hanaxia::protocol::{ChatMessagePayload, DocUpdatePayload, Message, Role};
use serde_json::Value;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_relay_rebroadcasts_to_other_clients_only() {
    let relay = TestRelay::start(false).await;
    let alice = connected_client(&relay.url).await;
    let bob = connected_client(&relay.url).await;
    relay.wait_for_clients(2).await;

    let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
    let _a = alice.bus().subscribe::<DocUpdatePayload, _>(move |p| {
        let _ = alice_tx.send(p.text.clone());
    });
    let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
    let _b = bob.bus().subscribe::<DocUpdatePayload, _>(move |p| {
        let _ = bob_tx.send(p.text.clone());
    });

    alice.bus().send(DocUpdatePayload {
        text: "from alice".to_string(),
    });

    let text = tokio::time::timeout(WAIT, bob_rx.recv()).await.unwrap().unwrap();
    assert_eq!(text, "from alice");
    assert!(
        tokio::time::timeout(Duration::from_millis(200), alice_rx.recv())
            .await
            .is_err()
    );

    alice.shutdown().await;
    bob.shutdown().await;
    relay.stop().await;
}

#[tokio::test]
async fn test_echo_mode_returns_frames_to_sender() {
    let relay = TestRelay::start(true).await;
    let solo = connected_client(&relay.url).await;
    relay.wait_for_clients(1).await;

    let doc = DocFeature::mount(solo.bus());
    solo.bus().send(DocUpdatePayload {
        text: "echoed".to_string(),
    });

    wait_for_revision(doc.state().watch(), 1).await;
    assert_eq!(doc.text().as_deref(), Some("echoed"));

    solo.shutdown().await;
    relay.stop().await;
}

#[tokio::test]
async fn test_chat_message_creates_and_merges_conversation_on_peer() {
    let relay = TestRelay::start(false).await;
    let alice = connected_client(&relay.url).await;
    let bob = connected_client(&relay.url).await;
    relay.wait_for_clients(2).await;

    let bob_chat = ChatFeature::mount(bob.bus(), ConversationStore::default());

    let payload = ChatMessagePayload {
        conversation_id: "c-roadmap".to_string(),
        conversation_title: Some("Roadmap".to_string()),
        message: Message::new("m1", Role::User, "What ships in Q3?", 1),
    };
    // Sent twice: the second copy must not duplicate the message.
    alice.bus().send(payload.clone());
    alice.bus().send(payload);
    alice.bus().send(ChatMessagePayload {
        conversation_id: "c-untitled".to_string(),
        conversation_title: None,
        message: Message::new("m2", Role::Assistant, "Hello", 2),
    });

    wait_for_revision(bob_chat.state().watch(), 2).await;
    // Give the duplicate a chance to arrive.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let store = bob_chat.snapshot();
    let titles: Vec<&str> = store.conversations().iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec![REMOTE_TITLE, "Roadmap", DEFAULT_TITLE]);
    assert_eq!(store.get("c-roadmap").unwrap().messages.len(), 1);
    assert_eq!(bob_chat.state().revision(), 2);

    alice.shutdown().await;
    bob.shutdown().await;
    relay.stop().await;
}

#[tokio::test]
async fn test_goal_lifecycle_replicates_between_agents() {
    let relay = TestRelay::start(false).await;
    let alice = connected_client(&relay.url).await;
    let bob = connected_client(&relay.url).await;
    relay.wait_for_clients(2).await;

    let alice_agent =
        AgentFeature::mount(alice.bus(), GoalStore::default(), TemplateStore::default());
    let bob_agent = AgentFeature::mount(bob.bus(), GoalStore::default(), TemplateStore::default());

    let goal = alice_agent.add_goal("Launch", "Ship Q3 release").unwrap();
    wait_for_revision(bob_agent.goals().watch(), 1).await;
    assert_eq!(bob_agent.goals().snapshot().get(&goal.id), Some(&goal));

    let planned = alice_agent.save_plan(&goal.id, "1. Freeze scope").unwrap();
    wait_for_revision(bob_agent.goals().watch(), 2).await;
    assert_eq!(
        bob_agent.goals().snapshot().get(&goal.id).and_then(|g| g.plan.clone()),
        planned.plan
    );

    assert!(alice_agent.delete_goal(&goal.id));
    wait_for_revision(bob_agent.goals().watch(), 3).await;
    assert!(bob_agent.goals().snapshot().goals().is_empty());

    alice.shutdown().await;
    bob.shutdown().await;
    relay.stop().await;
}

#[tokio::test]
async fn test_presence_drafts_and_cursors_reach_peer() {
    let relay = TestRelay::start(false).await;
    let alice = connected_client(&relay.url).await;
    let bob = connected_client(&relay.url).await;
    relay.wait_for_clients(2).await;

    let alice_presence = PresenceFeature::mount(alice.bus(), SessionIdentity::random());
    let bob_presence = PresenceFeature::mount(bob.bus(), SessionIdentity::random());

    alice_presence.publish_draft("c1", "Drafting the");
    alice_presence.publish_cursor("c1", 3, 8);
    wait_for_revision(bob_presence.state().watch(), 2).await;

    let state = bob_presence.state().snapshot();
    let alice_id = alice_presence.identity().user_id.clone();
    assert_eq!(state.drafts("c1"), vec![(alice_id.clone(), "Drafting the".to_string())]);
    let cursors = state.cursors("c1");
    assert_eq!(cursors.len(), 1);
    assert_eq!(cursors[0].user_id, alice_id);
    assert_eq!((cursors[0].selection_start, cursors[0].selection_end), (3, 8));

    alice_presence.publish_draft("c1", "");
    wait_for_revision(bob_presence.state().watch(), 3).await;
    assert!(bob_presence.state().snapshot().drafts("c1").is_empty());

    alice.shutdown().await;
    bob.shutdown().await;
    relay.stop().await;
}

#[tokio::test]
async fn test_health_reports_connections() {
    let relay = TestRelay::start(false).await;
    let client = connected_client(&relay.url).await;
    relay.wait_for_clients(1).await;

    let body: Value = reqwest::get(format!("{}/health", relay.http_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);

    client.shutdown().await;
    relay.stop().await;
}
