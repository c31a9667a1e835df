mod common;

use chrono::{TimeZone, Utc};

use common::{MockChat, MockEmbedder, MockTransport};
use epistle::config::MailConfig;
use epistle::reply::{CycleOutcome, ReplyEngine};
use epistle::store::messages::{self, NewMessage};
use epistle::store::{self, SqlitePool, correspondents};

const ASSISTANT: &str = "bot@assistant.example";
const ALICE: &str = "alice@client.example";

fn mail_config() -> MailConfig {
    MailConfig {
        address: ASSISTANT.to_string(),
        display_name: "Assistant".to_string(),
        ..MailConfig::default()
    }
}

async fn seed_unanswered(pool: &SqlitePool, correspondent_id: i64) -> Vec<i64> {
    let mut ids = Vec::new();
    for (n, body) in ["Could you check the contract?", "And the appendix too."]
        .iter()
        .enumerate()
    {
        let message = NewMessage {
            correspondent_id,
            thread_key: Some("<root@client.example>".to_string()),
            external_id: format!("<q{n}@client.example>"),
            in_reply_to: None,
            to_addr: ASSISTANT.to_string(),
            to_name: "Assistant".to_string(),
            from_addr: ALICE.to_string(),
            from_name: "Alice".to_string(),
            subject: "Contract review".to_string(),
            body: body.to_string(),
            received_at: Utc.with_ymd_and_hms(2025, 5, 14, 9 + n as u32, 0, 0).unwrap(),
            responded: false,
        };
        let outcome = messages::insert_with_embedding(pool, &message, "mock-embed", &[1.0, 0.0])
            .await
            .unwrap();
        ids.push(outcome.id());
    }
    ids
}

// =============================================================
// Success path
// =============================================================

#[tokio::test]
async fn successful_cycle_threads_sends_and_marks() {
    let pool = store::open_in_memory().await.unwrap();
    let embedder = MockEmbedder::uniform(2);
    let chat = MockChat::replying("Happy to review both, see my notes inline.");
    let transport = MockTransport::empty();
    let mail = mail_config();

    let alice = correspondents::get_or_create(&pool, ALICE, "Alice").await.unwrap();
    seed_unanswered(&pool, alice.id).await;

    let engine = ReplyEngine::new(&pool, &chat, &embedder, &transport, &mail, None);
    let outcome = engine.run_cycle(&alice).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Replied);

    // Batch marked answered, exactly once.
    assert!(messages::unresponded_for(&pool, alice.id).await.unwrap().is_empty());

    // One outbound mail, threaded onto the latest source.
    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to_addr, ALICE);
    assert_eq!(sent[0].subject, "Re: Contract review");
    assert_eq!(sent[0].in_reply_to.as_deref(), Some("<q1@client.example>"));
    assert_eq!(
        sent[0].references.as_deref(),
        Some("<root@client.example> <q1@client.example>")
    );

    // The reply row exists, is threaded, and is already marked responded.
    let reply = messages::find_by_external_id(&pool, &sent[0].message_id)
        .await
        .unwrap()
        .expect("reply row stored");
    assert!(reply.responded);
    assert_eq!(reply.from_addr, ASSISTANT);
    assert_eq!(reply.in_reply_to.as_deref(), Some("<q1@client.example>"));

    // 2 sources + 1 reply.
    assert_eq!(messages::count(&pool).await.unwrap(), 3);
}

#[tokio::test]
async fn idle_when_nothing_is_unanswered() {
    let pool = store::open_in_memory().await.unwrap();
    let embedder = MockEmbedder::uniform(2);
    let chat = MockChat::replying("unused");
    let transport = MockTransport::empty();
    let mail = mail_config();

    let alice = correspondents::get_or_create(&pool, ALICE, "Alice").await.unwrap();

    let engine = ReplyEngine::new(&pool, &chat, &embedder, &transport, &mail, None);
    let outcome = engine.run_cycle(&alice).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Idle);
    assert!(chat.seen.lock().unwrap().is_empty());
    assert_eq!(transport.sent_count(), 0);
}

// =============================================================
// Failure paths
// =============================================================

#[tokio::test]
async fn model_failure_leaves_state_unchanged() {
    let pool = store::open_in_memory().await.unwrap();
    let embedder = MockEmbedder::uniform(2);
    let chat = MockChat::failing();
    let transport = MockTransport::empty();
    let mail = mail_config();

    let alice = correspondents::get_or_create(&pool, ALICE, "Alice").await.unwrap();
    seed_unanswered(&pool, alice.id).await;

    let engine = ReplyEngine::new(&pool, &chat, &embedder, &transport, &mail, None);
    let outcome = engine.run_cycle(&alice).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Aborted);
    // Nothing persisted, nothing sent, nothing marked: the same batch is
    // retried on the next tick.
    assert_eq!(messages::count(&pool).await.unwrap(), 2);
    assert_eq!(messages::unresponded_for(&pool, alice.id).await.unwrap().len(), 2);
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test]
async fn send_failure_after_persist_does_not_mark_sources() {
    let pool = store::open_in_memory().await.unwrap();
    let embedder = MockEmbedder::uniform(2);
    let chat = MockChat::replying("A reply that will never be delivered.");
    let transport = MockTransport::failing_send();
    let mail = mail_config();

    let alice = correspondents::get_or_create(&pool, ALICE, "Alice").await.unwrap();
    seed_unanswered(&pool, alice.id).await;

    let engine = ReplyEngine::new(&pool, &chat, &embedder, &transport, &mail, None);
    let outcome = engine.run_cycle(&alice).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Aborted);
    // The reply row was persisted before the send attempt, but the sources
    // must stay unanswered so their input is not silently lost.
    assert_eq!(messages::count(&pool).await.unwrap(), 3);
    assert_eq!(messages::unresponded_for(&pool, alice.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn reasoning_blocks_never_reach_store_or_wire() {
    let pool = store::open_in_memory().await.unwrap();
    let embedder = MockEmbedder::uniform(2);
    let chat = MockChat::replying("<think>should I agree? yes</think>Agreed, let's proceed.");
    let transport = MockTransport::empty();
    let mail = mail_config();

    let alice = correspondents::get_or_create(&pool, ALICE, "Alice").await.unwrap();
    seed_unanswered(&pool, alice.id).await;

    let engine = ReplyEngine::new(&pool, &chat, &embedder, &transport, &mail, None);
    engine.run_cycle(&alice).await.unwrap();

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent[0].body, "Agreed, let's proceed.");

    let reply = messages::find_by_external_id(&pool, &sent[0].message_id)
        .await
        .unwrap()
        .expect("reply row stored");
    assert_eq!(reply.body, "Agreed, let's proceed.");
}
