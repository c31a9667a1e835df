mod common;

use chrono::{TimeZone, Utc};

use common::MockEmbedder;
use epistle::command::parse;
use epistle::context::ContextAssembler;
use epistle::store::messages::{self, NewMessage};
use epistle::store::{self, SqlitePool, correspondents, memories};
use epistle::types::{FragmentOrigin, render_history};

const ASSISTANT: &str = "bot@assistant.example";
const ALICE: &str = "alice@client.example";

fn message(
    correspondent_id: i64,
    external_id: &str,
    from: &str,
    body: &str,
    hour: u32,
    responded: bool,
) -> NewMessage {
    let (from_addr, to_addr) = if from == ASSISTANT {
        (ASSISTANT, ALICE)
    } else {
        (ALICE, ASSISTANT)
    };
    NewMessage {
        correspondent_id,
        thread_key: None,
        external_id: external_id.to_string(),
        in_reply_to: None,
        to_addr: to_addr.to_string(),
        to_name: String::new(),
        from_addr: from_addr.to_string(),
        from_name: String::new(),
        subject: "Planning".to_string(),
        body: body.to_string(),
        received_at: Utc.with_ymd_and_hms(2025, 5, 14, hour, 0, 0).unwrap(),
        responded,
    }
}

async fn seed_daily_memory(pool: &SqlitePool, correspondent_id: i64, day: u32, text: &str) {
    let memory = memories::NewMemory {
        correspondent_id,
        kind: memories::MemoryKind::Daily,
        text: text.to_string(),
        period_start: Utc.with_ymd_and_hms(2025, 5, day, 0, 0, 0).unwrap(),
        period_end: Utc.with_ymd_and_hms(2025, 5, day + 1, 0, 0, 0).unwrap(),
    };
    memories::insert_with_embedding(pool, &memory, "mock-embed", &[1.0, 1.0, 0.0, 0.0])
        .await
        .unwrap();
}

// =============================================================
// Assembly order
// =============================================================

#[tokio::test]
async fn assembly_emits_memories_then_same_day_turns_then_active_request() {
    let pool = store::open_in_memory().await.unwrap();
    let embedder = MockEmbedder::uniform(4);
    let alice = correspondents::get_or_create(&pool, ALICE, "Alice").await.unwrap();

    seed_daily_memory(&pool, alice.id, 13, "Yesterday we planned the rollout.").await;

    // Morning exchange, already answered.
    for (id, from, body, hour) in [
        ("<t1@c>", ALICE, "Morning! Can we move the call?", 8),
        ("<t2@c>", ASSISTANT, "Of course, how about 3pm?", 9),
    ] {
        messages::insert_with_embedding(
            &pool,
            &message(alice.id, id, from, body, hour, true),
            "mock-embed",
            &[1.0, 1.0, 1.0, 1.0],
        )
        .await
        .unwrap();
    }

    // Three unanswered messages; the newest disables similarity retrieval
    // so the expected shape is exact.
    for (id, body, hour) in [
        ("<u1@c>", "First question about the budget.", 10),
        ("<u2@c>", "Second thought: the venue.", 11),
        ("<u3@c>", "Also, invites. /embeds[F]", 12),
    ] {
        messages::insert_with_embedding(
            &pool,
            &message(alice.id, id, ALICE, body, hour, false),
            "mock-embed",
            &[1.0, 1.0, 1.0, 1.0],
        )
        .await
        .unwrap();
    }

    let batch = messages::unresponded_for(&pool, alice.id).await.unwrap();
    assert_eq!(batch.len(), 3);
    let config = parse(&batch[2].body);

    let assembler = ContextAssembler::new(&pool, &embedder, ASSISTANT);
    let fragments = assembler.assemble(&alice, &batch, &config).await;

    // One memory block (only one exists), two same-day turns, active last.
    assert_eq!(fragments.len(), 4);
    assert!(matches!(
        fragments[0].origin,
        FragmentOrigin::MemorySummary { kind: memories::MemoryKind::Daily, .. }
    ));
    assert!(fragments[0].text.contains("[DAILY SUMMARY"));
    assert!(fragments[0].text.contains("rollout"));

    assert_eq!(
        fragments[1].origin,
        FragmentOrigin::TodayMessage { from_assistant: false }
    );
    assert_eq!(
        fragments[2].origin,
        FragmentOrigin::TodayMessage { from_assistant: true }
    );

    assert_eq!(fragments[3].origin, FragmentOrigin::ActiveRequest);
    assert!(fragments[3].text.contains("First question"));
    assert!(fragments[3].text.contains("invites."));
    // The directive itself never reaches the model.
    assert!(!fragments[3].text.contains("/embeds"));

    // Rendering keeps the active request as the final user turn.
    let history = render_history("system prompt", &fragments);
    let last = history.last().unwrap();
    assert_eq!(last.role, "user");
    assert!(last.content.contains("invites."));
    assert_eq!(history[2].role, "user");
    assert_eq!(history[3].role, "assistant");
}

#[tokio::test]
async fn memory_retrieval_respects_the_daily_limit() {
    let pool = store::open_in_memory().await.unwrap();
    let embedder = MockEmbedder::uniform(4);
    let alice = correspondents::get_or_create(&pool, ALICE, "Alice").await.unwrap();

    for day in 10..=13 {
        seed_daily_memory(&pool, alice.id, day, &format!("notes for day {day}")).await;
    }
    messages::insert_with_embedding(
        &pool,
        &message(alice.id, "<u1@c>", ALICE, "hello /embeds[F]", 10, false),
        "mock-embed",
        &[1.0, 1.0, 1.0, 1.0],
    )
    .await
    .unwrap();

    let batch = messages::unresponded_for(&pool, alice.id).await.unwrap();
    let config = parse(&batch[0].body);

    let assembler = ContextAssembler::new(&pool, &embedder, ASSISTANT);
    let fragments = assembler.assemble(&alice, &batch, &config).await;

    // Default daily limit is 2, newest first.
    let memory_blocks: Vec<_> = fragments
        .iter()
        .filter(|f| matches!(f.origin, FragmentOrigin::MemorySummary { .. }))
        .collect();
    assert_eq!(memory_blocks.len(), 2);
    assert!(memory_blocks[0].text.contains("day 13"));
    assert!(memory_blocks[1].text.contains("day 12"));
}

// =============================================================
// Similarity retrieval
// =============================================================

#[tokio::test]
async fn similarity_matches_exclude_the_active_batch() {
    let pool = store::open_in_memory().await.unwrap();
    let embedder = MockEmbedder::uniform(4);
    let alice = correspondents::get_or_create(&pool, ALICE, "Alice").await.unwrap();

    // An old answered message, identical vector to the query.
    messages::insert_with_embedding(
        &pool,
        &message(alice.id, "<old@c>", ALICE, "The old venue discussion.", 7, true),
        "mock-embed",
        &[1.0, 1.0, 1.0, 1.0],
    )
    .await
    .unwrap();

    // The unanswered message itself also matches perfectly but must not be
    // retrieved as context for itself.
    messages::insert_with_embedding(
        &pool,
        &message(alice.id, "<u1@c>", ALICE, "Venue again? /remember[FE]", 10, false),
        "mock-embed",
        &[1.0, 1.0, 1.0, 1.0],
    )
    .await
    .unwrap();

    let batch = messages::unresponded_for(&pool, alice.id).await.unwrap();
    let config = parse(&batch[0].body);

    let assembler = ContextAssembler::new(&pool, &embedder, ASSISTANT);
    let fragments = assembler.assemble(&alice, &batch, &config).await;

    let matches: Vec<_> = fragments
        .iter()
        .filter(|f| matches!(f.origin, FragmentOrigin::SimilarityMatch { .. }))
        .collect();
    assert_eq!(matches.len(), 1);
    assert!(matches[0].text.contains("old venue"));
    assert!(!matches[0].text.contains("Venue again"));
}

#[tokio::test]
async fn equal_scores_rank_the_newer_candidate_first() {
    let pool = store::open_in_memory().await.unwrap();
    let embedder = MockEmbedder::uniform(4);
    let alice = correspondents::get_or_create(&pool, ALICE, "Alice").await.unwrap();

    // Two memories with identical vectors: cosine against any query is
    // equal, so recency must decide.
    seed_daily_memory(&pool, alice.id, 12, "older identical memory").await;
    seed_daily_memory(&pool, alice.id, 13, "newer identical memory").await;

    messages::insert_with_embedding(
        &pool,
        &message(alice.id, "<u1@c>", ALICE, "query /remember[FE] /embeds[T,1]", 10, false),
        "mock-embed",
        &[1.0, 1.0, 1.0, 1.0],
    )
    .await
    .unwrap();

    let batch = messages::unresponded_for(&pool, alice.id).await.unwrap();
    let config = parse(&batch[0].body);
    assert_eq!(config.embeds.topk, 1);

    let assembler = ContextAssembler::new(&pool, &embedder, ASSISTANT);
    let fragments = assembler.assemble(&alice, &batch, &config).await;

    let matches: Vec<_> = fragments
        .iter()
        .filter(|f| matches!(f.origin, FragmentOrigin::SimilarityMatch { .. }))
        .collect();
    assert_eq!(matches.len(), 1);
    assert!(matches[0].text.contains("newer identical memory"));
}

// =============================================================
// Degraded retrieval
// =============================================================

#[tokio::test]
async fn assembly_on_an_empty_store_still_produces_the_active_turn() {
    let pool = store::open_in_memory().await.unwrap();
    let embedder = MockEmbedder::uniform(4);
    let alice = correspondents::get_or_create(&pool, ALICE, "Alice").await.unwrap();

    messages::insert_with_embedding(
        &pool,
        &message(alice.id, "<u1@c>", ALICE, "hello there", 10, false),
        "mock-embed",
        &[1.0, 1.0, 1.0, 1.0],
    )
    .await
    .unwrap();

    let batch = messages::unresponded_for(&pool, alice.id).await.unwrap();
    let config = parse(&batch[0].body);

    let assembler = ContextAssembler::new(&pool, &embedder, ASSISTANT);
    let fragments = assembler.assemble(&alice, &batch, &config).await;

    assert_eq!(fragments.last().unwrap().origin, FragmentOrigin::ActiveRequest);
    assert!(fragments.last().unwrap().text.contains("hello there"));
}
