// Integration tests for the pairing flow: queue protocol, event delivery,
// and the hand-off from matchmaker to match actor.

use std::sync::Arc;
use std::time::Duration;

use fightclaw_backend::auth;
use fightclaw_backend::db::Database;
use fightclaw_backend::engine::skirmish::SkirmishEngine;
use fightclaw_backend::events::{MatchmakerEvent, StreamEvent};
use fightclaw_backend::match_actor::MatchActorConfig;
use fightclaw_backend::matchmaker::{self, MatchmakerHandle, QueuePhase, StatusReply};
use fightclaw_backend::registry::MatchRegistry;

async fn setup() -> (Arc<Database>, MatchmakerHandle, MatchRegistry) {
    sqlx::any::install_default_drivers();
    let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
    for (id, name) in [("ag_alpha", "alpha"), ("ag_beta", "beta"), ("ag_gamma", "gamma")] {
        db.create_agent(id, name, &format!("kh_{id}"), &format!("ch_{id}"))
            .await
            .unwrap();
        db.verify_agent(id).await.unwrap();
    }
    let registry = MatchRegistry::new(
        Arc::new(SkirmishEngine::new()),
        db.clone(),
        MatchActorConfig {
            turn_timeout_ms: 30_000,
            disconnect_grace_ms: 15_000,
            subscriber_backlog_max: 256,
            elo_k_factor: 32.0,
        },
        60_000,
    );
    let mm = matchmaker::spawn(db.clone(), registry.clone(), 25);
    (db, mm, registry)
}

#[tokio::test]
async fn test_register_verify_flow() {
    sqlx::any::install_default_drivers();
    let db = Database::new("sqlite::memory:").await.unwrap();

    let pepper = "test-pepper";
    let api_key = auth::generate_api_key();
    let claim_code = auth::generate_claim_code();
    let agent = db
        .create_agent(
            "ag_new",
            "newcomer",
            &auth::hash_secret(pepper, &api_key),
            &auth::hash_secret(pepper, &claim_code),
        )
        .await
        .unwrap();
    assert!(agent.verified_at.is_none());

    // The claim code resolves the agent and verification is recorded.
    let found = db
        .find_agent_by_claim_hash(&auth::hash_secret(pepper, &claim_code))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, "ag_new");

    let verified = db.verify_agent("ag_new").await.unwrap().unwrap();
    assert!(verified.verified_at.is_some());

    // The issued key authenticates.
    db.insert_api_key(
        "key_1",
        "ag_new",
        &auth::hash_secret(pepper, &api_key),
        &auth::key_display_prefix(&api_key),
    )
    .await
    .unwrap();
    let key = db
        .get_api_key_by_hash(&auth::hash_secret(pepper, &api_key))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(key.agent_id, "ag_new");
}

#[tokio::test]
async fn test_happy_pairing_end_to_end() {
    let (db, mm, registry) = setup().await;

    // alpha joins: waiting.
    let a = mm.join_queue("ag_alpha").await.unwrap();
    assert_eq!(a.status, QueuePhase::Waiting);

    // beta joins: ready, same match.
    let b = mm.join_queue("ag_beta").await.unwrap();
    assert_eq!(b.status, QueuePhase::Ready);
    assert_eq!(b.match_id, a.match_id);

    // Each receives exactly one match_found naming the opponent.
    let ev_a = mm
        .wait_events("ag_alpha", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(
        ev_a,
        MatchmakerEvent::MatchFound {
            match_id: a.match_id.clone(),
            opponent: "ag_beta".into(),
        }
    );
    let ev_b = mm
        .wait_events("ag_beta", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(
        ev_b,
        MatchmakerEvent::MatchFound {
            match_id: a.match_id.clone(),
            opponent: "ag_alpha".into(),
        }
    );
    // No second notification.
    assert_eq!(
        mm.wait_events("ag_alpha", Duration::from_millis(0))
            .await
            .unwrap(),
        MatchmakerEvent::NoEvents
    );

    // Both subscribe and receive an initial state snapshot.
    let handle = registry.get(&a.match_id).unwrap();
    for agent in ["ag_alpha", "ag_beta"] {
        let mut sub = handle.subscribe(Some(agent.into())).await.unwrap();
        match sub.next().await {
            Some(StreamEvent::State { match_id, state, .. }) => {
                assert_eq!(match_id, a.match_id);
                assert_eq!(state["stateVersion"], 0);
            }
            other => panic!("expected initial state, got {other:?}"),
        }
    }

    // Seats and starting ratings were recorded.
    let players = db.get_match_players(&a.match_id).await.unwrap();
    assert_eq!(players.len(), 2);
    assert_eq!(players[0].agent_id, "ag_alpha");
    assert_eq!(players[0].seat, 0);
    assert_eq!(players[0].starting_rating, 1500);
    assert_eq!(players[1].agent_id, "ag_beta");
    assert_eq!(players[1].seat, 1);

    // The match row is active.
    let m = db.get_match(&a.match_id).await.unwrap().unwrap();
    assert_eq!(m.status, "active");
}

#[tokio::test]
async fn test_repeated_join_is_stable_until_opponent_arrives() {
    let (_db, mm, _registry) = setup().await;

    let first = mm.join_queue("ag_alpha").await.unwrap();
    for _ in 0..5 {
        let again = mm.join_queue("ag_alpha").await.unwrap();
        assert_eq!(again.match_id, first.match_id);
        assert_eq!(again.status, QueuePhase::Waiting);
    }

    let paired = mm.join_queue("ag_beta").await.unwrap();
    assert_eq!(paired.match_id, first.match_id);
    assert_eq!(paired.status, QueuePhase::Ready);
}

#[tokio::test]
async fn test_leave_then_fresh_pairing() {
    let (_db, mm, _registry) = setup().await;

    let first = mm.join_queue("ag_alpha").await.unwrap();
    mm.leave_queue("ag_alpha").await.unwrap();
    assert!(matches!(
        mm.queue_status("ag_alpha").await.unwrap(),
        StatusReply::Idle
    ));

    // beta joining now starts a new pending match instead of pairing.
    let b = mm.join_queue("ag_beta").await.unwrap();
    assert_eq!(b.status, QueuePhase::Waiting);
    assert_ne!(b.match_id, first.match_id);

    // leave by a non-holder is a no-op.
    mm.leave_queue("ag_gamma").await.unwrap();
    match mm.queue_status("ag_beta").await.unwrap() {
        StatusReply::Waiting { match_id } => assert_eq!(match_id, b.match_id),
        other => panic!("expected waiting, got {other:?}"),
    }
}

#[tokio::test]
async fn test_wait_events_timeout_zero() {
    let (_db, mm, _registry) = setup().await;
    let ev = mm
        .wait_events("ag_alpha", Duration::from_secs(0))
        .await
        .unwrap();
    assert_eq!(ev, MatchmakerEvent::NoEvents);
}

#[tokio::test]
async fn test_pairing_uses_current_ratings() {
    let (db, mm, _registry) = setup().await;

    // Give beta a rating history by recording an earlier match result.
    db.record_match_created("m_prior", 1).await.unwrap();
    db.record_match_result(
        "m_prior",
        Some("ag_beta"),
        Some("ag_gamma"),
        "terminal",
        3,
        &[
            fightclaw_backend::db::PlayerRatingUpdate {
                agent_id: "ag_beta".into(),
                new_rating: 1516,
                outcome: fightclaw_backend::elo::Outcome::Win,
            },
            fightclaw_backend::db::PlayerRatingUpdate {
                agent_id: "ag_gamma".into(),
                new_rating: 1484,
                outcome: fightclaw_backend::elo::Outcome::Loss,
            },
        ],
    )
    .await
    .unwrap();

    mm.join_queue("ag_alpha").await.unwrap();
    let paired = mm.join_queue("ag_beta").await.unwrap();

    let players = db.get_match_players(&paired.match_id).await.unwrap();
    let beta = players.iter().find(|p| p.agent_id == "ag_beta").unwrap();
    assert_eq!(beta.starting_rating, 1516);
    let alpha = players.iter().find(|p| p.agent_id == "ag_alpha").unwrap();
    assert_eq!(alpha.starting_rating, 1500);
}
