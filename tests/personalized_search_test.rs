mod helpers;

use std::sync::Arc;

use helpers::{mixed_embedding, test_db, test_embedding, test_engine, TableEmbedder};
use circles::retrieval::PersonalizedRetrievalService;
use circles::store::{circles as circle_store, items, memberships, MembershipSource};
use std::time::Duration;
use uuid::Uuid;

/// Query "q" points along axis 0. "member" sits at 0.8 from it and is placed in a
/// circle; "loner" sits at 0.85 but belongs nowhere.
fn scenario_embedder() -> TableEmbedder {
    TableEmbedder::new(&[
        ("q", test_embedding(0)),
        ("member", mixed_embedding(&[(0, 0.8), (1, 0.6)])),
        ("loner", mixed_embedding(&[(0, 0.85), (2, (1.0f32 - 0.85 * 0.85).sqrt())])),
        ("suggested", mixed_embedding(&[(0, 0.8), (3, 0.6)])),
    ])
}

#[test]
fn circle_membership_outranks_higher_base_similarity() {
    let tmp = tempfile::TempDir::new().unwrap();
    let engine = test_engine(tmp.path(), Arc::new(scenario_embedder()));
    let owner = Uuid::now_v7();

    let work = engine.create_circle(owner, "Work", None).unwrap();
    let member = engine.create_item(owner, "member", None).unwrap().item;
    let loner = engine.create_item(owner, "loner", None).unwrap().item;
    engine.assign_item(owner, member.id, work.id).unwrap();

    let hits = engine.search(owner, "q", 5).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].ranked.item_id, member.id);
    assert_eq!(hits[0].content, "member");

    // 0.4 * 0.8 + 0.4 * 0.8 + 0.15
    assert!((hits[0].ranked.base_similarity - 0.8).abs() < 1e-3);
    assert!((hits[0].ranked.centroid_similarity - 0.8).abs() < 1e-3);
    assert!((hits[0].ranked.final_score - 0.79).abs() < 1e-3);

    // No circle: 0.4 * base only.
    assert_eq!(hits[1].ranked.item_id, loner.id);
    assert_eq!(hits[1].ranked.centroid_similarity, 0.0);
    assert!((hits[1].ranked.final_score - 0.34).abs() < 1e-3);
}

#[test]
fn low_confidence_suggestion_is_penalized_not_boosted() {
    let tmp = tempfile::TempDir::new().unwrap();
    let engine = test_engine(tmp.path(), Arc::new(scenario_embedder()));
    let owner = Uuid::now_v7();

    let work = engine.create_circle(owner, "Work", None).unwrap();
    let member = engine.create_item(owner, "member", None).unwrap().item;
    let suggested = engine.create_item(owner, "suggested", None).unwrap().item;
    engine.assign_item(owner, member.id, work.id).unwrap();
    engine.accept_suggestion(owner, suggested.id, work.id, 0.3).unwrap();

    let hits = engine.search(owner, "q", 5).unwrap();
    let by_id = |id| hits.iter().find(|h| h.ranked.item_id == id).unwrap();
    let member_hit = by_id(member.id);
    let suggested_hit = by_id(suggested.id);

    // Same base and centroid similarity; boost vs penalty separates them.
    assert!((member_hit.ranked.base_similarity - suggested_hit.ranked.base_similarity).abs() < 1e-4);
    let gap = member_hit.ranked.final_score - suggested_hit.ranked.final_score;
    assert!((gap - 0.20).abs() < 1e-4, "gap was {gap}");
}

#[test]
fn foreign_items_never_surface() {
    let tmp = tempfile::TempDir::new().unwrap();
    let engine = test_engine(tmp.path(), Arc::new(scenario_embedder()));
    let alice = Uuid::now_v7();
    let bob = Uuid::now_v7();

    engine.create_item(bob, "member", None).unwrap();
    engine.create_item(bob, "loner", None).unwrap();
    let mine = engine.create_item(alice, "suggested", None).unwrap().item;

    let hits = engine.search(alice, "q", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].ranked.item_id, mine.id);
}

#[test]
fn deleted_items_drop_out_of_results() {
    let tmp = tempfile::TempDir::new().unwrap();
    let engine = test_engine(tmp.path(), Arc::new(scenario_embedder()));
    let owner = Uuid::now_v7();

    let gone = engine.create_item(owner, "member", None).unwrap().item;
    let kept = engine.create_item(owner, "loner", None).unwrap().item;
    engine.delete_item(owner, gone.id).unwrap();

    let hits = engine.search(owner, "q", 10).unwrap();
    let ids: Vec<_> = hits.iter().map(|h| h.ranked.item_id).collect();
    assert_eq!(ids, vec![kept.id]);
}

#[test]
fn centroid_change_invalidates_cached_signals() {
    let tmp = tempfile::TempDir::new().unwrap();
    let engine = test_engine(tmp.path(), Arc::new(scenario_embedder()));
    let owner = Uuid::now_v7();

    let work = engine.create_circle(owner, "Work", None).unwrap();
    let member = engine.create_item(owner, "member", None).unwrap().item;

    let before = engine.search(owner, "q", 5).unwrap();
    assert_eq!(before[0].ranked.centroid_similarity, 0.0);

    engine.assign_item(owner, member.id, work.id).unwrap();
    let after = engine.search(owner, "q", 5).unwrap();
    assert!(after[0].ranked.centroid_similarity > 0.79);

    let stats = engine.stats(Some(owner)).unwrap();
    assert!(stats.cache_misses >= 2);
}

#[test]
fn context_block_lists_hits_with_circles() {
    let tmp = tempfile::TempDir::new().unwrap();
    let engine = test_engine(tmp.path(), Arc::new(scenario_embedder()));
    let owner = Uuid::now_v7();

    let work = engine.create_circle(owner, "Work", None).unwrap();
    let member = engine.create_item(owner, "member", Some("keeps me focused")).unwrap().item;
    engine.create_item(owner, "loner", None).unwrap();
    engine.assign_item(owner, member.id, work.id).unwrap();

    let context = engine.context_for_query(owner, "q", 5, None).unwrap();
    let expected = "From your saved items:\n\n\
        1. \"member\" (meaning: keeps me focused) [Circle: Work]\n\
        2. \"loner\" [Circle: Uncategorized]\n\
        \n\
        Based on your circles, you care about Work.";
    assert_eq!(context, expected);

    let empty = engine.context_for_query(Uuid::now_v7(), "q", 5, None).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn invalid_search_input_is_rejected() {
    let tmp = tempfile::TempDir::new().unwrap();
    let engine = test_engine(tmp.path(), Arc::new(scenario_embedder()));
    let owner = Uuid::now_v7();
    assert!(engine.search(owner, "q", 0).unwrap_err().is_validation());
    assert!(engine.search(owner, "   ", 5).unwrap_err().is_validation());
}

#[test]
fn rerank_without_circles_keeps_candidate_order() {
    let conn = test_db();
    let owner = Uuid::now_v7();
    let a = items::insert_item(&conn, owner, "a", None).unwrap();
    let b = items::insert_item(&conn, owner, "b", None).unwrap();
    let service = PersonalizedRetrievalService::new(384, 10, Duration::from_secs(60));

    let ranked = service
        .retrieve_and_rerank(&conn, &test_embedding(0), owner, &[(a, 0.9), (b, 0.8)], 10)
        .unwrap();
    assert_eq!(ranked[0].item_id, a);
    assert!((ranked[0].final_score - 0.36).abs() < 1e-6);
    assert!((ranked[1].final_score - 0.32).abs() < 1e-6);
}

#[test]
fn user_assignment_boost_is_exact() {
    let conn = test_db();
    let owner = Uuid::now_v7();
    let a = items::insert_item(&conn, owner, "a", None).unwrap();
    let b = items::insert_item(&conn, owner, "b", None).unwrap();
    // Circle with no centroid: memberships carry the signal, centroid similarity stays 0.
    let circle = circle_store::insert_circle(&conn, owner, "Empty centroid", None).unwrap();
    memberships::insert_membership(&conn, a, circle, MembershipSource::User).unwrap();
    memberships::insert_membership(&conn, b, circle, MembershipSource::Suggested { confidence: 0.9 }).unwrap();

    let service = PersonalizedRetrievalService::new(384, 10, Duration::from_secs(60));
    let ranked = service
        .retrieve_and_rerank(&conn, &test_embedding(0), owner, &[(a, 0.5), (b, 0.5)], 10)
        .unwrap();
    let diff = ranked[0].final_score - ranked[1].final_score;
    assert_eq!(ranked[0].item_id, a);
    assert!((diff - 0.15).abs() < 1e-6);
}
