//! Leaderboard freshness, ordering determinism, subscriber fan-out, and the
//! anomaly monitor end to end.

use podium::config::Config;
use podium::core::{ErrorCode, Limits};
use podium::service::DropReason;
use podium::test_harness::{principal, request, world};

fn config(top_k: usize) -> Config {
    Config {
        limits: Limits {
            top_k,
            ..Limits::default()
        },
        ..Config::default()
    }
}

#[test]
fn membership_change_is_visible_without_ttl_wait() {
    let w = world(config(2));
    w.service.submit(&principal("alice"), &request(100)).unwrap();
    w.service.submit(&principal("bob"), &request(90)).unwrap();
    w.service.submit(&principal("carol"), &request(95)).unwrap();

    // No clock movement: the commit itself refreshed the ranking.
    let snap = w.service.leaderboard().unwrap();
    let names: Vec<&str> = snap.entries().iter().map(|e| e.principal_id.as_str()).collect();
    assert_eq!(names, vec!["alice", "carol"]);
}

#[test]
fn irrelevant_commits_serve_the_cached_snapshot_until_ttl() {
    let w = world(config(1));
    w.service.submit(&principal("alice"), &request(100)).unwrap();
    let first = w.service.leaderboard().unwrap();

    // Below the lowest top-K score: snapshot untouched, same generation.
    w.service.submit(&principal("bob"), &request(50)).unwrap();
    let second = w.service.leaderboard().unwrap();
    assert_eq!(second.generated_at_ms, first.generated_at_ms);
    assert_eq!(second.len(), 1);

    // Past the TTL a query recomputes even with no relevant commit.
    w.clock.advance_ms(Limits::default().snapshot_ttl_ms + 1);
    let third = w.service.leaderboard().unwrap();
    assert!(third.generated_at_ms > first.generated_at_ms);
    assert_eq!(
        third.entries()[0].principal_id,
        principal("alice"),
        "ranking unchanged by the recompute"
    );
}

#[test]
fn equal_scores_order_by_ascending_principal_id() {
    let w = world(config(10));
    w.service.submit(&principal("zara"), &request(70)).unwrap();
    w.service.submit(&principal("adam"), &request(70)).unwrap();

    for _ in 0..3 {
        let snap = w.service.leaderboard().unwrap();
        let names: Vec<&str> = snap.entries().iter().map(|e| e.principal_id.as_str()).collect();
        assert_eq!(names, vec!["adam", "zara"], "stable across repeated queries");
        assert_eq!(snap.entries()[0].rank, 1);
        assert_eq!(snap.entries()[1].rank, 2);
    }
}

#[test]
fn subscribers_see_rank_changes_with_gapless_sequences() {
    let w = world(config(2));
    let sub = w.service.subscribe().unwrap();

    w.service.submit(&principal("alice"), &request(100)).unwrap();
    w.service.submit(&principal("bob"), &request(50)).unwrap();

    let first = sub.try_recv().expect("alice entering broadcasts");
    assert_eq!(first.sequence, 1);
    assert_eq!(first.changed_principals, vec![principal("alice")]);

    let second = sub.try_recv().expect("bob entering broadcasts");
    assert_eq!(second.sequence, 2);
    assert_eq!(second.changed_principals, vec![principal("bob")]);

    // A score bump that leaves the order intact is suppressed.
    w.service.submit(&principal("alice"), &request(10)).unwrap();
    assert!(sub.try_recv().is_err());

    // A rank swap reaches the subscriber with the next sequence.
    w.service.submit(&principal("bob"), &request(100)).unwrap();
    let third = sub.try_recv().expect("rank swap broadcasts");
    assert_eq!(third.sequence, 3);
    assert_eq!(
        third.changed_principals,
        vec![principal("alice"), principal("bob")]
    );
    let names: Vec<&str> = third.entries.iter().map(|e| e.principal_id.as_str()).collect();
    assert_eq!(names, vec!["bob", "alice"]);
}

#[test]
fn slow_subscriber_is_dropped_without_stalling_writes() {
    let mut cfg = config(10);
    cfg.limits.subscriber_queue_max_updates = 1;
    let w = world(cfg);

    let slow = w.service.subscribe().unwrap();
    w.service.submit(&principal("alice"), &request(10)).unwrap();
    w.service.submit(&principal("bob"), &request(20)).unwrap();
    w.service.submit(&principal("carol"), &request(30)).unwrap();

    assert_eq!(slow.drop_reason(), Some(DropReason::SubscriberLagged));
    // Writes kept committing while the subscriber lagged.
    assert_eq!(w.service.ledger().action_count().unwrap(), 3);

    // A fresh subscriber starts clean at sequence 1.
    let fresh = w.service.subscribe().unwrap();
    w.service.submit(&principal("dave"), &request(40)).unwrap();
    assert_eq!(fresh.try_recv().unwrap().sequence, 1);
}

#[test]
fn subscriber_limit_surfaces_as_overloaded() {
    let mut cfg = config(10);
    cfg.limits.max_subscribers = 1;
    let w = world(cfg);

    let _keep = w.service.subscribe().unwrap();
    let err = w.service.subscribe().expect_err("limit enforced");
    assert_eq!(err.code, ErrorCode::Overloaded);
}

#[test]
fn high_value_burst_is_flagged_without_blocking_commits() {
    let mut cfg = config(10);
    cfg.anomaly.high_value_threshold = 100;
    cfg.anomaly.burst_count = 3;
    cfg.anomaly.burst_window_ms = 10_000;
    let w = world(cfg);
    let p = principal("mallory");

    for _ in 0..6 {
        w.service.submit(&p, &request(200)).expect("flags never reject commits");
    }
    w.service.shutdown();

    let flags = w.audit.flags();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].principal_id, p);
    assert_eq!(flags[0].rule, "high_value_burst");

    // Every burst action still committed.
    assert_eq!(
        w.service.ledger().aggregate(&p).unwrap().unwrap().total_actions,
        6
    );
}

#[test]
fn quiet_traffic_raises_no_flags() {
    let w = world(config(10));
    for name in ["alice", "bob"] {
        for _ in 0..5 {
            w.service.submit(&principal(name), &request(10)).unwrap();
        }
    }
    w.service.shutdown();
    assert!(w.audit.flags().is_empty());
}
