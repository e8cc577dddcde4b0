// Scrape engine behavior over in-memory fakes: seeding, single-post reporting,
// forced reporting, story debounce and failure classification.

mod common;

use chrono::Duration;
use common::{id, post, t, Harness};
use instawatch::clock::Clock;
use instawatch::instagram::fetcher::{FailureKind, FetchError};
use instawatch::pipeline::ScrapeMode;

fn alice_timeline(h: &Harness) {
    h.fetcher.set_posts(
        "alice",
        vec![post("p3", 300), post("p2", 200), post("p1", 100)],
    );
}

#[tokio::test(start_paused = true)]
async fn test_alice_seed_then_single_new_post() {
    let h = Harness::new();
    alice_timeline(&h);
    let alice = id("alice");

    // First scheduled scrape seeds silently.
    let outcome = h.engine.scrape(&alice, ScrapeMode::Scheduled).await.unwrap();
    assert!(outcome.seeded);
    assert_eq!(outcome.posts_notified, 0);
    assert!(h.sink.messages().is_empty());
    assert_eq!(h.dedup.get(&alice).unwrap().last_post_time, Some(t(300)));

    // Nothing new: nothing reported, state unchanged.
    let outcome = h.engine.scrape(&alice, ScrapeMode::Scheduled).await.unwrap();
    assert_eq!(outcome.notifications(), 0);
    assert!(!outcome.seeded);
    assert_eq!(h.dedup.get(&alice).unwrap().last_post_time, Some(t(300)));

    // One new post: exactly one notification.
    h.fetcher.publish("alice", post("p4", 400));
    let outcome = h.engine.scrape(&alice, ScrapeMode::Scheduled).await.unwrap();
    assert_eq!(outcome.posts_notified, 1);
    assert_eq!(outcome.delivered, 1);
    let texts = h.sink.texts_for("alice");
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("New post from `alice` at "));
    assert!(texts[0].ends_with("https://www.instagram.com/p/p4/"));
    assert_eq!(h.dedup.get(&alice).unwrap().last_post_time, Some(t(400)));
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_reports_at_most_one_post() {
    let h = Harness::new();
    alice_timeline(&h);
    let alice = id("alice");
    h.engine.scrape(&alice, ScrapeMode::Scheduled).await.unwrap();

    h.fetcher.publish("alice", post("p4", 400));
    h.fetcher.publish("alice", post("p5", 500));
    let outcome = h.engine.scrape(&alice, ScrapeMode::Scheduled).await.unwrap();

    assert_eq!(outcome.posts_notified, 1);
    let texts = h.sink.texts_for("alice");
    assert!(texts[0].ends_with("/p/p5/"));
    assert_eq!(h.dedup.get(&alice).unwrap().last_post_time, Some(t(500)));
}

#[tokio::test(start_paused = true)]
async fn test_forced_reports_everything_oldest_first() {
    let h = Harness::new();
    alice_timeline(&h);
    let alice = id("alice");

    let outcome = h.engine.scrape(&alice, ScrapeMode::Forced).await.unwrap();

    assert_eq!(outcome.posts_notified, 3);
    assert_eq!(outcome.delivered, 3);
    let texts = h.sink.texts_for("alice");
    assert!(texts[0].ends_with("/p/p1/"));
    assert!(texts[1].ends_with("/p/p2/"));
    assert!(texts[2].ends_with("/p/p3/"));
    assert_eq!(h.dedup.get(&alice).unwrap().last_post_time, Some(t(300)));
    // One destination lookup for the whole batch.
    assert_eq!(h.sink.ensured().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_forced_spaces_messages_to_the_same_destination() {
    let h = Harness::new();
    alice_timeline(&h);

    let started = tokio::time::Instant::now();
    h.engine.scrape(&id("alice"), ScrapeMode::Forced).await.unwrap();

    // Three messages, two gaps of two seconds.
    assert!(started.elapsed() >= std::time::Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_forced_is_capped_at_fifty_posts() {
    let h = Harness::new();
    let timeline = (1..=60).rev().map(|i| post(&format!("p{i}"), i * 10)).collect();
    h.fetcher.set_posts("alice", timeline);
    let alice = id("alice");

    let outcome = h.engine.scrape(&alice, ScrapeMode::Forced).await.unwrap();

    assert_eq!(outcome.posts_notified, 50);
    assert_eq!(h.sink.messages().len(), 50);
    assert_eq!(h.dedup.get(&alice).unwrap().last_post_time, Some(t(600)));
}

#[tokio::test(start_paused = true)]
async fn test_forced_with_state_reports_only_newer() {
    let h = Harness::new();
    alice_timeline(&h);
    let alice = id("alice");
    h.engine.scrape(&alice, ScrapeMode::Scheduled).await.unwrap();

    h.fetcher.publish("alice", post("p4", 400));
    h.fetcher.publish("alice", post("p5", 500));
    let outcome = h.engine.scrape(&alice, ScrapeMode::Forced).await.unwrap();

    assert_eq!(outcome.posts_notified, 2);
    let texts = h.sink.texts_for("alice");
    assert!(texts[0].ends_with("/p/p4/"));
    assert!(texts[1].ends_with("/p/p5/"));
}

#[tokio::test(start_paused = true)]
async fn test_story_debounced_for_a_day() {
    let h = Harness::new();
    alice_timeline(&h);
    h.fetcher.set_story("alice", true);
    let alice = id("alice");

    let outcome = h.engine.scrape(&alice, ScrapeMode::Scheduled).await.unwrap();
    assert!(outcome.story_notified);
    assert_eq!(
        h.sink.texts_for("alice"),
        vec!["Story URL for `alice`: https://instagram.com/stories/alice/".to_string()]
    );
    let first_story = h.clock.now();
    assert_eq!(h.dedup.get(&alice).unwrap().last_story_time, Some(first_story));
    assert_eq!(h.fetcher.story_probes(), 1);

    // Within the window: no notification and no probe.
    h.clock.advance(Duration::hours(23));
    let outcome = h.engine.scrape(&alice, ScrapeMode::Scheduled).await.unwrap();
    assert!(!outcome.story_notified);
    assert_eq!(h.fetcher.story_probes(), 1);

    // Exactly 24 hours is still suppressed.
    h.clock.set(first_story + Duration::hours(24));
    let outcome = h.engine.scrape(&alice, ScrapeMode::Scheduled).await.unwrap();
    assert!(!outcome.story_notified);

    // Strictly after 24 hours it's reported again.
    h.clock.advance(Duration::seconds(1));
    let outcome = h.engine.scrape(&alice, ScrapeMode::Scheduled).await.unwrap();
    assert!(outcome.story_notified);
    assert_eq!(h.sink.texts_for("alice").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_absent_story_records_nothing() {
    let h = Harness::new();
    alice_timeline(&h);
    let alice = id("alice");

    let outcome = h.engine.scrape(&alice, ScrapeMode::Scheduled).await.unwrap();
    assert!(!outcome.story_notified);
    assert_eq!(h.dedup.get(&alice).unwrap().last_story_time, None);
    // Probed again next time, since nothing was recorded.
    h.engine.scrape(&alice, ScrapeMode::Scheduled).await.unwrap();
    assert_eq!(h.fetcher.story_probes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_missing_and_private_accounts_fail_without_state() {
    let h = Harness::new();
    h.fetcher.set_private("secretive");

    let err = h
        .engine
        .scrape(&id("ghost"), ScrapeMode::Scheduled)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::NotFound);
    assert!(!err.is_retryable());

    let err = h
        .engine
        .scrape(&id("secretive"), ScrapeMode::Scheduled)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::PrivateOrRestricted);

    assert!(h.dedup.get(&id("ghost")).is_none());
    assert!(h.dedup.get(&id("secretive")).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retryable() {
    let h = Harness::new();
    alice_timeline(&h);
    h.fetcher
        .fail_resolve("alice", [FetchError::TransientNetwork("timed out".into())]);

    let err = h
        .engine
        .scrape(&id("alice"), ScrapeMode::Scheduled)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(h.dedup.get(&id("alice")).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_delivery_failures_are_counted_not_retried() {
    let h = Harness::new();
    alice_timeline(&h);
    h.sink.fail_sends(true);
    let alice = id("alice");

    let outcome = h.engine.scrape(&alice, ScrapeMode::Forced).await.unwrap();
    assert_eq!(outcome.delivered, 0);
    assert_eq!(outcome.delivery_failures, 3);
    // State still moved: the same posts aren't reported twice.
    assert_eq!(h.dedup.get(&alice).unwrap().last_post_time, Some(t(300)));

    h.sink.fail_sends(false);
    let outcome = h.engine.scrape(&alice, ScrapeMode::Forced).await.unwrap();
    assert_eq!(outcome.posts_notified, 0);
}

#[tokio::test(start_paused = true)]
async fn test_state_is_persisted_after_each_change() {
    let h = Harness::new();
    alice_timeline(&h);
    h.fetcher.set_story("alice", true);
    let alice = id("alice");

    h.engine.scrape(&alice, ScrapeMode::Scheduled).await.unwrap();

    let saved = h.db.saved_state();
    let entry = saved.get(&alice).unwrap();
    assert_eq!(entry.last_post_time, Some(t(300)));
    assert!(entry.last_story_time.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_empty_timeline_creates_entry() {
    let h = Harness::new();
    h.fetcher.set_posts("quiet", Vec::new());

    let outcome = h.engine.scrape(&id("quiet"), ScrapeMode::Scheduled).await.unwrap();
    assert!(!outcome.seeded);
    let entry = h.dedup.get(&id("quiet")).unwrap();
    assert_eq!(entry.last_post_time, None);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_scrapes_of_one_account_report_once() {
    let h = Harness::new();
    alice_timeline(&h);
    let alice = id("alice");

    let (a, b) = tokio::join!(
        h.engine.scrape(&alice, ScrapeMode::Forced),
        h.engine.scrape(&alice, ScrapeMode::Forced),
    );

    let total = a.unwrap().posts_notified + b.unwrap().posts_notified;
    assert_eq!(total, 3);
    assert_eq!(h.sink.texts_for("alice").len(), 3);
}
