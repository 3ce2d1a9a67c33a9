/// Derived triggers: bounties, class quest, familiar growth and the async dispatcher.
mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Duration;
use common::{at, day, harness, harness_with, teacher, Harness};
use starledger::ledger::{
    apply_star_award, buy_item, check_milestone, claim_bounty, create_bounty, list_bounties,
    load_asset, quest_history, quest_progress, quest_state, regenerate_pending_assets,
    run_for_event, set_calendar, AssetGenerator, BountyKind, BountyStatus, ClassCalendar,
    DomainEvent, FamiliarStage, LedgerError, TriggerDispatcher,
};

/// Sprite generator that can be switched off, counting calls.
struct SwitchableAssets {
    online: AtomicBool,
    calls: AtomicUsize,
}

impl SwitchableAssets {
    fn new(online: bool) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(online),
            calls: AtomicUsize::new(0),
        })
    }
}

impl AssetGenerator for SwitchableAssets {
    fn generate(&self, prompt: &str) -> Result<Vec<u8>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.online.load(Ordering::SeqCst) {
            Ok(prompt.as_bytes().to_vec())
        } else {
            Err("image backend unavailable".to_string())
        }
    }
}

/// Run triggers for every event recorded since `seen`, returning the new watermark.
fn run_pending(h: &Harness, seen: usize) -> usize {
    let events = h.sink.events();
    for event in &events[seen..] {
        run_for_event(&h.ctx, event);
    }
    events.len()
}

#[test]
fn test_milestone_completes_once_per_month() {
    let h = harness(at(2025, 3, 20));
    h.enrol("c1", &["s1", "s2"]);
    apply_star_award(&h.ctx, &teacher(), "s1", 15, "project").unwrap();
    assert!(check_milestone(&h.ctx, "c1").unwrap().is_none());
    apply_star_award(&h.ctx, &teacher(), "s2", 15, "project").unwrap();

    let record = check_milestone(&h.ctx, "c1").unwrap().unwrap();
    assert_eq!(record.goal_target, 30);
    assert_eq!(record.stars_earned, 30);
    assert_eq!(record.level_reached, 1);
    assert_eq!(record.month_key, "2025-03");
    assert!(check_milestone(&h.ctx, "c1").unwrap().is_none());

    assert_eq!(quest_history(&h.ctx, "c1").unwrap().len(), 1);
    assert_eq!(quest_state(&h.ctx, "c1").unwrap().difficulty_level, 1);
    let progress = quest_progress(&h.ctx, "c1").unwrap();
    assert!(progress.completed_this_month);
    assert_eq!(progress.goal_target, 36);
    let completions = h
        .sink
        .events()
        .iter()
        .filter(|e| matches!(e, DomainEvent::QuestCompleted { .. }))
        .count();
    assert_eq!(completions, 1);
}

#[test]
fn test_milestone_goal_shrinks_with_cancelled_lessons() {
    let h = harness(at(2025, 3, 20));
    h.enrol("c1", &["s1", "s2"]);
    let mut calendar = ClassCalendar::new("c1");
    calendar.lesson_days = (3..=24).step_by(7).map(|d| day(2025, 3, d)).collect();
    calendar.cancelled_days = vec![day(2025, 3, 10)];
    set_calendar(&h.ctx, &calendar).unwrap();

    // 4 scheduled, 3 held: ceil(2 * 15 * 0.75) = 23
    assert_eq!(quest_progress(&h.ctx, "c1").unwrap().goal_target, 23);
    apply_star_award(&h.ctx, &teacher(), "s1", 23, "project").unwrap();
    assert!(check_milestone(&h.ctx, "c1").unwrap().is_some());
}

#[test]
fn test_quest_resets_next_month() {
    let h = harness(at(2025, 3, 20));
    h.enrol("c1", &["s1"]);
    apply_star_award(&h.ctx, &teacher(), "s1", 15, "project").unwrap();
    assert!(check_milestone(&h.ctx, "c1").unwrap().is_some());

    h.clock.set(at(2025, 4, 2));
    // Last month's bucket is not counted even before the student rolls over.
    assert!(check_milestone(&h.ctx, "c1").unwrap().is_none());
    let progress = quest_progress(&h.ctx, "c1").unwrap();
    assert_eq!(progress.stars_earned, 0);
    assert!(!progress.completed_this_month);
    assert_eq!(progress.goal_target, 18);
}

#[test]
fn test_bounty_progress_from_award_events() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1", "s2"]);
    let bounty = create_bounty(
        &h.ctx,
        "c1",
        "Everyone reads",
        BountyKind::Standard,
        5,
        at(2025, 3, 4) + Duration::days(2),
    )
    .unwrap();

    apply_star_award(&h.ctx, &teacher(), "s1", 3, "reading").unwrap();
    let seen = run_pending(&h, 0);
    assert_eq!(list_bounties(&h.ctx, "c1").unwrap()[0].current_progress, 3);
    let err = claim_bounty(&h.ctx, "c1", &bounty.id).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidOperation(_)));

    apply_star_award(&h.ctx, &teacher(), "s2", 3, "reading").unwrap();
    run_pending(&h, seen);
    let current = &list_bounties(&h.ctx, "c1").unwrap()[0];
    assert_eq!(current.current_progress, 6);
    assert!(h
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, DomainEvent::BountyReadyToClaim { .. })));

    assert!(claim_bounty(&h.ctx, "c1", &bounty.id).unwrap());
    assert!(!claim_bounty(&h.ctx, "c1", &bounty.id).unwrap());
    assert_eq!(
        list_bounties(&h.ctx, "c1").unwrap()[0].status,
        BountyStatus::Completed
    );
}

#[test]
fn test_expired_timer_bounty_cannot_be_claimed() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    let bounty = create_bounty(
        &h.ctx,
        "c1",
        "Beat the bell",
        BountyKind::Timer,
        2,
        at(2025, 3, 4) + Duration::minutes(20),
    )
    .unwrap();
    apply_star_award(&h.ctx, &teacher(), "s1", 2, "focus").unwrap();
    run_pending(&h, 0);

    h.clock.set(at(2025, 3, 4) + Duration::minutes(30));
    let err = claim_bounty(&h.ctx, "c1", &bounty.id).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidOperation(_)));
}

#[test]
fn test_familiar_hatches_and_gets_sprite() {
    let assets = SwitchableAssets::new(true);
    let h = harness_with(at(2025, 3, 4), 0.99, Some(assets.clone() as Arc<dyn AssetGenerator>), |_| {});
    h.enrol("c1", &["s1"]);
    h.fund("s1", 40);
    buy_item(&h.ctx, "s1", "owl_egg").unwrap();

    apply_star_award(&h.ctx, &teacher(), "s1", 20, "project").unwrap();
    run_pending(&h, 0);

    let familiar = h.score("s1").familiar.unwrap();
    assert_eq!(familiar.stage, FamiliarStage::Alive);
    assert_eq!(familiar.level, 1);
    assert_eq!(familiar.stars_when_hatched, Some(20));
    let digest = familiar.assets.get(&1).unwrap();
    assert!(load_asset(&h.ctx, digest).unwrap().is_some());
    assert_eq!(assets.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failed_sprite_stays_pending_until_regenerated() {
    let assets = SwitchableAssets::new(false);
    let h = harness_with(at(2025, 3, 4), 0.99, Some(assets.clone() as Arc<dyn AssetGenerator>), |_| {});
    h.enrol("c1", &["s1"]);
    h.fund("s1", 40);
    buy_item(&h.ctx, "s1", "owl_egg").unwrap();

    apply_star_award(&h.ctx, &teacher(), "s1", 20, "project").unwrap();
    run_pending(&h, 0);
    let familiar = h.score("s1").familiar.unwrap();
    assert_eq!(familiar.stage, FamiliarStage::Alive);
    assert_eq!(familiar.pending_asset_level(), Some(1));

    assets.online.store(true, Ordering::SeqCst);
    assert_eq!(regenerate_pending_assets(&h.ctx).unwrap(), 1);
    assert!(h.score("s1").familiar.unwrap().pending_asset_level().is_none());
    assert_eq!(regenerate_pending_assets(&h.ctx).unwrap(), 0);
}

#[tokio::test]
async fn test_dispatcher_runs_triggers_after_commit() {
    let h = harness_with(at(2025, 3, 20), 0.99, None, |config| {
        config.triggers.milestone_debounce_ms = 10;
    });
    h.enrol("c1", &["s1", "s2"]);
    create_bounty(
        &h.ctx,
        "c1",
        "Big push",
        BountyKind::Standard,
        25,
        at(2025, 3, 21),
    )
    .unwrap();

    let dispatcher = TriggerDispatcher::attach(h.ctx.clone()).spawn();
    apply_star_award(&h.ctx, &teacher(), "s1", 15, "project").unwrap();
    apply_star_award(&h.ctx, &teacher(), "s2", 15, "project").unwrap();
    h.ctx.outbox.detach();
    dispatcher.await.unwrap();

    assert_eq!(quest_history(&h.ctx, "c1").unwrap().len(), 1);
    assert_eq!(quest_state(&h.ctx, "c1").unwrap().difficulty_level, 1);
    assert_eq!(list_bounties(&h.ctx, "c1").unwrap()[0].current_progress, 30);
}
