/// Integration tests for the award write path: modifiers, daily records and audit entries.
mod common;

use common::{at, day, harness, harness_with, second_teacher, teacher};
use starledger::ledger::storage::keys;
use starledger::ledger::{
    admin_correct_total, apply_star_award, apply_star_award_with_note, audit_entries, change_hero_class, daily_records,
    mark_present, set_day_event, set_reigning_hero, AuditEntry, AuditKind, DayEventKind,
    DomainEvent, LedgerError, ModifierNote, MAX_AWARD_STARS,
};

#[test]
fn test_double_star_day_hero_scenario() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1", "s2"]);
    set_reigning_hero(&h.ctx, "c1", Some("s1")).unwrap();
    set_day_event(&h.ctx, "c1", day(2025, 3, 4), DayEventKind::DoubleStars).unwrap();

    let outcome = apply_star_award(&h.ctx, &teacher(), "s1", 1, "teamwork").unwrap();
    assert_eq!(outcome.effective_stars, 3);
    assert_eq!(outcome.delta, 3);
    assert!(outcome.hero_boon());

    let score = h.score("s1");
    assert_eq!(score.total_stars, 3);
    assert_eq!(score.monthly_stars, 3);
    assert_eq!(score.hero_boon_date, Some(day(2025, 3, 4)));

    let log_id = outcome.log_id.expect("performance entry");
    let entry: AuditEntry = h.ctx.store.get(&keys::audit(&log_id)).unwrap().unwrap();
    assert_eq!(entry.stars, 3);
    assert_eq!(entry.kind, AuditKind::Performance);
    assert!(h
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, DomainEvent::HeroBoonGranted { student_id } if student_id == "s1")));

    // Not the hero: plain doubling.
    let outcome = apply_star_award(&h.ctx, &teacher(), "s2", 1, "teamwork").unwrap();
    assert_eq!(outcome.effective_stars, 2);
}

#[test]
fn test_gilded_award_triples_gold_once() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    h.edit_score("s1", |r| r.has_gilded_effect = true);

    let outcome = apply_star_award(&h.ctx, &teacher(), "s1", 2, "reading").unwrap();
    assert_eq!(outcome.gold_delta, 6);
    assert!(outcome.notes.contains(&ModifierNote::Gilded));
    let score = h.score("s1");
    assert_eq!(score.gold, 6);
    assert!(!score.has_gilded_effect);

    let outcome = apply_star_award(&h.ctx, &second_teacher(), "s1", 2, "reading").unwrap();
    assert_eq!(outcome.gold_delta, 2);
    assert_eq!(h.score("s1").gold, 8);
}

#[test]
fn test_reason_only_update_is_idempotent() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);

    let first = apply_star_award(&h.ctx, &teacher(), "s1", 2, "teamwork").unwrap();
    let second = apply_star_award(&h.ctx, &teacher(), "s1", 2, "homework").unwrap();
    assert!(second.reason_only);
    assert_eq!(second.delta, 0);

    let score = h.score("s1");
    assert_eq!(score.total_stars, 2);
    assert_eq!(score.monthly_stars, 2);
    assert_eq!(score.gold, 2);

    let entries = audit_entries(&h.ctx, "s1").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].reason, "homework");
    assert_eq!(entries[0].stars, 2);
    assert_eq!(Some(entries[0].id.clone()), first.log_id);
}

#[test]
fn test_reason_correction_does_not_grant_boon() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    apply_star_award(&h.ctx, &teacher(), "s1", 2, "teamwork").unwrap();

    // Crowned after today's stars already landed.
    set_reigning_hero(&h.ctx, "c1", Some("s1")).unwrap();
    let outcome = apply_star_award(&h.ctx, &teacher(), "s1", 2, "homework").unwrap();
    assert!(outcome.reason_only);
    assert!(!outcome.hero_boon());
    assert_eq!(h.score("s1").total_stars, 2);
}

#[test]
fn test_lowering_an_award_applies_negative_delta() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    apply_star_award(&h.ctx, &teacher(), "s1", 3, "teamwork").unwrap();
    let outcome = apply_star_award(&h.ctx, &teacher(), "s1", 1, "teamwork").unwrap();
    assert_eq!(outcome.delta, -2);

    let score = h.score("s1");
    assert_eq!(score.total_stars, 1);
    assert_eq!(score.gold, 1);
    let daily = daily_records(&h.ctx, "s1", day(2025, 3, 4)).unwrap();
    assert_eq!(daily.len(), 1);
    assert_eq!(daily[0].stars, 1);
    assert_eq!(audit_entries(&h.ctx, "s1").unwrap()[0].stars, 1);
}

#[test]
fn test_zero_award_removes_daily_record_and_entry() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    apply_star_award(&h.ctx, &teacher(), "s1", 2, "teamwork").unwrap();
    apply_star_award(&h.ctx, &teacher(), "s1", 0, "teamwork").unwrap();

    assert!(daily_records(&h.ctx, "s1", day(2025, 3, 4)).unwrap().is_empty());
    assert!(audit_entries(&h.ctx, "s1").unwrap().is_empty());
    assert_eq!(h.score("s1").total_stars, 0);
}

#[test]
fn test_present_marker_survives_at_zero() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    assert!(mark_present(&h.ctx, &teacher(), "s1").unwrap());
    assert!(!mark_present(&h.ctx, &teacher(), "s1").unwrap());

    apply_star_award(&h.ctx, &teacher(), "s1", 0, "present").unwrap();
    let daily = daily_records(&h.ctx, "s1", day(2025, 3, 4)).unwrap();
    assert_eq!(daily.len(), 1);
    assert!(daily[0].is_present_marker());
    assert_eq!(daily[0].stars, 0);
    assert!(audit_entries(&h.ctx, "s1").unwrap().is_empty());
}

#[test]
fn test_bonus_reason_creates_separate_entries() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    apply_star_award(&h.ctx, &teacher(), "s1", 2, "teamwork").unwrap();
    apply_star_award(&h.ctx, &teacher(), "s1", 5, "welcome_back").unwrap();
    apply_star_award(&h.ctx, &teacher(), "s1", 5, "welcome_back").unwrap();

    let score = h.score("s1");
    assert_eq!(score.total_stars, 12);
    let entries = audit_entries(&h.ctx, "s1").unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(
        entries.iter().filter(|e| e.kind == AuditKind::Bonus).count(),
        2
    );
    // Bonus stars never touch the teacher's daily value.
    let daily = daily_records(&h.ctx, "s1", day(2025, 3, 4)).unwrap();
    assert_eq!(daily.len(), 1);
    assert_eq!(daily[0].stars, 2);
}

#[test]
fn test_each_teacher_keeps_own_daily_record() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    apply_star_award(&h.ctx, &teacher(), "s1", 2, "teamwork").unwrap();
    apply_star_award(&h.ctx, &second_teacher(), "s1", 3, "reading").unwrap();

    assert_eq!(h.score("s1").total_stars, 5);
    assert_eq!(daily_records(&h.ctx, "s1", day(2025, 3, 4)).unwrap().len(), 2);
    assert_eq!(h.ctx.store.stars_on("s1", day(2025, 3, 4)).unwrap(), 5);
    let entries = audit_entries(&h.ctx, "s1").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].stars, 5);
}

#[test]
fn test_luck_adds_star_and_is_spent() {
    let h = harness_with(at(2025, 3, 4), 0.0, None, |_| {});
    h.enrol("c1", &["s1"]);
    h.edit_score("s1", |r| r.luck_date = Some(day(2025, 3, 4)));

    let outcome = apply_star_award(&h.ctx, &teacher(), "s1", 1, "teamwork").unwrap();
    assert_eq!(outcome.effective_stars, 2);
    assert!(h.score("s1").luck_date.is_none());
    assert!(h
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, DomainEvent::LuckyStar { .. })));
}

#[test]
fn test_unknown_student_writes_nothing() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    let err = apply_star_award(&h.ctx, &teacher(), "ghost", 2, "teamwork").unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
    assert!(!err.is_retryable());
    assert!(audit_entries(&h.ctx, "ghost").unwrap().is_empty());
    assert!(h.ctx.store.get::<AuditEntry>(&keys::audit("ghost")).unwrap().is_none());
}

#[test]
fn test_negative_raw_value_is_rejected() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    let err = apply_star_award(&h.ctx, &teacher(), "s1", -1, "teamwork").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidOperation(_)));
}

#[test]
fn test_oversized_raw_value_is_rejected() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    let err =
        apply_star_award(&h.ctx, &teacher(), "s1", MAX_AWARD_STARS + 1, "teamwork").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidOperation(_)));
    let err = apply_star_award(&h.ctx, &teacher(), "s1", i64::MAX, "welcome_back").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidOperation(_)));
    assert_eq!(h.score("s1").total_stars, 0);
}

#[test]
fn test_award_refuses_to_overflow_totals() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    admin_correct_total(&h.ctx, &teacher(), "s1", i64::MAX).unwrap();

    let err = apply_star_award(&h.ctx, &teacher(), "s1", 1, "teamwork").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidOperation(_)));
    assert_eq!(h.score("s1").total_stars, i64::MAX);
    assert!(daily_records(&h.ctx, "s1", day(2025, 3, 4)).unwrap().is_empty());
}

#[test]
fn test_hero_raise_keeps_boon() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    set_reigning_hero(&h.ctx, "c1", Some("s1")).unwrap();

    let first = apply_star_award(&h.ctx, &teacher(), "s1", 1, "teamwork").unwrap();
    assert_eq!(first.effective_stars, 2);
    assert!(first.hero_boon());

    let raised = apply_star_award(&h.ctx, &teacher(), "s1", 2, "teamwork").unwrap();
    assert!(!raised.reason_only);
    assert!(!raised.hero_boon());
    assert_eq!(raised.effective_stars, 3);
    assert_eq!(raised.delta, 1);
    assert_eq!(h.score("s1").total_stars, 3);
    assert_eq!(audit_entries(&h.ctx, "s1").unwrap()[0].stars, 3);
}

#[test]
fn test_hero_reason_change_keeps_boon() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    set_reigning_hero(&h.ctx, "c1", Some("s1")).unwrap();
    apply_star_award(&h.ctx, &teacher(), "s1", 1, "teamwork").unwrap();

    let corrected = apply_star_award(&h.ctx, &teacher(), "s1", 1, "homework").unwrap();
    assert!(corrected.reason_only);
    assert_eq!(corrected.delta, 0);
    assert_eq!(corrected.effective_stars, 2);
    let score = h.score("s1");
    assert_eq!(score.total_stars, 2);
    assert_eq!(score.gold, 2);
    let daily = daily_records(&h.ctx, "s1", day(2025, 3, 4)).unwrap();
    assert_eq!(daily[0].reason, "homework");
    assert_eq!(daily[0].bonus_stars, 1);
}

#[test]
fn test_lucky_star_survives_reason_change() {
    let h = harness_with(at(2025, 3, 4), 0.0, None, |_| {});
    h.enrol("c1", &["s1"]);
    h.edit_score("s1", |r| r.luck_date = Some(day(2025, 3, 4)));
    apply_star_award(&h.ctx, &teacher(), "s1", 1, "teamwork").unwrap();

    let corrected = apply_star_award(&h.ctx, &teacher(), "s1", 1, "reading").unwrap();
    assert!(corrected.reason_only);
    assert_eq!(h.score("s1").total_stars, 2);

    let raised = apply_star_award(&h.ctx, &teacher(), "s1", 3, "reading").unwrap();
    assert_eq!(raised.effective_stars, 4);
    assert_eq!(raised.delta, 2);
    assert_eq!(h.score("s1").total_stars, 4);
}

#[test]
fn test_toggling_an_award_leaves_gold_unchanged() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    change_hero_class(&h.ctx, "s1", "merchant").unwrap();

    for _ in 0..5 {
        apply_star_award(&h.ctx, &teacher(), "s1", 1, "teamwork").unwrap();
        assert_eq!(h.score("s1").gold, 2);
        apply_star_award(&h.ctx, &teacher(), "s1", 0, "teamwork").unwrap();
    }
    let score = h.score("s1");
    assert_eq!(score.total_stars, 0);
    assert_eq!(score.gold, 0);

    // Lowering takes back the class bonus with the stars.
    apply_star_award(&h.ctx, &teacher(), "s1", 3, "teamwork").unwrap();
    assert_eq!(h.score("s1").gold, 4);
    let lowered = apply_star_award(&h.ctx, &teacher(), "s1", 1, "teamwork").unwrap();
    assert_eq!(lowered.gold_delta, -2);
    assert_eq!(h.score("s1").gold, 2);
}

#[test]
fn test_reason_and_note_are_stored_on_one_line() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    let note = format!("first line\nsecond {}", "x".repeat(400));
    apply_star_award_with_note(&h.ctx, &teacher(), "s1", 2, " helped\r\na friend ", Some(&note))
        .unwrap();

    let entry = &audit_entries(&h.ctx, "s1").unwrap()[0];
    assert_eq!(entry.reason, "helped a friend");
    let stored = entry.note.as_deref().unwrap();
    assert!(stored.starts_with("first line second x"));
    assert_eq!(stored.chars().count(), 280);
    assert_eq!(
        daily_records(&h.ctx, "s1", day(2025, 3, 4)).unwrap()[0].reason,
        "helped a friend"
    );
}
