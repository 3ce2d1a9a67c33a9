//! Star awards: the primary write path.
//!
//! A teacher sets today's star value for a student. One optimistic transaction runs the
//! modifier pipeline, applies the difference to the score ledger, upserts the daily record
//! and merges the day's performance audit entry. Derived triggers only see the result
//! through the outbox, after commit.

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};

use crate::ledger::collaborators::Actor;
use crate::ledger::context::LedgerContext;
use crate::ledger::errors::LedgerError;
use crate::ledger::events::DomainEvent;
use crate::ledger::modifiers::{compute_effective_award, ModifierInput, ModifierNote};
use crate::ledger::rollover::{apply_rollover, load_for_update};
use crate::ledger::storage::{keys, LedgerTx};
use crate::ledger::types::{
    is_bonus_reason, AuditEntry, AuditKind, ClassRecord, DailyRecord, DayEvent, ScoreRecord,
    StudentRecord, MAX_AWARD_STARS, PRESENT_REASON,
};
use crate::logutil::{clean_text, escape_log, MAX_NOTE_CHARS, MAX_REASON_CHARS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardOutcome {
    /// Change applied to `total_stars` and `monthly_stars`.
    pub delta: i64,
    /// Today's stored value after modifiers.
    pub effective_stars: i64,
    pub gold_delta: i64,
    pub notes: Vec<ModifierNote>,
    /// Only the audit reason changed; aggregates untouched.
    pub reason_only: bool,
    /// Audit entry written or updated, if any.
    pub log_id: Option<String>,
    pub total_stars: i64,
}

impl AwardOutcome {
    pub fn hero_boon(&self) -> bool {
        self.notes.contains(&ModifierNote::HerosBoon)
    }
}

fn load_student(tx: &mut LedgerTx<'_>, student_id: &str) -> Result<StudentRecord, LedgerError> {
    tx.get(&keys::student(student_id))?
        .ok_or_else(|| LedgerError::NotFound(format!("student: {}", student_id)))
}

/// Set today's stars for `student_id` as awarded by `actor`.
///
/// Bonus-type reasons are additive grants and are routed to [`grant_bonus_stars`].
pub fn apply_star_award(
    ctx: &LedgerContext,
    actor: &Actor,
    student_id: &str,
    raw_stars: i64,
    reason: &str,
) -> Result<AwardOutcome, LedgerError> {
    apply_star_award_with_note(ctx, actor, student_id, raw_stars, reason, None)
}

pub fn apply_star_award_with_note(
    ctx: &LedgerContext,
    actor: &Actor,
    student_id: &str,
    raw_stars: i64,
    reason: &str,
    note: Option<&str>,
) -> Result<AwardOutcome, LedgerError> {
    let reason = clean_text(reason, MAX_REASON_CHARS);
    let reason = reason.as_str();
    let note = note.map(|n| clean_text(n, MAX_NOTE_CHARS));
    let note = note.as_deref();
    if is_bonus_reason(reason) {
        return grant_bonus_stars(ctx, actor, student_id, raw_stars, reason, note);
    }
    if !(0..=MAX_AWARD_STARS).contains(&raw_stars) {
        return Err(LedgerError::InvalidOperation(format!(
            "daily star value must be between 0 and {}: {}",
            MAX_AWARD_STARS, raw_stars
        )));
    }

    let now = ctx.clock.now();
    let today = now.date_naive();
    // Rolled once per logical award so transaction retries see the same draw.
    let luck_roll = ctx.luck.roll();
    let settings = ctx.modifier_settings();

    let (outcome, events) = ctx.store.transaction(|tx| {
        let mut events = Vec::new();
        let student = load_student(tx, student_id)?;
        let class: Option<ClassRecord> = tx.get(&keys::class(&student.class_id))?;
        let day_event: Option<DayEvent> = tx.get(&keys::day_event(&student.class_id, today))?;
        let daily_key = keys::daily(student_id, today, &actor.teacher_id);
        let daily: Option<DailyRecord> = tx.get(&daily_key)?;
        let old_stars = daily.as_ref().map(|d| d.stars).unwrap_or(0);
        let old_raw = daily.as_ref().map(|d| d.raw_stars);

        let mut score: Option<ScoreRecord> = tx.get(&keys::ledger(student_id))?;
        if let Some(record) = score.as_mut() {
            if let Some(rolled) = apply_rollover(tx, record, today, now)? {
                events.push(rolled.into_event(student_id));
            }
        }

        let input = ModifierInput {
            base_stars: raw_stars,
            reason,
            day_event: day_event.as_ref().map(|e| &e.kind),
            is_reigning_hero: class
                .as_ref()
                .map(|c| c.is_reigning_hero(student_id))
                .unwrap_or(false),
            old_stars,
            carried_bonus: daily.as_ref().map(|d| d.bonus_stars).unwrap_or(0),
            today,
            luck_roll,
        };
        let mods = compute_effective_award(&input, score.as_ref(), &settings);
        let effective = mods.effective_stars;
        let delta = effective - old_stars;
        let perf_id = keys::performance_log_id(student_id, today);

        if old_raw == Some(raw_stars) && delta == 0 && effective > 0 {
            let mut log_id = None;
            let perf_key = keys::audit(&perf_id);
            if let Some(mut entry) = tx.get::<AuditEntry>(&perf_key)? {
                if entry.reason != reason {
                    entry.reason = reason.to_string();
                    tx.put(&perf_key, &entry)?;
                }
                log_id = Some(perf_id.clone());
            }
            if let Some(mut record) = daily {
                record.reason = reason.to_string();
                record.updated_at = now;
                tx.put(&daily_key, &record)?;
            }
            if let Some(record) = score.as_ref() {
                if !events.is_empty() {
                    tx.put_score(record)?;
                }
            }
            events.push(DomainEvent::ReasonCorrected {
                student_id: student_id.to_string(),
                reason: reason.to_string(),
            });
            let total_stars = score.as_ref().map(|s| s.total_stars).unwrap_or(0);
            return Ok((
                AwardOutcome {
                    delta: 0,
                    effective_stars: effective,
                    gold_delta: 0,
                    notes: Vec::new(),
                    reason_only: true,
                    log_id,
                    total_stars,
                },
                events,
            ));
        }

        let is_new = score.is_none();
        let mut record = score.unwrap_or_else(|| ScoreRecord::new(student_id, today));
        // Gold follows the day's value so lowering and raising again nets to zero.
        let old_reason = daily.as_ref().map(|d| d.reason.as_str()).unwrap_or(reason);
        let mut gold_delta = ctx.gold.gold_for_award(&student, &record, reason, effective)
            - ctx.gold.gold_for_award(&student, &record, old_reason, old_stars);
        if gold_delta > 0 {
            gold_delta *= mods.gold_multiplier;
        }
        if is_new {
            record.credit(delta.max(0), gold_delta.max(0))?;
        } else {
            record.credit(delta, gold_delta)?;
        }
        if mods.consumed_gilded {
            record.has_gilded_effect = false;
        }
        if mods.consumed_luck {
            record.luck_date = None;
        }
        if mods.hero_boon {
            record.hero_boon_date = Some(today);
        }
        if effective > 0 {
            record.last_award_date = Some(today);
        }
        record.touch();
        tx.put_score(&record)?;

        if effective == 0 && reason != PRESENT_REASON {
            tx.delete(&daily_key);
        } else {
            tx.put(
                &daily_key,
                &DailyRecord {
                    student_id: student_id.to_string(),
                    date: today,
                    stars: effective,
                    raw_stars,
                    bonus_stars: mods.bonus_stars,
                    reason: reason.to_string(),
                    teacher_id: actor.teacher_id.clone(),
                    updated_at: now,
                },
            )?;
        }

        let log_id = merge_performance_entry(
            tx,
            &student,
            actor,
            &perf_id,
            delta,
            reason,
            note,
            today,
            now,
        )?;

        if delta != 0 {
            events.push(DomainEvent::StarsAwarded {
                student_id: student_id.to_string(),
                class_id: student.class_id.clone(),
                delta,
                effective_stars: effective,
                gold_delta,
                reason: reason.to_string(),
                date: today,
                total_stars: record.total_stars,
            });
        }
        if mods.hero_boon {
            events.push(DomainEvent::HeroBoonGranted {
                student_id: student_id.to_string(),
            });
        }
        if mods.notes.contains(&ModifierNote::LuckyStar) {
            events.push(DomainEvent::LuckyStar {
                student_id: student_id.to_string(),
            });
        }

        Ok((
            AwardOutcome {
                delta,
                effective_stars: effective,
                gold_delta,
                notes: mods.notes.clone(),
                reason_only: false,
                log_id,
                total_stars: record.total_stars,
            },
            events,
        ))
    })?;

    if outcome.reason_only {
        debug!(
            "reason-only correction for {} -> {}",
            student_id,
            escape_log(reason)
        );
    } else {
        info!(
            "award {} by {}: {:+} stars ({}), gold {:+}",
            student_id,
            actor.teacher_id,
            outcome.delta,
            escape_log(reason),
            outcome.gold_delta
        );
    }
    ctx.publish(events);
    Ok(outcome)
}

/// Update the day's performance entry in place, creating it on first award. The entry's
/// stars track the sum of today's performance deltas so revoking it undoes the whole day.
#[allow(clippy::too_many_arguments)]
fn merge_performance_entry(
    tx: &mut LedgerTx<'_>,
    student: &StudentRecord,
    actor: &Actor,
    perf_id: &str,
    delta: i64,
    reason: &str,
    note: Option<&str>,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Option<String>, LedgerError> {
    let key = keys::audit(perf_id);
    let existing: Option<AuditEntry> = tx.get(&key)?;
    let mut entry = match existing {
        Some(entry) => entry,
        None if delta == 0 => return Ok(None),
        None => AuditEntry {
            id: perf_id.to_string(),
            kind: AuditKind::Performance,
            student_id: student.id.clone(),
            class_id: student.class_id.clone(),
            teacher_id: actor.teacher_id.clone(),
            teacher_name: actor.teacher_name.clone(),
            stars: 0,
            reason: reason.to_string(),
            note: None,
            date: today,
            created_at: now,
        },
    };
    entry.stars += delta;
    entry.reason = reason.to_string();
    entry.teacher_id = actor.teacher_id.clone();
    entry.teacher_name = actor.teacher_name.clone();
    if let Some(note) = note {
        entry.note = Some(note.to_string());
    }
    if entry.stars == 0 {
        tx.delete(&key);
        return Ok(None);
    }
    tx.put(&key, &entry)?;
    Ok(Some(perf_id.to_string()))
}

/// Additive star grant recorded as its own audit entry (welcome back, scholar's bonus,
/// story weaver, power-up rewards). Bypasses the modifier pipeline and the daily record.
pub fn grant_bonus_stars(
    ctx: &LedgerContext,
    actor: &Actor,
    student_id: &str,
    stars: i64,
    reason: &str,
    note: Option<&str>,
) -> Result<AwardOutcome, LedgerError> {
    let reason = clean_text(reason, MAX_REASON_CHARS);
    let reason = reason.as_str();
    let note = note.map(|n| clean_text(n, MAX_NOTE_CHARS));
    let note = note.as_deref();
    if !(1..=MAX_AWARD_STARS).contains(&stars) {
        return Err(LedgerError::InvalidOperation(format!(
            "bonus stars must be between 1 and {}: {}",
            MAX_AWARD_STARS, stars
        )));
    }
    let now = ctx.clock.now();
    let today = now.date_naive();

    let (outcome, events) = ctx.store.transaction(|tx| {
        let student = load_student(tx, student_id)?;
        let (mut record, rolled) = load_for_update(tx, student_id, today, now)?;
        let mut events: Vec<DomainEvent> = rolled
            .into_iter()
            .map(|r| r.into_event(student_id))
            .collect();
        let (log_id, gold) = credit_bonus(
            tx,
            ctx,
            &student,
            &mut record,
            actor,
            stars,
            reason,
            note,
            now,
        )?;
        events.push(DomainEvent::StarsAwarded {
            student_id: student_id.to_string(),
            class_id: student.class_id.clone(),
            delta: stars,
            effective_stars: stars,
            gold_delta: gold,
            reason: reason.to_string(),
            date: today,
            total_stars: record.total_stars,
        });
        Ok((
            AwardOutcome {
                delta: stars,
                effective_stars: stars,
                gold_delta: gold,
                notes: Vec::new(),
                reason_only: false,
                log_id: Some(log_id),
                total_stars: record.total_stars,
            },
            events,
        ))
    })?;

    info!(
        "bonus {} by {}: +{} stars ({})",
        student_id,
        actor.teacher_id,
        stars,
        escape_log(reason)
    );
    ctx.publish(events);
    Ok(outcome)
}

/// Credit stars and gold to an already-loaded record and append a bonus audit entry.
/// Returns the new log id and the gold credited. Persists `record`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn credit_bonus(
    tx: &mut LedgerTx<'_>,
    ctx: &LedgerContext,
    student: &StudentRecord,
    record: &mut ScoreRecord,
    actor: &Actor,
    stars: i64,
    reason: &str,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(String, i64), LedgerError> {
    let today = now.date_naive();
    let gold = ctx.gold.gold_for_award(student, record, reason, stars);
    record.credit(stars, gold)?;
    record.touch();
    tx.put_score(record)?;

    let log_id = keys::bonus_log_id(&student.id, today);
    tx.put(
        &keys::audit(&log_id),
        &AuditEntry {
            id: log_id.clone(),
            kind: AuditKind::Bonus,
            student_id: student.id.clone(),
            class_id: student.class_id.clone(),
            teacher_id: actor.teacher_id.clone(),
            teacher_name: actor.teacher_name.clone(),
            stars,
            reason: reason.to_string(),
            note: note.map(str::to_string),
            date: today,
            created_at: now,
        },
    )?;
    Ok((log_id, gold))
}

/// Record attendance without stars. The zero-star "present" marker is kept, unlike an
/// ordinary zero-star day. Returns false when the teacher already has a record today.
pub fn mark_present(
    ctx: &LedgerContext,
    actor: &Actor,
    student_id: &str,
) -> Result<bool, LedgerError> {
    let now = ctx.clock.now();
    let today = now.date_naive();
    ctx.store.transaction(|tx| {
        load_student(tx, student_id)?;
        let key = keys::daily(student_id, today, &actor.teacher_id);
        if tx.exists(&key)? {
            return Ok(false);
        }
        tx.put(
            &key,
            &DailyRecord {
                student_id: student_id.to_string(),
                date: today,
                stars: 0,
                raw_stars: 0,
                bonus_stars: 0,
                reason: PRESENT_REASON.to_string(),
                teacher_id: actor.teacher_id.clone(),
                updated_at: now,
            },
        )?;
        Ok(true)
    })
}

/// Today's daily records for a student, one per awarding teacher.
pub fn daily_records(
    ctx: &LedgerContext,
    student_id: &str,
    date: NaiveDate,
) -> Result<Vec<DailyRecord>, LedgerError> {
    Ok(ctx
        .store
        .scan::<DailyRecord>(&keys::daily_day_prefix(student_id, date))?
        .into_iter()
        .map(|(_, record)| record)
        .collect())
}

/// Every audit entry for a student, grouped by day.
pub fn audit_entries(ctx: &LedgerContext, student_id: &str) -> Result<Vec<AuditEntry>, LedgerError> {
    Ok(ctx
        .store
        .scan::<AuditEntry>(&keys::audit_student_prefix(student_id))?
        .into_iter()
        .map(|(_, entry)| entry)
        .collect())
}
