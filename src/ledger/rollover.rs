//! Lazy monthly rollover of `monthly_stars`.
//!
//! No scheduler resets the bucket. Every transaction that touches a score ledger first calls
//! [`apply_rollover`]; when the stored reset month is not the current one, the old bucket is
//! archived into a per-student monthly history record and zeroed in the same transaction.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use log::info;

use crate::ledger::context::LedgerContext;
use crate::ledger::errors::LedgerError;
use crate::ledger::events::DomainEvent;
use crate::ledger::storage::{keys, BatchOp, LedgerStore, LedgerTx};
use crate::ledger::types::{
    month_key, month_start, previous_month_start, GuildChampion, MonthlyHistoryRecord,
    ScoreRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollover {
    pub closed_month: String,
    pub archived_stars: i64,
}

/// Roll `score` over to the month containing `today` if it still belongs to an earlier one.
/// Writes the history record through `tx`; the caller persists `score`.
pub fn apply_rollover(
    tx: &mut LedgerTx<'_>,
    score: &mut ScoreRecord,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Option<Rollover>, LedgerError> {
    let current = month_start(today);
    if score.last_monthly_reset == Some(current) {
        return Ok(None);
    }
    let closed = score
        .last_monthly_reset
        .filter(|reset| *reset < current)
        .unwrap_or_else(|| previous_month_start(today));
    let closed_month = month_key(closed);
    let archived_stars = score.monthly_stars;
    if archived_stars > 0 {
        tx.put(
            &keys::month_history(&score.student_id, &closed_month),
            &MonthlyHistoryRecord {
                student_id: score.student_id.clone(),
                month_key: closed_month.clone(),
                stars: archived_stars,
                archived_at: now,
            },
        )?;
    }
    score.monthly_stars = 0;
    score.last_monthly_reset = Some(current);
    Ok(Some(Rollover {
        closed_month,
        archived_stars,
    }))
}

/// Read a score ledger for modification, rolling it into the current month first.
pub fn load_for_update(
    tx: &mut LedgerTx<'_>,
    student_id: &str,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<(ScoreRecord, Option<Rollover>), LedgerError> {
    let mut score = tx.score(student_id)?;
    let rolled = apply_rollover(tx, &mut score, today, now)?;
    Ok((score, rolled))
}

impl Rollover {
    pub fn into_event(self, student_id: &str) -> DomainEvent {
        DomainEvent::MonthRolledOver {
            student_id: student_id.to_string(),
            closed_month: self.closed_month,
            archived_stars: self.archived_stars,
        }
    }
}

/// Bring one student's ledger into the current month without any other change.
pub fn rollover_student(
    ctx: &LedgerContext,
    student_id: &str,
) -> Result<Option<Rollover>, LedgerError> {
    let now = ctx.clock.now();
    let today = now.date_naive();
    let rolled = ctx.store.transaction(|tx| {
        let (score, rolled) = load_for_update(tx, student_id, today, now)?;
        if rolled.is_some() {
            tx.put_score(&score)?;
        }
        Ok(rolled)
    })?;
    if let Some(rolled) = &rolled {
        ctx.publish(vec![rolled.clone().into_event(student_id)]);
    }
    Ok(rolled)
}

/// Archived monthly buckets for a student, oldest first.
pub fn monthly_history(
    store: &LedgerStore,
    student_id: &str,
) -> Result<Vec<MonthlyHistoryRecord>, LedgerError> {
    Ok(store
        .scan::<MonthlyHistoryRecord>(&keys::month_history_prefix(student_id))?
        .into_iter()
        .map(|(_, record)| record)
        .collect())
}

/// Persist the top monthly scorer of every guild for `closed_month`. Ties go to the lowest
/// student id. Only students that have already rolled over contribute, so this is safe to
/// re-run as more students cross into the new month.
pub fn recompute_guild_champions(
    store: &LedgerStore,
    closed_month: &str,
    now: DateTime<Utc>,
) -> Result<Vec<GuildChampion>, LedgerError> {
    let mut best: BTreeMap<String, (String, i64)> = BTreeMap::new();
    let mut student_ids = store.list_student_ids()?;
    student_ids.sort();
    for student_id in student_ids {
        let student = store.get_student(&student_id)?;
        let Some(guild_id) = student.guild_id else {
            continue;
        };
        let Some(history) =
            store.get::<MonthlyHistoryRecord>(&keys::month_history(&student_id, closed_month))?
        else {
            continue;
        };
        let entry = best.entry(guild_id).or_insert((student_id.clone(), history.stars));
        if history.stars > entry.1 {
            *entry = (student_id, history.stars);
        }
    }

    let champions: Vec<GuildChampion> = best
        .into_iter()
        .map(|(guild_id, (student_id, stars))| GuildChampion {
            guild_id,
            month_key: closed_month.to_string(),
            student_id,
            stars,
            recorded_at: now,
        })
        .collect();
    let ops = champions
        .iter()
        .map(|champion| {
            BatchOp::put(
                keys::champion(&champion.guild_id, &champion.month_key),
                champion,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    if !ops.is_empty() {
        store.batch_write(ops)?;
    }
    info!(
        "recorded {} guild champions for {}",
        champions.len(),
        closed_month
    );
    Ok(champions)
}
