//! Award log deletion: the compensating write for [`crate::ledger::award`].

use log::info;

use crate::ledger::context::LedgerContext;
use crate::ledger::errors::LedgerError;
use crate::ledger::events::DomainEvent;
use crate::ledger::rollover::load_for_update;
use crate::ledger::storage::keys;
use crate::ledger::types::{same_month, AuditEntry, AuditKind, DailyRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeOutcome {
    pub student_id: String,
    pub stars_removed: i64,
    /// Whether the current monthly bucket was decremented too.
    pub monthly_adjusted: bool,
    pub daily_records_removed: usize,
    pub total_stars: i64,
}

/// Undo the audit entry `log_id`.
///
/// `total_stars` always drops by the entry's stars. `monthly_stars` only does when the entry
/// is from the current month, so a closed bucket is never resurrected. Today's daily records
/// are removed with a performance entry; gold is left alone.
pub fn delete_award(ctx: &LedgerContext, log_id: &str) -> Result<RevokeOutcome, LedgerError> {
    let now = ctx.clock.now();
    let today = now.date_naive();
    let audit_key = keys::audit(log_id);

    let (outcome, events) = ctx.store.transaction(|tx| {
        let entry: AuditEntry = tx
            .get(&audit_key)?
            .ok_or_else(|| LedgerError::NotFound(format!("award log: {}", log_id)))?;
        let (mut record, rolled) = load_for_update(tx, &entry.student_id, today, now)?;
        let mut events: Vec<DomainEvent> = rolled
            .into_iter()
            .map(|r| r.into_event(&entry.student_id))
            .collect();

        record.total_stars -= entry.stars;
        let monthly_adjusted = same_month(entry.date, today);
        if monthly_adjusted {
            record.monthly_stars -= entry.stars;
        }
        record.touch();
        tx.put_score(&record)?;
        tx.delete(&audit_key);

        let mut daily_records_removed = 0;
        if entry.kind == AuditKind::Performance && entry.date == today {
            let prefix = keys::daily_day_prefix(&entry.student_id, entry.date);
            for (key, _) in tx.scan::<DailyRecord>(&prefix)? {
                tx.delete(&key);
                daily_records_removed += 1;
            }
        }

        events.push(DomainEvent::AwardRevoked {
            log_id: log_id.to_string(),
            student_id: entry.student_id.clone(),
            class_id: entry.class_id.clone(),
            stars: entry.stars,
        });
        Ok((
            RevokeOutcome {
                student_id: entry.student_id.clone(),
                stars_removed: entry.stars,
                monthly_adjusted,
                daily_records_removed,
                total_stars: record.total_stars,
            },
            events,
        ))
    })?;

    info!(
        "revoked {} for {}: -{} stars",
        log_id, outcome.student_id, outcome.stars_removed
    );
    ctx.publish(events);
    Ok(outcome)
}
