//! Class bounties: short star-threshold goals, optionally racing a deadline.

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::ledger::context::LedgerContext;
use crate::ledger::errors::LedgerError;
use crate::ledger::events::DomainEvent;
use crate::ledger::storage::keys;
use crate::ledger::types::{Bounty, BountyKind, BountyStatus};
use crate::logutil::escape_log;

/// Post a new bounty for `class_id`.
pub fn create_bounty(
    ctx: &LedgerContext,
    class_id: &str,
    title: &str,
    kind: BountyKind,
    target: i64,
    deadline: DateTime<Utc>,
) -> Result<Bounty, LedgerError> {
    let now = ctx.clock.now();
    if target <= 0 {
        return Err(LedgerError::InvalidOperation(
            "bounty target must be positive".to_string(),
        ));
    }
    if deadline <= now {
        return Err(LedgerError::InvalidOperation(
            "bounty deadline must be in the future".to_string(),
        ));
    }
    ctx.store.get_class(class_id)?;
    let bounty = Bounty {
        id: uuid::Uuid::new_v4().simple().to_string(),
        class_id: class_id.to_string(),
        title: title.to_string(),
        kind,
        target,
        current_progress: 0,
        deadline,
        status: BountyStatus::Active,
        created_at: now,
        completed_at: None,
    };
    ctx.store.put(&keys::bounty(class_id, &bounty.id), &bounty)?;
    info!(
        "bounty {} posted for {}: {} stars ({})",
        bounty.id,
        class_id,
        target,
        escape_log(title)
    );
    Ok(bounty)
}

pub fn list_bounties(ctx: &LedgerContext, class_id: &str) -> Result<Vec<Bounty>, LedgerError> {
    let mut bounties: Vec<Bounty> = ctx
        .store
        .scan::<Bounty>(&keys::bounty_class_prefix(class_id))?
        .into_iter()
        .map(|(_, bounty)| bounty)
        .collect();
    bounties.sort_by_key(|b| b.deadline);
    Ok(bounties)
}

/// Add a positive award delta to every open bounty of the class. Returns the bounties that
/// crossed their target on this call.
pub fn advance_bounties(
    ctx: &LedgerContext,
    class_id: &str,
    delta: i64,
) -> Result<Vec<Bounty>, LedgerError> {
    if delta <= 0 {
        return Ok(Vec::new());
    }
    let now = ctx.clock.now();
    let crossed = ctx.store.transaction(|tx| {
        let mut crossed = Vec::new();
        for (key, mut bounty) in tx.scan::<Bounty>(&keys::bounty_class_prefix(class_id))? {
            if !bounty.is_open(now) {
                continue;
            }
            let was_reached = bounty.target_reached();
            bounty.current_progress += delta;
            tx.put(&key, &bounty)?;
            if !was_reached && bounty.target_reached() {
                crossed.push(bounty);
            }
        }
        Ok(crossed)
    })?;

    let events: Vec<DomainEvent> = crossed
        .iter()
        .filter(|b| b.kind != BountyKind::Timer)
        .map(|b| DomainEvent::BountyReadyToClaim {
            bounty_id: b.id.clone(),
            class_id: b.class_id.clone(),
            title: b.title.clone(),
        })
        .collect();
    debug!("{} bounties advanced by {} in {}", crossed.len(), delta, class_id);
    ctx.publish(events);
    Ok(crossed)
}

/// Move a bounty from active to completed. Returns false if it was already completed.
pub fn claim_bounty(
    ctx: &LedgerContext,
    class_id: &str,
    bounty_id: &str,
) -> Result<bool, LedgerError> {
    let now = ctx.clock.now();
    let key = keys::bounty(class_id, bounty_id);
    let claimed = ctx.store.transaction(|tx| {
        let mut bounty: Bounty = tx
            .get(&key)?
            .ok_or_else(|| LedgerError::NotFound(format!("bounty: {}", bounty_id)))?;
        if bounty.status == BountyStatus::Completed {
            return Ok(false);
        }
        if !bounty.target_reached() {
            return Err(LedgerError::InvalidOperation(format!(
                "bounty needs {} more stars",
                bounty.target - bounty.current_progress
            )));
        }
        if bounty.kind == BountyKind::Timer && bounty.deadline <= now {
            return Err(LedgerError::InvalidOperation(
                "the timer ran out before the bounty was claimed".to_string(),
            ));
        }
        bounty.status = BountyStatus::Completed;
        bounty.completed_at = Some(now);
        tx.put(&key, &bounty)?;
        Ok(true)
    })?;
    if claimed {
        info!("bounty {} claimed in {}", bounty_id, class_id);
        ctx.publish(vec![DomainEvent::BountyClaimed {
            bounty_id: bounty_id.to_string(),
            class_id: class_id.to_string(),
        }]);
    }
    Ok(claimed)
}
