//! Consumable power-ups.
//!
//! An inventory item is consumable only if its name maps to a [`PowerUp`]. The effect runs
//! in the same transaction that removes the item; an effect that does not apply leaves the
//! item where it is.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::ledger::award::credit_bonus;
use crate::ledger::collaborators::Actor;
use crate::ledger::context::LedgerContext;
use crate::ledger::errors::LedgerError;
use crate::ledger::events::DomainEvent;
use crate::ledger::rollover::load_for_update;
use crate::ledger::shop::{
    BOUNTY_SCROLL, CROWN_OF_DESTINY, FOUR_LEAF_CLOVER, GILDED_QUILL, HOURGLASS_OF_PATIENCE,
    STARFALL_CATALYST,
};
use crate::ledger::storage::{keys, LedgerTx};
use crate::ledger::types::{month_key, Bounty, BountyKind, ClassCalendar, StudentRecord};
use crate::logutil::escape_log;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerUp {
    GildedQuill,
    Hourglass,
    FourLeafClover,
    StarfallCatalyst,
    BountyScroll,
    CrownOfDestiny,
}

impl PowerUp {
    pub fn from_item_name(name: &str) -> Option<Self> {
        match name {
            GILDED_QUILL => Some(PowerUp::GildedQuill),
            HOURGLASS_OF_PATIENCE => Some(PowerUp::Hourglass),
            FOUR_LEAF_CLOVER => Some(PowerUp::FourLeafClover),
            STARFALL_CATALYST => Some(PowerUp::StarfallCatalyst),
            BOUNTY_SCROLL => Some(PowerUp::BountyScroll),
            CROWN_OF_DESTINY => Some(PowerUp::CrownOfDestiny),
            _ => None,
        }
    }

    /// Key segment for per-class usage caps and the audit reason of star grants.
    pub fn tag(&self) -> &'static str {
        match self {
            PowerUp::GildedQuill => "gilded_quill",
            PowerUp::Hourglass => "hourglass",
            PowerUp::FourLeafClover => "four_leaf_clover",
            PowerUp::StarfallCatalyst => "starfall_catalyst",
            PowerUp::BountyScroll => "bounty_scroll",
            PowerUp::CrownOfDestiny => "crown_of_destiny",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseOutcome {
    pub power_up: PowerUp,
    /// False when the effect could not apply; the item was kept.
    pub applied: bool,
    pub message: String,
}

impl UseOutcome {
    fn kept(power_up: PowerUp, message: impl Into<String>) -> Self {
        Self {
            power_up,
            applied: false,
            message: message.into(),
        }
    }

    fn used(power_up: PowerUp, message: impl Into<String>) -> Self {
        Self {
            power_up,
            applied: true,
            message: message.into(),
        }
    }
}

/// Usage marker for capped power-ups, one per class per month.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UsageCap {
    student_id: String,
    used_at: DateTime<Utc>,
}

/// Consume one inventory item. `item_ref` is an instance id or a catalog item id.
pub fn use_item(
    ctx: &LedgerContext,
    actor: &Actor,
    student_id: &str,
    item_ref: &str,
) -> Result<UseOutcome, LedgerError> {
    let student = ctx.store.get_student(student_id)?;
    let snapshot = ctx.store.get_score(student_id)?;
    let index = snapshot
        .find_item(item_ref)
        .ok_or_else(|| LedgerError::NotFound(format!("inventory item: {}", item_ref)))?;
    let item = snapshot.inventory[index].clone();
    let power_up =
        PowerUp::from_item_name(&item.name).ok_or_else(|| LedgerError::NotConsumable(item.name.clone()))?;

    let now = ctx.clock.now();
    let today = now.date_naive();
    let (outcome, events) = ctx.store.transaction(|tx| {
        let (mut record, rolled) = load_for_update(tx, student_id, today, now)?;
        let mut events: Vec<DomainEvent> = rolled
            .into_iter()
            .map(|r| r.into_event(student_id))
            .collect();
        let Some(position) = record
            .inventory
            .iter()
            .position(|held| held.instance_id == item.instance_id)
        else {
            return Err(LedgerError::NotFound(format!(
                "inventory item: {}",
                item.instance_id
            )));
        };

        let outcome = match power_up {
            PowerUp::GildedQuill => {
                if record.has_gilded_effect {
                    UseOutcome::kept(power_up, "A gilded quill is already active.")
                } else {
                    record.has_gilded_effect = true;
                    UseOutcome::used(power_up, "Your next award pays triple gold.")
                }
            }
            PowerUp::StarfallCatalyst => {
                if record.starfall_catalyst_active {
                    UseOutcome::kept(power_up, "A catalyst is already waiting.")
                } else {
                    record.starfall_catalyst_active = true;
                    UseOutcome::used(power_up, "Stars will fall in the next chapter.")
                }
            }
            PowerUp::CrownOfDestiny => {
                if record.pending_hero_status {
                    UseOutcome::kept(power_up, "You are already destined to lead.")
                } else {
                    record.pending_hero_status = true;
                    UseOutcome::used(power_up, "You will lead the next chapter.")
                }
            }
            PowerUp::FourLeafClover => {
                let calendar: Option<ClassCalendar> = tx.get(&keys::calendar(&student.class_id))?;
                let next = calendar.and_then(|c| c.next_lesson_after(today));
                match (record.luck_date, next) {
                    (Some(pending), _) if pending >= today => {
                        UseOutcome::kept(power_up, "Luck is already on its way.")
                    }
                    (_, None) => UseOutcome::kept(power_up, "No upcoming lesson is scheduled."),
                    (_, Some(next)) => {
                        record.luck_date = Some(next);
                        UseOutcome::used(power_up, format!("Luck is with you on {}.", next))
                    }
                }
            }
            PowerUp::Hourglass => extend_timer_bounty(
                tx,
                &student,
                now,
                ctx.config.economy.hourglass_extension_minutes,
            )?,
            PowerUp::BountyScroll => {
                let cap_key = keys::usage_cap(&student.class_id, power_up.tag(), &month_key(today));
                if tx.exists(&cap_key)? {
                    UseOutcome::kept(
                        power_up,
                        "A bounty scroll was already read in this class this month.",
                    )
                } else {
                    let stars = ctx.config.economy.bounty_scroll_stars;
                    tx.put(
                        &cap_key,
                        &UsageCap {
                            student_id: student_id.to_string(),
                            used_at: now,
                        },
                    )?;
                    let (_, gold) = credit_bonus(
                        tx,
                        ctx,
                        &student,
                        &mut record,
                        actor,
                        stars,
                        power_up.tag(),
                        None,
                        now,
                    )?;
                    events.push(DomainEvent::StarsAwarded {
                        student_id: student_id.to_string(),
                        class_id: student.class_id.clone(),
                        delta: stars,
                        effective_stars: stars,
                        gold_delta: gold,
                        reason: power_up.tag().to_string(),
                        date: today,
                        total_stars: record.total_stars,
                    });
                    UseOutcome::used(power_up, format!("+{} stars from the bounty scroll.", stars))
                }
            }
        };

        if !outcome.applied {
            if !events.is_empty() {
                tx.put_score(&record)?;
            }
            return Ok((outcome, events));
        }
        record.inventory.remove(position);
        record.touch();
        tx.put_score(&record)?;
        events.push(DomainEvent::PowerUpUsed {
            student_id: student_id.to_string(),
            item_name: item.name.clone(),
        });
        Ok((outcome, events))
    })?;

    if outcome.applied {
        info!("{} used {}", student_id, escape_log(&item.name));
    } else {
        debug!(
            "{} kept {}: {}",
            student_id,
            escape_log(&item.name),
            outcome.message
        );
    }
    ctx.publish(events);
    Ok(outcome)
}

/// Push back the deadline of the class's soonest-expiring open timer bounty.
fn extend_timer_bounty(
    tx: &mut LedgerTx<'_>,
    student: &StudentRecord,
    now: DateTime<Utc>,
    minutes: i64,
) -> Result<UseOutcome, LedgerError> {
    let bounties = tx.scan::<Bounty>(&keys::bounty_class_prefix(&student.class_id))?;
    let target = bounties
        .into_iter()
        .filter(|(_, bounty)| bounty.kind == BountyKind::Timer && bounty.is_open(now))
        .min_by_key(|(_, bounty)| bounty.deadline);
    let Some((key, mut bounty)) = target else {
        return Ok(UseOutcome::kept(
            PowerUp::Hourglass,
            "There is no running timer to extend.",
        ));
    };
    bounty.deadline += Duration::minutes(minutes);
    tx.put(&key, &bounty)?;
    Ok(UseOutcome::used(
        PowerUp::Hourglass,
        format!("{} gained {} minutes.", bounty.title, minutes),
    ))
}
