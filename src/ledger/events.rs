//! Domain events emitted after a ledger transaction commits.
//!
//! Transaction bodies may be re-run, so nothing user-visible happens inside them. Each
//! operation collects the events describing what it committed and hands them to the
//! [`Outbox`] once, after commit. The outbox forwards every event to the notification sink
//! and, when a [`crate::ledger::triggers::TriggerDispatcher`] is attached, to its queue.

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use log::debug;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::ledger::collaborators::NotificationSink;
use crate::ledger::types::FamiliarStage;
use crate::metrics;

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    StarsAwarded {
        student_id: String,
        class_id: String,
        /// Change applied to the aggregates (new effective value minus the old one).
        delta: i64,
        effective_stars: i64,
        gold_delta: i64,
        reason: String,
        date: NaiveDate,
        total_stars: i64,
    },
    /// Same star count re-submitted with a different reason.
    ReasonCorrected {
        student_id: String,
        reason: String,
    },
    HeroBoonGranted {
        student_id: String,
    },
    LuckyStar {
        student_id: String,
    },
    AwardRevoked {
        log_id: String,
        student_id: String,
        class_id: String,
        stars: i64,
    },
    MonthRolledOver {
        student_id: String,
        closed_month: String,
        archived_stars: i64,
    },
    ItemPurchased {
        student_id: String,
        item_id: String,
        name: String,
        price: i64,
    },
    PowerUpUsed {
        student_id: String,
        item_name: String,
    },
    BountyReadyToClaim {
        bounty_id: String,
        class_id: String,
        title: String,
    },
    BountyClaimed {
        bounty_id: String,
        class_id: String,
    },
    QuestCompleted {
        class_id: String,
        level_reached: u32,
        month_key: String,
    },
    FamiliarAdvanced {
        student_id: String,
        stage: FamiliarStage,
        level: u8,
    },
    GuildChampionsRecorded {
        month_key: String,
        guilds: usize,
    },
}

impl DomainEvent {
    /// One-line description for logs and plain-text notifications.
    pub fn summary(&self) -> String {
        match self {
            DomainEvent::StarsAwarded {
                student_id,
                delta,
                reason,
                ..
            } => format!(
                "{} {:+} stars ({})",
                student_id,
                delta,
                crate::logutil::escape_log(reason)
            ),
            DomainEvent::ReasonCorrected { student_id, reason } => format!(
                "{} reason now {}",
                student_id,
                crate::logutil::escape_log(reason)
            ),
            DomainEvent::HeroBoonGranted { student_id } => format!("Hero's Boon for {}", student_id),
            DomainEvent::LuckyStar { student_id } => format!("Lucky star for {}", student_id),
            DomainEvent::AwardRevoked {
                student_id, stars, ..
            } => format!("{} award of {} revoked", student_id, stars),
            DomainEvent::MonthRolledOver {
                student_id,
                closed_month,
                archived_stars,
            } => format!(
                "{} closed {} with {} stars",
                student_id, closed_month, archived_stars
            ),
            DomainEvent::ItemPurchased {
                student_id,
                name,
                price,
                ..
            } => format!("{} bought {} for {} gold", student_id, name, price),
            DomainEvent::PowerUpUsed {
                student_id,
                item_name,
            } => format!("{} used {}", student_id, item_name),
            DomainEvent::BountyReadyToClaim { title, .. } => {
                format!("Bounty '{}' ready to claim", title)
            }
            DomainEvent::BountyClaimed { bounty_id, .. } => format!("Bounty {} claimed", bounty_id),
            DomainEvent::QuestCompleted {
                class_id,
                level_reached,
                month_key,
            } => format!(
                "Class {} completed {} quest, now level {}",
                class_id, month_key, level_reached
            ),
            DomainEvent::FamiliarAdvanced {
                student_id,
                stage,
                level,
            } => format!("{}'s familiar is {:?} level {}", student_id, stage, level),
            DomainEvent::GuildChampionsRecorded { month_key, guilds } => {
                format!("{} guild champions recorded for {}", guilds, month_key)
            }
        }
    }
}

/// Post-commit delivery point for domain events.
pub struct Outbox {
    sink: Arc<dyn NotificationSink>,
    queue: Mutex<Option<UnboundedSender<DomainEvent>>>,
}

impl Outbox {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            queue: Mutex::new(None),
        }
    }

    /// Route future events to a consumer as well as the sink. Replaces any previous consumer.
    pub fn attach(&self) -> UnboundedReceiver<DomainEvent> {
        let (tx, rx) = unbounded_channel();
        if let Ok(mut guard) = self.queue.lock() {
            *guard = Some(tx);
        }
        rx
    }

    pub fn detach(&self) {
        if let Ok(mut guard) = self.queue.lock() {
            *guard = None;
        }
    }

    pub fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            metrics::inc_events_emitted();
            self.sink.notify(&event);
            let Ok(mut guard) = self.queue.lock() else {
                continue;
            };
            if let Some(tx) = guard.as_ref() {
                if tx.send(event).is_err() {
                    debug!("trigger queue closed; detaching");
                    *guard = None;
                }
            }
        }
    }
}
