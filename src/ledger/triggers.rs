//! Derived triggers, run after commit.
//!
//! Everything here recomputes from committed state, so a dropped or repeated trigger is
//! harmless. Failures are logged and counted, never handed back to the award caller.

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::ledger::bounty::advance_bounties;
use crate::ledger::context::LedgerContext;
use crate::ledger::errors::LedgerError;
use crate::ledger::events::DomainEvent;
use crate::ledger::familiar::{advance_familiar, generate_familiar_asset};
use crate::ledger::milestone::check_milestone;
use crate::ledger::rollover::recompute_guild_champions;
use crate::metrics;

fn report<T>(what: &str, subject: &str, result: Result<T, LedgerError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            metrics::inc_triggers_failed();
            warn!("{} failed for {}: {}", what, subject, e);
            None
        }
    }
}

/// Per-student triggers for an award. Returns the class whose milestone should be checked.
fn on_stars_awarded(ctx: &LedgerContext, student_id: &str, class_id: &str, delta: i64) -> Option<String> {
    if delta <= 0 {
        return None;
    }
    report("bounty progress", class_id, advance_bounties(ctx, class_id, delta));
    if let Some(Some(_)) = report("familiar lifecycle", student_id, advance_familiar(ctx, student_id)) {
        report("familiar sprite", student_id, generate_familiar_asset(ctx, student_id));
    }
    Some(class_id.to_string())
}

fn on_month_rolled_over(ctx: &LedgerContext, closed_month: &str) {
    report(
        "guild champions",
        closed_month,
        recompute_guild_champions(&ctx.store, closed_month, ctx.clock.now()),
    );
}

/// Run every trigger for `event` right away, milestone check included.
pub fn run_for_event(ctx: &LedgerContext, event: &DomainEvent) {
    match event {
        DomainEvent::StarsAwarded {
            student_id,
            class_id,
            delta,
            ..
        } => {
            if let Some(class_id) = on_stars_awarded(ctx, student_id, class_id, *delta) {
                report("milestone", &class_id, check_milestone(ctx, &class_id));
            }
        }
        DomainEvent::MonthRolledOver { closed_month, .. } => {
            on_month_rolled_over(ctx, closed_month);
        }
        _ => {}
    }
}

/// Consumes the outbox queue on a tokio task. Milestone checks for the same class are
/// coalesced over the configured debounce window.
pub struct TriggerDispatcher {
    ctx: LedgerContext,
    rx: UnboundedReceiver<DomainEvent>,
    debounce: Duration,
}

impl TriggerDispatcher {
    /// Attach to `ctx`'s outbox. Events published before this call are not seen.
    pub fn attach(ctx: LedgerContext) -> Self {
        let rx = ctx.outbox.attach();
        let debounce = Duration::from_millis(ctx.config.triggers.milestone_debounce_ms);
        Self { ctx, rx, debounce }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the outbox detaches, then flush pending milestone checks.
    pub async fn run(mut self) {
        let mut pending: HashSet<String> = HashSet::new();
        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(event) => {
                        if let Some(class_id) = self.handle(&event) {
                            pending.insert(class_id);
                            deadline.get_or_insert_with(|| Instant::now() + self.debounce);
                        }
                    }
                    None => {
                        self.flush(&mut pending);
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush(&mut pending);
                    deadline = None;
                }
            }
        }
        info!("trigger dispatcher stopped");
    }

    fn handle(&self, event: &DomainEvent) -> Option<String> {
        match event {
            DomainEvent::StarsAwarded {
                student_id,
                class_id,
                delta,
                ..
            } => on_stars_awarded(&self.ctx, student_id, class_id, *delta),
            DomainEvent::MonthRolledOver { closed_month, .. } => {
                on_month_rolled_over(&self.ctx, closed_month);
                None
            }
            _ => None,
        }
    }

    fn flush(&self, pending: &mut HashSet<String>) {
        if pending.is_empty() {
            return;
        }
        debug!("checking milestones for {} classes", pending.len());
        for class_id in pending.drain() {
            report("milestone", &class_id, check_milestone(&self.ctx, &class_id));
        }
    }
}
