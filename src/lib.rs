//! # Starledger - Score & Economy Engine for Gamified Classrooms
//!
//! Starledger keeps the canonical record of what every student has earned and spent: stars,
//! a monthly star bucket, gold, inventory and a familiar companion. Every change runs as an
//! optimistic transaction over an embedded sled store, so concurrent teachers never lose or
//! double-count an award.
//!
//! ## Features
//!
//! - **Awards**: per-teacher daily star values with class events, Hero's Boon, gilded gold
//!   and luck applied by a pure modifier pipeline.
//! - **Compensating revokes**: deleting an award log undoes it without resurrecting a closed
//!   monthly bucket.
//! - **Shop**: a fixed catalog plus unique seasonal items sold to exactly one buyer.
//! - **Power-ups**: consumable items whose effects commit together with their removal.
//! - **Derived triggers**: bounties, the monthly class quest, familiar growth and guild
//!   champions, recomputed after commit from an outbox of domain events.
//! - **Lazy rollover**: monthly buckets are archived the first time a student is touched in
//!   a new month.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use starledger::config::Config;
//! use starledger::ledger::{apply_star_award, Actor, LedgerContext, TriggerDispatcher};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("starledger.toml").await?;
//!     let ctx = LedgerContext::open(config)?;
//!     let triggers = TriggerDispatcher::attach(ctx.clone()).spawn();
//!
//!     let teacher = Actor::new("t-ada", "Ms. Ada");
//!     let outcome = apply_star_award(&ctx, &teacher, "s-001", 2, "teamwork")?;
//!     println!("awarded {:+} stars", outcome.delta);
//!
//!     ctx.outbox.detach();
//!     triggers.await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`ledger`] - store, transactions, domain operations and triggers
//! - [`config`] - configuration management and validation
//! - [`logutil`] - log-safe rendering of free text
//! - [`metrics`] - process-wide counters

pub mod config;
pub mod ledger;
pub mod logutil;
pub mod metrics;
