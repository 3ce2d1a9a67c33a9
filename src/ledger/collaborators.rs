//! Seams to the world outside the ledger: time, randomness, gold conversion, sprite
//! generation and user-facing notifications. Each is a trait so callers inject their own
//! and tests can pin behaviour.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;

use crate::config::HeroClassConfig;
use crate::ledger::events::DomainEvent;
use crate::ledger::types::{ScoreRecord, StudentRecord};

/// Teacher performing a write, recorded on daily records and audit entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub teacher_id: String,
    pub teacher_name: String,
}

impl Actor {
    pub fn new(teacher_id: &str, teacher_name: &str) -> Self {
        Self {
            teacher_id: teacher_id.to_string(),
            teacher_name: teacher_name.to_string(),
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Source of the uniform `[0, 1)` draw used by the luck effect.
pub trait LuckSource: Send + Sync {
    fn roll(&self) -> f64;
}

pub struct ThreadRngLuck;

impl LuckSource for ThreadRngLuck {
    fn roll(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Always returns the same draw.
pub struct FixedLuck(pub f64);

impl LuckSource for FixedLuck {
    fn roll(&self) -> f64 {
        self.0
    }
}

/// Hero-class gold rules. Pure functions, no I/O.
pub trait GoldConversion: Send + Sync {
    /// Gold worth of `stars` under `reason`. Awards credit the difference between the
    /// day's new and old value, bonus grants credit the grant itself.
    fn gold_for_award(&self, student: &StudentRecord, score: &ScoreRecord, reason: &str, stars: i64)
        -> i64;

    fn can_change_hero_class(&self, student: &StudentRecord, new_class: &str) -> bool;
}

/// One gold per star, plus a per-class bonus when the award reason matches the class's
/// favoured reason. Zero and negative values convert 1:1 with no bonus.
pub struct HeroClassGold {
    classes: HashMap<String, HeroClassConfig>,
}

impl HeroClassGold {
    pub fn new(classes: HashMap<String, HeroClassConfig>) -> Self {
        Self { classes }
    }
}

impl GoldConversion for HeroClassGold {
    fn gold_for_award(
        &self,
        student: &StudentRecord,
        _score: &ScoreRecord,
        reason: &str,
        stars: i64,
    ) -> i64 {
        if stars <= 0 {
            return stars;
        }
        let bonus = student
            .hero_class
            .as_ref()
            .and_then(|class| self.classes.get(class))
            .filter(|rule| rule.favoured_reason == reason)
            .map(|rule| rule.bonus_gold)
            .unwrap_or(0);
        stars + bonus
    }

    fn can_change_hero_class(&self, student: &StudentRecord, new_class: &str) -> bool {
        self.classes.contains_key(new_class) && student.hero_class.as_deref() != Some(new_class)
    }
}

/// Generates sprite bytes from a text prompt. May fail independently of ledger state.
pub trait AssetGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<Vec<u8>, String>;
}

/// Stand-in generator for deployments without an image backend; always fails so the
/// lifecycle advances and the sprite stays pending.
pub struct NoAssets;

impl AssetGenerator for NoAssets {
    fn generate(&self, _prompt: &str) -> Result<Vec<u8>, String> {
        Err("asset generation not configured".to_string())
    }
}

/// Presentation hook for toasts and celebrations. May be called any number of times.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &DomainEvent);
}

/// Writes notifications to the log.
pub struct LogNotifications;

impl NotificationSink for LogNotifications {
    fn notify(&self, event: &DomainEvent) {
        log::info!("notify: {}", event.summary());
    }
}

/// Keeps every notification in memory, for tests and embedding.
#[derive(Default)]
pub struct RecordingNotifications {
    seen: Mutex<Vec<DomainEvent>>,
}

impl RecordingNotifications {
    pub fn events(&self) -> Vec<DomainEvent> {
        match self.seen.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationSink for RecordingNotifications {
    fn notify(&self, event: &DomainEvent) {
        if let Ok(mut guard) = self.seen.lock() {
            guard.push(event.clone());
        }
    }
}
