use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ledger::errors::LedgerError;

pub const SCORE_SCHEMA_VERSION: u8 = 1;
pub const STUDENT_SCHEMA_VERSION: u8 = 1;
pub const CLASS_SCHEMA_VERSION: u8 = 1;

/// Upper bound on a single daily star value or bonus grant.
pub const MAX_AWARD_STARS: i64 = 1_000;

/// Reason recorded for the zero-star attendance marker.
pub const PRESENT_REASON: &str = "present";

/// Reasons that always create their own audit entry instead of merging into the day's
/// performance entry.
pub const BONUS_REASONS: [&str; 3] = ["welcome_back", "scholar_s_bonus", "story_weaver"];

pub fn is_bonus_reason(reason: &str) -> bool {
    BONUS_REASONS.contains(&reason)
}

/// `YYYY-MM` bucket a date belongs to.
pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// First calendar day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// The month immediately preceding the one containing `date`.
pub fn previous_month_start(date: NaiveDate) -> NaiveDate {
    let start = month_start(date);
    start
        .pred_opt()
        .map(month_start)
        .unwrap_or(start)
}

pub fn same_month(a: NaiveDate, b: NaiveDate) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

// ============================================================================
// Students and classes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudentRecord {
    pub id: String,
    pub name: String,
    pub class_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub hero_class: Option<String>,
    /// The one-time hero class change has been spent.
    #[serde(default)]
    pub hero_class_locked: bool,
    pub created_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl StudentRecord {
    pub fn new(id: &str, name: &str, class_id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            class_id: class_id.to_string(),
            guild_id: None,
            hero_class: None,
            hero_class_locked: false,
            created_at: Utc::now(),
            schema_version: STUDENT_SCHEMA_VERSION,
        }
    }

    pub fn with_guild(mut self, guild_id: &str) -> Self {
        self.guild_id = Some(guild_id.to_string());
        self
    }

    pub fn with_hero_class(mut self, hero_class: &str) -> Self {
        self.hero_class = Some(hero_class.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassRecord {
    pub id: String,
    pub name: String,
    pub teacher_id: String,
    /// League scoping for seasonal shop stock.
    pub league: String,
    /// Student currently designated as class protagonist.
    #[serde(default)]
    pub reigning_hero: Option<String>,
    pub created_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl ClassRecord {
    pub fn new(id: &str, name: &str, teacher_id: &str, league: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            teacher_id: teacher_id.to_string(),
            league: league.to_string(),
            reigning_hero: None,
            created_at: Utc::now(),
            schema_version: CLASS_SCHEMA_VERSION,
        }
    }

    pub fn is_reigning_hero(&self, student_id: &str) -> bool {
        self.reigning_hero.as_deref() == Some(student_id)
    }
}

/// Class-wide event active for a single calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DayEventKind {
    /// "2x Star Day": positive awards are doubled.
    DoubleStars,
    /// "Reason Bonus Day": +1 on awards for the matching reason.
    ReasonBonus { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayEvent {
    pub class_id: String,
    pub date: NaiveDate,
    pub kind: DayEventKind,
}

/// Scheduled lesson days for a class, with cancellations and holidays removed separately.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassCalendar {
    pub class_id: String,
    pub lesson_days: Vec<NaiveDate>,
    #[serde(default)]
    pub cancelled_days: Vec<NaiveDate>,
}

impl ClassCalendar {
    pub fn new(class_id: &str) -> Self {
        Self {
            class_id: class_id.to_string(),
            ..Default::default()
        }
    }

    fn is_held(&self, day: NaiveDate) -> bool {
        !self.cancelled_days.contains(&day)
    }

    /// First lesson strictly after `today` that has not been cancelled.
    pub fn next_lesson_after(&self, today: NaiveDate) -> Option<NaiveDate> {
        self.lesson_days
            .iter()
            .copied()
            .filter(|day| *day > today && self.is_held(*day))
            .min()
    }

    /// Returns `(scheduled, held)` lesson counts for the month containing `date`.
    pub fn lessons_in_month(&self, date: NaiveDate) -> (usize, usize) {
        let scheduled: Vec<NaiveDate> = self
            .lesson_days
            .iter()
            .copied()
            .filter(|day| same_month(*day, date))
            .collect();
        let held = scheduled.iter().filter(|day| self.is_held(**day)).count();
        (scheduled.len(), held)
    }
}

// ============================================================================
// Score ledger
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FamiliarStage {
    Egg,
    Alive,
}

/// Companion creature bought as an egg and grown by the owner's stars.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FamiliarState {
    pub type_id: String,
    pub stage: FamiliarStage,
    /// 0 while an egg, 1..=3 once hatched.
    pub level: u8,
    pub stars_when_purchased: i64,
    #[serde(default)]
    pub stars_when_hatched: Option<i64>,
    /// Generated sprite references keyed by level.
    #[serde(default)]
    pub assets: BTreeMap<u8, String>,
}

impl FamiliarState {
    pub fn new_egg(type_id: &str, total_stars: i64) -> Self {
        Self {
            type_id: type_id.to_string(),
            stage: FamiliarStage::Egg,
            level: 0,
            stars_when_purchased: total_stars,
            stars_when_hatched: None,
            assets: BTreeMap::new(),
        }
    }

    /// Level reached without a generated sprite yet.
    pub fn pending_asset_level(&self) -> Option<u8> {
        if self.stage == FamiliarStage::Alive && !self.assets.contains_key(&self.level) {
            Some(self.level)
        } else {
            None
        }
    }
}

/// Denormalized snapshot of a purchased item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryItem {
    /// Per-instance id so duplicates of the same catalog item can be consumed one at a time.
    pub instance_id: String,
    pub item_id: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub icon: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreRecord {
    pub student_id: String,
    pub total_stars: i64,
    pub monthly_stars: i64,
    pub gold: i64,
    pub inventory: Vec<InventoryItem>,
    #[serde(default)]
    pub familiar: Option<FamiliarState>,
    /// Next positive award pays triple gold.
    #[serde(default)]
    pub has_gilded_effect: bool,
    /// Day on which the random +1 star chance is live.
    #[serde(default)]
    pub luck_date: Option<NaiveDate>,
    #[serde(default)]
    pub starfall_catalyst_active: bool,
    #[serde(default)]
    pub pending_hero_status: bool,
    #[serde(default)]
    pub last_monthly_reset: Option<NaiveDate>,
    /// Last day a positive award landed; drives the Hero's Boon "first stars today" check.
    #[serde(default)]
    pub last_award_date: Option<NaiveDate>,
    #[serde(default)]
    pub hero_boon_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl ScoreRecord {
    pub fn new(student_id: &str, today: NaiveDate) -> Self {
        Self {
            student_id: student_id.to_string(),
            total_stars: 0,
            monthly_stars: 0,
            gold: 0,
            inventory: Vec::new(),
            familiar: None,
            has_gilded_effect: false,
            luck_date: None,
            starfall_catalyst_active: false,
            pending_hero_status: false,
            last_monthly_reset: Some(month_start(today)),
            last_award_date: None,
            hero_boon_date: None,
            updated_at: Utc::now(),
            schema_version: SCORE_SCHEMA_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Add stars to both counters and gold to the balance, refusing to overflow.
    pub fn credit(&mut self, stars: i64, gold: i64) -> Result<(), LedgerError> {
        let overflow = || {
            LedgerError::InvalidOperation(format!(
                "ledger overflow for {}: {:+} stars, {:+} gold",
                self.student_id, stars, gold
            ))
        };
        let total = self.total_stars.checked_add(stars).ok_or_else(overflow)?;
        let monthly = self.monthly_stars.checked_add(stars).ok_or_else(overflow)?;
        let balance = self.gold.checked_add(gold).ok_or_else(overflow)?;
        self.total_stars = total;
        self.monthly_stars = monthly;
        self.gold = balance;
        Ok(())
    }

    pub fn has_stars_on(&self, day: NaiveDate) -> bool {
        self.last_award_date == Some(day)
    }

    pub fn find_item(&self, instance_or_item_id: &str) -> Option<usize> {
        self.inventory
            .iter()
            .position(|item| item.instance_id == instance_or_item_id)
            .or_else(|| {
                self.inventory
                    .iter()
                    .position(|item| item.item_id == instance_or_item_id)
            })
    }
}

// ============================================================================
// Daily record and audit log
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyRecord {
    pub student_id: String,
    pub date: NaiveDate,
    /// Effective value after modifiers.
    pub stars: i64,
    /// Value the teacher typed.
    #[serde(default)]
    pub raw_stars: i64,
    /// One-shot stars (Hero's Boon, Lucky Star) already won on this record. Carried into
    /// every later edit of the same day.
    #[serde(default)]
    pub bonus_stars: i64,
    pub reason: String,
    pub teacher_id: String,
    pub updated_at: DateTime<Utc>,
}

impl DailyRecord {
    pub fn is_present_marker(&self) -> bool {
        self.reason == PRESENT_REASON
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// At most one per student per day; later awards update it in place.
    Performance,
    /// Additive entries, several allowed per day.
    Bonus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEntry {
    pub id: String,
    pub kind: AuditKind,
    pub student_id: String,
    pub class_id: String,
    pub teacher_id: String,
    pub teacher_name: String,
    pub stars: i64,
    pub reason: String,
    #[serde(default)]
    pub note: Option<String>,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Bounties and class quest
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BountyKind {
    Standard,
    Timer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BountyStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bounty {
    pub id: String,
    pub class_id: String,
    pub title: String,
    pub kind: BountyKind,
    pub target: i64,
    pub current_progress: i64,
    pub deadline: DateTime<Utc>,
    pub status: BountyStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Bounty {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == BountyStatus::Active && self.deadline > now
    }

    pub fn target_reached(&self) -> bool {
        self.current_progress >= self.target
    }
}

/// Per-class monthly quest progression.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassQuestState {
    pub class_id: String,
    pub difficulty_level: u32,
    #[serde(default)]
    pub quest_completed_at: Option<DateTime<Utc>>,
}

impl ClassQuestState {
    pub fn new(class_id: &str) -> Self {
        Self {
            class_id: class_id.to_string(),
            ..Default::default()
        }
    }

    pub fn completed_in_month_of(&self, now: DateTime<Utc>) -> bool {
        self.quest_completed_at
            .map(|at| same_month(at.date_naive(), now.date_naive()))
            .unwrap_or(false)
    }
}

/// Immutable snapshot written once per class per month on quest completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestHistoryRecord {
    pub class_id: String,
    pub level_reached: u32,
    pub goal_target: i64,
    pub stars_earned: i64,
    pub completed_at: DateTime<Utc>,
    pub month_key: String,
}

/// Archived monthly star bucket for a student.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonthlyHistoryRecord {
    pub student_id: String,
    pub month_key: String,
    pub stars: i64,
    pub archived_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuildChampion {
    pub guild_id: String,
    pub month_key: String,
    pub student_id: String,
    pub stars: i64,
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// Catalog
// ============================================================================

/// Always-available shop item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub icon: String,
    pub price: i64,
    /// Buying this item installs a familiar egg of the given type.
    #[serde(default)]
    pub familiar_type: Option<String>,
}

/// Unique, time-boxed shop item stocked by a teacher for one month and league.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeasonalItem {
    pub id: String,
    pub teacher_id: String,
    pub month_key: String,
    pub league: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub icon: String,
    pub price: i64,
    pub stocked_at: DateTime<Utc>,
}

impl CatalogItem {
    pub fn snapshot(&self, now: DateTime<Utc>) -> InventoryItem {
        InventoryItem {
            instance_id: uuid::Uuid::new_v4().to_string(),
            item_id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            image: self.image.clone(),
            icon: self.icon.clone(),
            acquired_at: now,
        }
    }
}

impl SeasonalItem {
    pub fn snapshot(&self, now: DateTime<Utc>) -> InventoryItem {
        InventoryItem {
            instance_id: uuid::Uuid::new_v4().to_string(),
            item_id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            image: self.image.clone(),
            icon: self.icon.clone(),
            acquired_at: now,
        }
    }
}
