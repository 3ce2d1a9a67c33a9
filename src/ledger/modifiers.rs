//! Award modifier pipeline.
//!
//! Turns a teacher's raw star value for the day into the effective value after class
//! events, Hero's Boon, the gilded gold effect and the luck effect. Pure: callers pass in
//! the ledger snapshot and a pre-rolled random draw, and apply the returned flag changes
//! themselves.

use chrono::NaiveDate;

use crate::ledger::types::{DayEventKind, ScoreRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierNote {
    DoubleStarDay,
    ReasonBonusDay,
    HerosBoon,
    Gilded,
    LuckyStar,
    LuckFizzled,
}

impl ModifierNote {
    pub fn label(&self) -> &'static str {
        match self {
            ModifierNote::DoubleStarDay => "2x Star Day",
            ModifierNote::ReasonBonusDay => "Reason Bonus Day",
            ModifierNote::HerosBoon => "Hero's Boon",
            ModifierNote::Gilded => "Gilded",
            ModifierNote::LuckyStar => "Lucky Star",
            ModifierNote::LuckFizzled => "Luck faded",
        }
    }
}

/// Everything the pipeline looks at besides the ledger snapshot.
#[derive(Debug, Clone)]
pub struct ModifierInput<'a> {
    /// Raw star value the teacher set for today.
    pub base_stars: i64,
    pub reason: &'a str,
    pub day_event: Option<&'a DayEventKind>,
    pub is_reigning_hero: bool,
    /// Effective value already recorded today by the acting teacher.
    pub old_stars: i64,
    /// One-shot stars already won on that record. Re-added on every edit of a positive
    /// value since the boon and luck cannot fire twice in a day.
    pub carried_bonus: i64,
    pub today: NaiveDate,
    /// Uniform draw in `[0, 1)`, rolled once per logical award.
    pub luck_roll: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ModifierSettings {
    pub gilded_multiplier: i64,
    /// Success probability of the luck effect, `0.0..=1.0`.
    pub luck_chance: f64,
}

impl Default for ModifierSettings {
    fn default() -> Self {
        Self {
            gilded_multiplier: 3,
            luck_chance: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardModifiers {
    pub effective_stars: i64,
    pub gold_multiplier: i64,
    pub notes: Vec<ModifierNote>,
    /// One-shot stars in `effective_stars`, carried plus newly won.
    pub bonus_stars: i64,
    /// Hero's Boon applied; the caller stamps it as used for today.
    pub hero_boon: bool,
    /// The gilded flag was spent and must be cleared.
    pub consumed_gilded: bool,
    /// The luck date was spent (win or lose) and must be cleared.
    pub consumed_luck: bool,
}

impl AwardModifiers {
    pub fn has(&self, note: ModifierNote) -> bool {
        self.notes.contains(&note)
    }
}

/// Compute the effective award. Never fails; missing data means "no modifier".
pub fn compute_effective_award(
    input: &ModifierInput<'_>,
    ledger: Option<&ScoreRecord>,
    settings: &ModifierSettings,
) -> AwardModifiers {
    let mut effective = input.base_stars;
    let mut notes = Vec::new();

    if input.base_stars > 0 {
        match input.day_event {
            Some(DayEventKind::DoubleStars) => {
                effective *= 2;
                notes.push(ModifierNote::DoubleStarDay);
            }
            Some(DayEventKind::ReasonBonus { reason }) if reason == input.reason => {
                effective += 1;
                notes.push(ModifierNote::ReasonBonusDay);
            }
            _ => {}
        }
    }
    let mut bonus_stars = 0;
    if input.base_stars > 0 {
        effective += input.carried_bonus;
        bonus_stars = input.carried_bonus;
    }

    let stars_already_today = input.old_stars > 0
        || ledger
            .map(|record| {
                record.has_stars_on(input.today) || record.hero_boon_date == Some(input.today)
            })
            .unwrap_or(false);
    let hero_boon = input.is_reigning_hero && !stars_already_today && input.base_stars > 0;
    if hero_boon {
        effective += 1;
        bonus_stars += 1;
        notes.push(ModifierNote::HerosBoon);
    }

    let mut gold_multiplier = 1;
    let mut consumed_gilded = false;
    if let Some(record) = ledger {
        if record.has_gilded_effect && effective - input.old_stars > 0 {
            gold_multiplier = settings.gilded_multiplier;
            consumed_gilded = true;
            notes.push(ModifierNote::Gilded);
        }
    }

    let mut consumed_luck = false;
    if let Some(record) = ledger {
        if record.luck_date == Some(input.today) && effective - input.old_stars > 0 && !hero_boon {
            consumed_luck = true;
            if input.luck_roll < settings.luck_chance {
                effective += 1;
                bonus_stars += 1;
                notes.push(ModifierNote::LuckyStar);
            } else {
                notes.push(ModifierNote::LuckFizzled);
            }
        }
    }

    AwardModifiers {
        effective_stars: effective,
        gold_multiplier,
        notes,
        bonus_stars,
        hero_boon,
        consumed_gilded,
        consumed_luck,
    }
}
