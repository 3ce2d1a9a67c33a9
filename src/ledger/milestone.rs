//! Monthly class quest.
//!
//! The class goal scales with head count and difficulty level and shrinks for months with
//! cancelled lessons. Progress is never stored; each check sums the current monthly buckets
//! so repeated or dropped checks converge on the same answer.

use chrono::NaiveDate;
use log::{debug, info};

use crate::config::QuestConfig;
use crate::ledger::context::LedgerContext;
use crate::ledger::errors::LedgerError;
use crate::ledger::events::DomainEvent;
use crate::ledger::storage::keys;
use crate::ledger::types::{
    month_key, month_start, ClassCalendar, ClassQuestState, QuestHistoryRecord, ScoreRecord,
    StudentRecord,
};

/// Fraction of the month's lessons actually held, clamped to `[min, 1.0]`. A class without
/// a calendar gets the full goal.
pub fn month_modifier(calendar: Option<&ClassCalendar>, date: NaiveDate, min: f64) -> f64 {
    let Some(calendar) = calendar else {
        return 1.0;
    };
    let (scheduled, held) = calendar.lessons_in_month(date);
    if scheduled == 0 {
        return 1.0;
    }
    (held as f64 / scheduled as f64).clamp(min, 1.0)
}

pub fn quest_goal(student_count: usize, difficulty_level: u32, modifier: f64, cfg: &QuestConfig) -> i64 {
    let per_student = cfg.base_goal_per_student + cfg.goal_step_per_level * i64::from(difficulty_level);
    (student_count as f64 * per_student as f64 * modifier).ceil() as i64
}

/// Where a class stands against this month's goal.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestProgress {
    pub class_id: String,
    pub difficulty_level: u32,
    pub stars_earned: i64,
    pub goal_target: i64,
    pub completed_this_month: bool,
}

/// Recompute the class total and complete the quest on the first crossing this month.
/// Returns the history record written, if this call completed it.
pub fn check_milestone(
    ctx: &LedgerContext,
    class_id: &str,
) -> Result<Option<QuestHistoryRecord>, LedgerError> {
    let now = ctx.clock.now();
    let today = now.date_naive();
    let month = month_key(today);
    let current_start = month_start(today);
    let cfg = ctx.config.quest.clone();

    let completed = ctx.store.transaction(|tx| {
        let quest_key = keys::quest(class_id);
        let history_key = keys::quest_history(class_id, &month);
        let mut state: ClassQuestState = tx
            .get(&quest_key)?
            .unwrap_or_else(|| ClassQuestState::new(class_id));
        if state.completed_in_month_of(now) || tx.exists(&history_key)? {
            return Ok(None);
        }

        let students: Vec<StudentRecord> = tx
            .scan::<StudentRecord>(keys::STUDENT_PREFIX)?
            .into_iter()
            .map(|(_, s)| s)
            .filter(|s| s.class_id == class_id)
            .collect();
        if students.is_empty() {
            return Ok(None);
        }
        let mut stars_earned = 0;
        for student in &students {
            let score: Option<ScoreRecord> = tx.get(&keys::ledger(&student.id))?;
            // A bucket not yet rolled over still belongs to last month.
            if let Some(score) = score.filter(|s| s.last_monthly_reset == Some(current_start)) {
                stars_earned += score.monthly_stars;
            }
        }
        let calendar: Option<ClassCalendar> = tx.get(&keys::calendar(class_id))?;
        let modifier = month_modifier(calendar.as_ref(), today, cfg.min_month_modifier);
        let goal_target = quest_goal(students.len(), state.difficulty_level, modifier, &cfg);
        if stars_earned < goal_target {
            debug!(
                "quest {}: {}/{} at level {}",
                class_id, stars_earned, goal_target, state.difficulty_level
            );
            return Ok(None);
        }

        state.difficulty_level += 1;
        state.quest_completed_at = Some(now);
        tx.put(&quest_key, &state)?;
        let record = QuestHistoryRecord {
            class_id: class_id.to_string(),
            level_reached: state.difficulty_level,
            goal_target,
            stars_earned,
            completed_at: now,
            month_key: month.clone(),
        };
        tx.put(&history_key, &record)?;
        Ok(Some(record))
    })?;

    if let Some(record) = &completed {
        info!(
            "class {} completed the {} quest: {}/{} stars, now level {}",
            class_id, record.month_key, record.stars_earned, record.goal_target, record.level_reached
        );
        ctx.publish(vec![DomainEvent::QuestCompleted {
            class_id: class_id.to_string(),
            level_reached: record.level_reached,
            month_key: record.month_key.clone(),
        }]);
    }
    Ok(completed)
}

/// Read-only view of this month's progress.
pub fn quest_progress(ctx: &LedgerContext, class_id: &str) -> Result<QuestProgress, LedgerError> {
    let now = ctx.clock.now();
    let today = now.date_naive();
    let current_start = month_start(today);
    let state = quest_state(ctx, class_id)?;
    let students = ctx.store.list_class_students(class_id)?;
    let mut stars_earned = 0;
    for student in &students {
        if let Some(score) = ctx.store.get::<ScoreRecord>(&keys::ledger(&student.id))? {
            if score.last_monthly_reset == Some(current_start) {
                stars_earned += score.monthly_stars;
            }
        }
    }
    let calendar: Option<ClassCalendar> = ctx.store.get(&keys::calendar(class_id))?;
    let modifier = month_modifier(calendar.as_ref(), today, ctx.config.quest.min_month_modifier);
    Ok(QuestProgress {
        class_id: class_id.to_string(),
        difficulty_level: state.difficulty_level,
        stars_earned,
        goal_target: quest_goal(students.len(), state.difficulty_level, modifier, &ctx.config.quest),
        completed_this_month: state.completed_in_month_of(now),
    })
}

pub fn quest_state(ctx: &LedgerContext, class_id: &str) -> Result<ClassQuestState, LedgerError> {
    Ok(ctx
        .store
        .get(&keys::quest(class_id))?
        .unwrap_or_else(|| ClassQuestState::new(class_id)))
}

/// Completed quests for a class, oldest month first.
pub fn quest_history(
    ctx: &LedgerContext,
    class_id: &str,
) -> Result<Vec<QuestHistoryRecord>, LedgerError> {
    Ok(ctx
        .store
        .scan::<QuestHistoryRecord>(&keys::quest_history_prefix(class_id))?
        .into_iter()
        .map(|(_, record)| record)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, d).unwrap()
    }

    #[test]
    fn goal_grows_with_level() {
        let cfg = QuestConfig::default();
        assert_eq!(quest_goal(4, 0, 1.0, &cfg), 60);
        assert_eq!(quest_goal(4, 2, 1.0, &cfg), 84);
    }

    #[test]
    fn cancelled_lessons_discount_goal() {
        let mut calendar = ClassCalendar::new("c1");
        calendar.lesson_days = vec![day(2), day(9), day(16), day(23)];
        calendar.cancelled_days = vec![day(23)];
        let modifier = month_modifier(Some(&calendar), day(10), 0.5);
        assert!((modifier - 0.75).abs() < f64::EPSILON);
        assert_eq!(quest_goal(3, 0, modifier, &QuestConfig::default()), 34);
    }

    #[test]
    fn modifier_is_clamped() {
        let mut calendar = ClassCalendar::new("c1");
        calendar.lesson_days = vec![day(2), day(9), day(16), day(23)];
        calendar.cancelled_days = vec![day(2), day(9), day(16)];
        assert_eq!(month_modifier(Some(&calendar), day(1), 0.5), 0.5);
        assert_eq!(month_modifier(None, day(1), 0.5), 1.0);
    }
}
