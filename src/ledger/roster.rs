//! Classes and students: enrolment, removal, hero designation and admin corrections.
//!
//! Creation and deletion touch many documents at once and go through
//! [`LedgerStore::batch_write`](crate::ledger::storage::LedgerStore::batch_write); every
//! write that depends on a value it read uses a transaction instead.

use chrono::NaiveDate;
use log::{info, warn};

use crate::ledger::collaborators::Actor;
use crate::ledger::context::LedgerContext;
use crate::ledger::errors::LedgerError;
use crate::ledger::rollover::load_for_update;
use crate::ledger::storage::{keys, BatchOp};
use crate::ledger::types::{
    month_start, ClassCalendar, ClassRecord, DayEvent, DayEventKind, ScoreRecord, StudentRecord,
};

fn require_valid_id(kind: &str, id: &str) -> Result<(), LedgerError> {
    if keys::is_valid_id(id) {
        Ok(())
    } else {
        Err(LedgerError::InvalidOperation(format!(
            "invalid {} id {:?}",
            kind, id
        )))
    }
}

pub fn create_class(
    ctx: &LedgerContext,
    id: &str,
    name: &str,
    teacher_id: &str,
    league: &str,
) -> Result<ClassRecord, LedgerError> {
    require_valid_id("class", id)?;
    let class = ClassRecord::new(id, name, teacher_id, league);
    ctx.store.transaction(|tx| {
        if tx.exists(&keys::class(id))? {
            return Err(LedgerError::InvalidOperation(format!(
                "class {} already exists",
                id
            )));
        }
        tx.put(&keys::class(id), &class)
    })?;
    info!("class {} created for {}", id, teacher_id);
    Ok(class)
}

/// Enrol a student and open a zeroed score ledger for them in one batch.
pub fn create_student(
    ctx: &LedgerContext,
    student: StudentRecord,
) -> Result<StudentRecord, LedgerError> {
    require_valid_id("student", &student.id)?;
    ctx.store.get_class(&student.class_id)?;
    if ctx
        .store
        .get::<StudentRecord>(&keys::student(&student.id))?
        .is_some()
    {
        return Err(LedgerError::InvalidOperation(format!(
            "student {} already exists",
            student.id
        )));
    }
    let score = ScoreRecord::new(&student.id, ctx.clock.today());
    ctx.store.batch_write(vec![
        BatchOp::put(keys::student(&student.id), &student)?,
        BatchOp::put(keys::ledger(&student.id), &score)?,
    ])?;
    info!("student {} enrolled in {}", student.id, student.class_id);
    Ok(student)
}

/// Every key owned by one student.
fn student_keys(ctx: &LedgerContext, student_id: &str) -> Result<Vec<String>, LedgerError> {
    let mut owned = vec![keys::student(student_id), keys::ledger(student_id)];
    for prefix in [
        keys::daily_student_prefix(student_id),
        keys::audit_student_prefix(student_id),
        keys::month_history_prefix(student_id),
    ] {
        owned.extend(ctx.store.scan_keys(&prefix)?);
    }
    Ok(owned)
}

/// Remove a student with their ledger, daily records, audit entries and history.
/// Returns the number of documents deleted.
pub fn delete_student(ctx: &LedgerContext, student_id: &str) -> Result<usize, LedgerError> {
    let student = ctx.store.get_student(student_id)?;
    let mut owned = student_keys(ctx, student_id)?;
    if let Ok(mut class) = ctx.store.get_class(&student.class_id) {
        if class.is_reigning_hero(student_id) {
            class.reigning_hero = None;
            ctx.store.put_class(&class)?;
        }
    }
    owned.sort();
    owned.dedup();
    let ops = owned.into_iter().map(BatchOp::delete).collect();
    let removed = ctx.store.batch_write(ops)?;
    info!("student {} removed ({} documents)", student_id, removed);
    Ok(removed)
}

/// Remove a class, its students and everything scoped to it.
pub fn delete_class(ctx: &LedgerContext, class_id: &str) -> Result<usize, LedgerError> {
    ctx.store.get_class(class_id)?;
    let mut owned = vec![
        keys::class(class_id),
        keys::quest(class_id),
        keys::calendar(class_id),
    ];
    for prefix in [
        keys::bounty_class_prefix(class_id),
        keys::quest_history_prefix(class_id),
        keys::day_event_class_prefix(class_id),
        keys::usage_cap_class_prefix(class_id),
    ] {
        owned.extend(ctx.store.scan_keys(&prefix)?);
    }
    for student in ctx.store.list_class_students(class_id)? {
        owned.extend(student_keys(ctx, &student.id)?);
    }
    owned.sort();
    owned.dedup();
    let ops = owned.into_iter().map(BatchOp::delete).collect();
    let removed = ctx.store.batch_write(ops)?;
    info!("class {} removed ({} documents)", class_id, removed);
    Ok(removed)
}

/// Make `student_id` the class protagonist, or clear the title with `None`.
pub fn set_reigning_hero(
    ctx: &LedgerContext,
    class_id: &str,
    student_id: Option<&str>,
) -> Result<ClassRecord, LedgerError> {
    ctx.store.transaction(|tx| {
        let mut class: ClassRecord = tx
            .get(&keys::class(class_id))?
            .ok_or_else(|| LedgerError::NotFound(format!("class: {}", class_id)))?;
        if let Some(student_id) = student_id {
            let student: StudentRecord = tx
                .get(&keys::student(student_id))?
                .ok_or_else(|| LedgerError::NotFound(format!("student: {}", student_id)))?;
            if student.class_id != class_id {
                return Err(LedgerError::InvalidOperation(format!(
                    "{} is not in class {}",
                    student_id, class_id
                )));
            }
        }
        class.reigning_hero = student_id.map(str::to_string);
        tx.put(&keys::class(class_id), &class)?;
        Ok(class)
    })
}

/// Choose the protagonist for the next story chapter and crown them reigning hero.
///
/// A student holding a Crown of Destiny wins and the crown is spent. Otherwise the top
/// monthly scorer is chosen, ties going to the lowest id.
pub fn select_story_hero(ctx: &LedgerContext, class_id: &str) -> Result<Option<String>, LedgerError> {
    let current_start = month_start(ctx.clock.today());
    let chosen = ctx.store.transaction(|tx| {
        let mut class: ClassRecord = tx
            .get(&keys::class(class_id))?
            .ok_or_else(|| LedgerError::NotFound(format!("class: {}", class_id)))?;
        let mut students: Vec<StudentRecord> = tx
            .scan::<StudentRecord>(keys::STUDENT_PREFIX)?
            .into_iter()
            .map(|(_, s)| s)
            .filter(|s| s.class_id == class_id)
            .collect();
        students.sort_by(|a, b| a.id.cmp(&b.id));

        let mut destined: Option<ScoreRecord> = None;
        let mut top: Option<(String, i64)> = None;
        for student in &students {
            let Some(record) = tx.get::<ScoreRecord>(&keys::ledger(&student.id))? else {
                continue;
            };
            // A bucket from an earlier month counts as empty.
            let monthly = if record.last_monthly_reset == Some(current_start) {
                record.monthly_stars
            } else {
                0
            };
            if top.as_ref().map(|(_, best)| monthly > *best).unwrap_or(true) {
                top = Some((student.id.clone(), monthly));
            }
            if destined.is_none() && record.pending_hero_status {
                destined = Some(record);
            }
        }

        let hero = match destined {
            Some(mut record) => {
                record.pending_hero_status = false;
                record.touch();
                tx.put_score(&record)?;
                Some(record.student_id)
            }
            None => top.map(|(id, _)| id),
        };
        if hero.is_some() && class.reigning_hero != hero {
            class.reigning_hero = hero.clone();
            tx.put(&keys::class(class_id), &class)?;
        }
        Ok(hero)
    })?;
    if let Some(hero) = &chosen {
        info!("{} leads the next chapter of {}", hero, class_id);
    }
    Ok(chosen)
}

/// Spend a student's Starfall Catalyst for the story generator. Returns whether one was
/// active.
pub fn take_starfall_catalyst(ctx: &LedgerContext, student_id: &str) -> Result<bool, LedgerError> {
    ctx.store.transaction(|tx| {
        let mut record = tx.score(student_id)?;
        if !record.starfall_catalyst_active {
            return Ok(false);
        }
        record.starfall_catalyst_active = false;
        record.touch();
        tx.put_score(&record)?;
        Ok(true)
    })
}

/// Overwrite a student's lifetime total. The only path besides awards and revokes that
/// changes it.
pub fn admin_correct_total(
    ctx: &LedgerContext,
    actor: &Actor,
    student_id: &str,
    total_stars: i64,
) -> Result<ScoreRecord, LedgerError> {
    if total_stars < 0 {
        return Err(LedgerError::InvalidOperation(
            "total stars cannot be negative".to_string(),
        ));
    }
    let now = ctx.clock.now();
    let today = now.date_naive();
    let (record, previous) = ctx.store.transaction(|tx| {
        let (mut record, _) = load_for_update(tx, student_id, today, now)?;
        let previous = record.total_stars;
        record.total_stars = total_stars;
        record.touch();
        tx.put_score(&record)?;
        Ok((record, previous))
    })?;
    warn!(
        "{} corrected {}'s total stars {} -> {}",
        actor.teacher_id, student_id, previous, total_stars
    );
    Ok(record)
}

/// Pick or change a student's hero class. The first pick is free; the one change after it
/// locks the class for good.
pub fn change_hero_class(
    ctx: &LedgerContext,
    student_id: &str,
    new_class: &str,
) -> Result<StudentRecord, LedgerError> {
    let key = keys::student(student_id);
    let student = ctx.store.transaction(|tx| {
        let mut student: StudentRecord = tx
            .get(&key)?
            .ok_or_else(|| LedgerError::NotFound(format!("student: {}", student_id)))?;
        if student.hero_class_locked {
            return Err(LedgerError::AlreadyLocked(student_id.to_string()));
        }
        if !ctx.gold.can_change_hero_class(&student, new_class) {
            return Err(LedgerError::InvalidOperation(format!(
                "cannot switch to hero class {}",
                new_class
            )));
        }
        if student.hero_class.is_some() {
            student.hero_class_locked = true;
        }
        student.hero_class = Some(new_class.to_string());
        tx.put(&key, &student)?;
        Ok(student)
    })?;
    info!("{} is now a {}", student_id, new_class);
    Ok(student)
}

/// Schedule a class-wide event for one day, replacing any event already set.
pub fn set_day_event(
    ctx: &LedgerContext,
    class_id: &str,
    date: NaiveDate,
    kind: DayEventKind,
) -> Result<DayEvent, LedgerError> {
    ctx.store.get_class(class_id)?;
    let event = DayEvent {
        class_id: class_id.to_string(),
        date,
        kind,
    };
    ctx.store.put(&keys::day_event(class_id, date), &event)?;
    Ok(event)
}

pub fn clear_day_event(ctx: &LedgerContext, class_id: &str, date: NaiveDate) -> Result<bool, LedgerError> {
    ctx.store.delete(&keys::day_event(class_id, date))
}

pub fn set_calendar(ctx: &LedgerContext, calendar: &ClassCalendar) -> Result<(), LedgerError> {
    ctx.store.get_class(&calendar.class_id)?;
    ctx.store.put(&keys::calendar(&calendar.class_id), calendar)
}
