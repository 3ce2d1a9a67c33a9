//! Test utilities & fixtures.
//! Builds a throwaway ledger in a temp dir with a pinned clock, a pinned luck draw and a
//! recording notification sink.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use starledger::config::Config;
use starledger::ledger::storage::keys;
use starledger::ledger::{
    create_class, create_student, Actor, AssetGenerator, FixedClock, FixedLuck,
    LedgerContext, LedgerStoreBuilder, RecordingNotifications, ScoreRecord, StudentRecord,
};

pub struct Harness {
    pub dir: TempDir,
    pub ctx: LedgerContext,
    pub clock: Arc<FixedClock>,
    pub sink: Arc<RecordingNotifications>,
}

/// 10:00 UTC on the given day.
pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn teacher() -> Actor {
    Actor::new("t-ada", "Ms. Ada")
}

pub fn second_teacher() -> Actor {
    Actor::new("t-grace", "Mr. Grace")
}

pub fn harness(now: DateTime<Utc>) -> Harness {
    harness_with(now, 0.99, None, |_| {})
}

/// Full control over the luck draw, the asset generator and config tweaks.
pub fn harness_with(
    now: DateTime<Utc>,
    luck: f64,
    assets: Option<Arc<dyn AssetGenerator>>,
    tweak: impl FnOnce(&mut Config),
) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config::default();
    config.ledger.data_dir = dir.path().to_string_lossy().into_owned();
    config.logging.file = None;
    tweak(&mut config);
    let store = LedgerStoreBuilder::new(dir.path())
        .max_retries(config.ledger.max_transaction_retries)
        .open()
        .expect("open store");
    let clock = Arc::new(FixedClock::new(now));
    let sink = Arc::new(RecordingNotifications::default());
    let mut builder = LedgerContext::builder(store, config)
        .clock(clock.clone())
        .luck(Arc::new(FixedLuck(luck)))
        .notifications(sink.clone());
    if let Some(assets) = assets {
        builder = builder.assets(assets);
    }
    Harness {
        dir,
        ctx: builder.build(),
        clock,
        sink,
    }
}

impl Harness {
    /// Create class `class_id` in the "junior" league with the given students.
    pub fn enrol(&self, class_id: &str, students: &[&str]) {
        create_class(&self.ctx, class_id, "Class", "t-ada", "junior").expect("class");
        for id in students {
            create_student(&self.ctx, StudentRecord::new(id, id, class_id)).expect("student");
        }
    }

    pub fn score(&self, student_id: &str) -> ScoreRecord {
        self.ctx.store.get_score(student_id).expect("score")
    }

    /// Overwrite fields of a stored ledger directly.
    pub fn edit_score(&self, student_id: &str, edit: impl FnOnce(&mut ScoreRecord)) {
        let mut record = self.score(student_id);
        edit(&mut record);
        self.ctx
            .store
            .put(&keys::ledger(student_id), &record)
            .expect("put score");
    }

    pub fn fund(&self, student_id: &str, gold: i64) {
        self.edit_score(student_id, |r| r.gold = gold);
    }
}
