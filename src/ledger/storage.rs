use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{abort, ConflictableTransactionResult, TransactionError};
use sled::IVec;

use crate::ledger::errors::LedgerError;
use crate::ledger::types::{
    ClassRecord, ScoreRecord, StudentRecord, CLASS_SCHEMA_VERSION, SCORE_SCHEMA_VERSION,
    STUDENT_SCHEMA_VERSION,
};
use crate::metrics;

const TREE_DOCUMENTS: &str = "starledger";

pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Document key layout. Every entity lives in one tree so a single sled transaction can
/// cover the score ledger, daily record and audit entry together.
pub mod keys {
    use chrono::NaiveDate;

    pub fn ledger(student_id: &str) -> String {
        format!("ledger:{}", student_id)
    }
    pub fn student(student_id: &str) -> String {
        format!("student:{}", student_id)
    }
    pub const STUDENT_PREFIX: &str = "student:";
    pub fn class(class_id: &str) -> String {
        format!("class:{}", class_id)
    }
    pub fn daily(student_id: &str, date: NaiveDate, teacher_id: &str) -> String {
        format!("daily:{}:{}:{}", student_id, date, teacher_id)
    }
    pub fn daily_day_prefix(student_id: &str, date: NaiveDate) -> String {
        format!("daily:{}:{}:", student_id, date)
    }
    pub fn daily_student_prefix(student_id: &str) -> String {
        format!("daily:{}:", student_id)
    }
    pub const AUDIT_PREFIX: &str = "audit:";
    pub fn audit(log_id: &str) -> String {
        format!("audit:{}", log_id)
    }
    pub fn performance_log_id(student_id: &str, date: NaiveDate) -> String {
        format!("{}:{}:performance", student_id, date)
    }
    pub fn bonus_log_id(student_id: &str, date: NaiveDate) -> String {
        format!("{}:{}:bonus:{}", student_id, date, uuid::Uuid::new_v4())
    }
    pub fn audit_student_prefix(student_id: &str) -> String {
        format!("audit:{}:", student_id)
    }
    pub fn bounty(class_id: &str, bounty_id: &str) -> String {
        format!("bounty:{}:{}", class_id, bounty_id)
    }
    pub fn bounty_class_prefix(class_id: &str) -> String {
        format!("bounty:{}:", class_id)
    }
    pub fn quest(class_id: &str) -> String {
        format!("quest:{}", class_id)
    }
    pub fn quest_history(class_id: &str, month_key: &str) -> String {
        format!("quest_history:{}:{}", class_id, month_key)
    }
    pub fn quest_history_prefix(class_id: &str) -> String {
        format!("quest_history:{}:", class_id)
    }
    pub fn month_history(student_id: &str, month_key: &str) -> String {
        format!("month_history:{}:{}", student_id, month_key)
    }
    pub fn month_history_prefix(student_id: &str) -> String {
        format!("month_history:{}:", student_id)
    }
    pub fn seasonal(item_id: &str) -> String {
        format!("seasonal:{}", item_id)
    }
    pub const SEASONAL_PREFIX: &str = "seasonal:";
    pub fn seasonal_sold(item_id: &str) -> String {
        format!("sold:{}", item_id)
    }
    pub fn day_event(class_id: &str, date: NaiveDate) -> String {
        format!("event:{}:{}", class_id, date)
    }
    pub fn day_event_class_prefix(class_id: &str) -> String {
        format!("event:{}:", class_id)
    }
    pub fn calendar(class_id: &str) -> String {
        format!("calendar:{}", class_id)
    }
    pub fn usage_cap(class_id: &str, effect: &str, month_key: &str) -> String {
        format!("cap:{}:{}:{}", class_id, effect, month_key)
    }
    pub fn usage_cap_class_prefix(class_id: &str) -> String {
        format!("cap:{}:", class_id)
    }
    pub fn champion(guild_id: &str, month_key: &str) -> String {
        format!("champion:{}:{}", guild_id, month_key)
    }
    pub fn asset(digest: &str) -> String {
        format!("asset:{}", digest)
    }

    /// Ids become key segments, so they may not contain the separator.
    pub fn is_valid_id(id: &str) -> bool {
        !id.is_empty() && !id.contains(':')
    }
}

fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, LedgerError> {
    Ok(bincode::serialize(value)?)
}

fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LedgerError> {
    Ok(bincode::deserialize::<T>(bytes)?)
}

/// Write applied as part of an all-or-nothing batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl BatchOp {
    pub fn put<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self, LedgerError> {
        Ok(BatchOp::Put {
            key: key.into(),
            value: serialize(value)?,
        })
    }

    pub fn delete(key: impl Into<String>) -> Self {
        BatchOp::Delete { key: key.into() }
    }
}

/// Marker abort used when a validated read changed underneath the transaction.
#[derive(Debug)]
struct ReadSetChanged;

/// One attempt of an optimistic transaction.
///
/// Reads are remembered with the exact bytes observed; writes are buffered and only
/// applied at commit if every remembered read is still current.
pub struct LedgerTx<'a> {
    tree: &'a sled::Tree,
    reads: HashMap<Vec<u8>, Option<IVec>>,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> LedgerTx<'a> {
    fn new(tree: &'a sled::Tree) -> Self {
        Self {
            tree,
            reads: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }

    fn read_raw(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, LedgerError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        if let Some(seen) = self.reads.get(key) {
            return Ok(seen.as_ref().map(|v| v.to_vec()));
        }
        let current = self.tree.get(key)?;
        let out = current.as_ref().map(|v| v.to_vec());
        self.reads.insert(key.to_vec(), current);
        Ok(out)
    }

    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>, LedgerError> {
        match self.read_raw(key.as_bytes())? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn exists(&mut self, key: &str) -> Result<bool, LedgerError> {
        Ok(self.read_raw(key.as_bytes())?.is_some())
    }

    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), LedgerError> {
        self.writes
            .insert(key.as_bytes().to_vec(), Some(serialize(value)?));
        Ok(())
    }

    pub fn delete(&mut self, key: &str) {
        self.writes.insert(key.as_bytes().to_vec(), None);
    }

    /// Prefix scan merged with this attempt's pending writes. Every returned document joins
    /// the read set, so a concurrent update or delete of any of them forces a retry.
    /// Documents inserted under the prefix by others after the scan are not detected.
    pub fn scan<T: DeserializeOwned>(
        &mut self,
        prefix: &str,
    ) -> Result<Vec<(String, T)>, LedgerError> {
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
        for entry in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry?;
            let key = key.to_vec();
            let observed = self
                .reads
                .entry(key.clone())
                .or_insert_with(|| Some(value.clone()))
                .as_ref()
                .map(|v| v.to_vec());
            merged.insert(key, observed);
        }
        for (key, pending) in self.writes.range(prefix.as_bytes().to_vec()..) {
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            merged.insert(key.clone(), pending.clone());
        }
        let mut out = Vec::new();
        for (key, value) in merged {
            if let Some(bytes) = value {
                out.push((String::from_utf8_lossy(&key).into_owned(), deserialize(&bytes)?));
            }
        }
        Ok(out)
    }

    /// Fetch a student's score ledger, failing the transaction if it is missing.
    pub fn score(&mut self, student_id: &str) -> Result<ScoreRecord, LedgerError> {
        let record: ScoreRecord = self
            .get(&keys::ledger(student_id))?
            .ok_or_else(|| LedgerError::NotFound(format!("score ledger: {}", student_id)))?;
        check_schema("score", SCORE_SCHEMA_VERSION, record.schema_version)?;
        Ok(record)
    }

    pub fn put_score(&mut self, record: &ScoreRecord) -> Result<(), LedgerError> {
        self.put(&keys::ledger(&record.student_id), record)
    }

    fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }
}

fn check_schema(entity: &'static str, expected: u8, found: u8) -> Result<(), LedgerError> {
    if expected != found {
        return Err(LedgerError::SchemaMismatch {
            entity,
            expected,
            found,
        });
    }
    Ok(())
}

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct LedgerStoreBuilder {
    path: PathBuf,
    max_retries: u32,
}

impl LedgerStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Bound on optimistic attempts before a transaction reports `TransientConflict`.
    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = attempts.max(1);
        self
    }

    pub fn open(self) -> Result<LedgerStore, LedgerError> {
        LedgerStore::open_with_options(self.path, self.max_retries)
    }
}

/// Sled-backed document store with optimistic read-modify-write transactions and
/// atomic batches.
pub struct LedgerStore {
    _db: sled::Db,
    docs: sled::Tree,
    max_retries: u32,
}

impl LedgerStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        Self::open_with_options(path, DEFAULT_MAX_RETRIES)
    }

    fn open_with_options<P: AsRef<Path>>(path: P, max_retries: u32) -> Result<Self, LedgerError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let docs = db.open_tree(TREE_DOCUMENTS)?;
        Ok(Self {
            _db: db,
            docs,
            max_retries: max_retries.max(1),
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `body` as an optimistic transaction.
    ///
    /// The body may run several times; it must not have effects outside the `LedgerTx`.
    /// An error from the body aborts immediately with nothing written.
    pub fn transaction<R, F>(&self, mut body: F) -> Result<R, LedgerError>
    where
        F: FnMut(&mut LedgerTx<'_>) -> Result<R, LedgerError>,
    {
        for attempt in 1..=self.max_retries {
            let mut tx = LedgerTx::new(&self.docs);
            let value = body(&mut tx)?;
            if self.commit(tx)? {
                metrics::inc_tx_committed();
                return Ok(value);
            }
            metrics::inc_tx_conflict_retries();
            debug!("ledger transaction conflict on attempt {}", attempt);
        }
        metrics::inc_tx_conflicts_exhausted();
        Err(LedgerError::TransientConflict {
            attempts: self.max_retries,
        })
    }

    fn commit(&self, tx: LedgerTx<'_>) -> Result<bool, LedgerError> {
        if !tx.has_writes() {
            return Ok(true);
        }
        let LedgerTx { reads, writes, .. } = tx;
        let result = self
            .docs
            .transaction(|t| -> ConflictableTransactionResult<(), ReadSetChanged> {
                for (key, expected) in &reads {
                    let current = t.get(key.as_slice())?;
                    if current != *expected {
                        return abort(ReadSetChanged);
                    }
                }
                for (key, value) in &writes {
                    match value {
                        Some(bytes) => {
                            t.insert(key.as_slice(), bytes.as_slice())?;
                        }
                        None => {
                            t.remove(key.as_slice())?;
                        }
                    }
                }
                Ok(())
            });
        match result {
            Ok(()) => {
                self.docs.flush()?;
                Ok(true)
            }
            Err(TransactionError::Abort(ReadSetChanged)) => Ok(false),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    /// Apply many writes atomically without read validation.
    pub fn batch_write(&self, ops: Vec<BatchOp>) -> Result<usize, LedgerError> {
        let count = ops.len();
        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => batch.insert(key.as_bytes(), value),
                BatchOp::Delete { key } => batch.remove(key.as_bytes()),
            }
        }
        self.docs.apply_batch(batch)?;
        self.docs.flush()?;
        metrics::inc_batches_applied();
        Ok(count)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, LedgerError> {
        match self.docs.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), LedgerError> {
        self.docs.insert(key.as_bytes(), serialize(value)?)?;
        self.docs.flush()?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<bool, LedgerError> {
        let removed = self.docs.remove(key.as_bytes())?.is_some();
        self.docs.flush()?;
        Ok(removed)
    }

    pub fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>, LedgerError> {
        let mut out = Vec::new();
        for entry in self.docs.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry?;
            out.push((String::from_utf8_lossy(&key).into_owned(), deserialize(&value)?));
        }
        Ok(out)
    }

    pub fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, LedgerError> {
        let mut out = Vec::new();
        for entry in self.docs.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            out.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(out)
    }

    /// Fetch a student's score ledger by id.
    pub fn get_score(&self, student_id: &str) -> Result<ScoreRecord, LedgerError> {
        let record: ScoreRecord = self
            .get(&keys::ledger(student_id))?
            .ok_or_else(|| LedgerError::NotFound(format!("score ledger: {}", student_id)))?;
        check_schema("score", SCORE_SCHEMA_VERSION, record.schema_version)?;
        Ok(record)
    }

    pub fn get_student(&self, student_id: &str) -> Result<StudentRecord, LedgerError> {
        let record: StudentRecord = self
            .get(&keys::student(student_id))?
            .ok_or_else(|| LedgerError::NotFound(format!("student: {}", student_id)))?;
        check_schema("student", STUDENT_SCHEMA_VERSION, record.schema_version)?;
        Ok(record)
    }

    pub fn get_class(&self, class_id: &str) -> Result<ClassRecord, LedgerError> {
        let record: ClassRecord = self
            .get(&keys::class(class_id))?
            .ok_or_else(|| LedgerError::NotFound(format!("class: {}", class_id)))?;
        check_schema("class", CLASS_SCHEMA_VERSION, record.schema_version)?;
        Ok(record)
    }

    pub fn put_class(&self, class: &ClassRecord) -> Result<(), LedgerError> {
        self.put(&keys::class(&class.id), class)
    }

    /// Students enrolled in `class_id`.
    pub fn list_class_students(&self, class_id: &str) -> Result<Vec<StudentRecord>, LedgerError> {
        Ok(self
            .scan::<StudentRecord>(keys::STUDENT_PREFIX)?
            .into_iter()
            .map(|(_, student)| student)
            .filter(|student| student.class_id == class_id)
            .collect())
    }

    pub fn list_student_ids(&self) -> Result<Vec<String>, LedgerError> {
        Ok(self
            .scan_keys(keys::STUDENT_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(keys::STUDENT_PREFIX).map(str::to_string))
            .collect())
    }

    /// Stars already recorded for a student today across all awarding teachers.
    pub fn stars_on(&self, student_id: &str, date: NaiveDate) -> Result<i64, LedgerError> {
        Ok(self
            .scan::<crate::ledger::types::DailyRecord>(&keys::daily_day_prefix(student_id, date))?
            .into_iter()
            .map(|(_, record)| record.stars)
            .sum())
    }
}
