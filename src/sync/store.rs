use crate::sync::config::MAX_BATCH_SIZE;
use crate::sync::model::{
    ArchiveRecord, DownloadSession, Platform, SearchRecord, UserRecord, user_table_key,
};
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub trait UserTable {
    fn get(&self, username: &str, platform: Platform) -> Result<Option<UserRecord>>;
    fn put(&self, record: &UserRecord) -> Result<()>;
}

/// Per-user archive ledger keyed by `(user_id, archive_id)`.
pub trait ArchiveLedger {
    fn query_by_user(&self, user_id: &str) -> Result<Vec<ArchiveRecord>>;

    /// Upsert up to 25 records. Items the store could not take on this call
    /// are handed back; an `Err` means nothing more can be assumed about the
    /// call and the caller must stop.
    fn batch_write(&self, items: &[ArchiveRecord]) -> Result<Vec<ArchiveRecord>>;
}

pub trait SessionTable {
    fn put(&self, session: &DownloadSession) -> Result<()>;
}

pub trait SearchTable {
    fn put(&self, record: &SearchRecord) -> Result<()>;
}

enum LockMode {
    Blocking,
    NonBlocking,
}

struct TableLock {
    file: File,
}

impl TableLock {
    /// `Ok(None)` when another writer holds the lock and `mode` is non-blocking.
    fn acquire(data_path: &Path, mode: LockMode) -> Result<Option<Self>> {
        let lock_path = data_path.with_extension("lock");
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open {}", lock_path.display()))?;
        match mode {
            LockMode::Blocking => {
                file.lock_exclusive()
                    .with_context(|| format!("failed to lock {}", lock_path.display()))?;
            }
            LockMode::NonBlocking => match file.try_lock_exclusive() {
                Ok(()) => {}
                Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    return Ok(None);
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to lock {}", lock_path.display()));
                }
            },
        }
        Ok(Some(Self { file }))
    }
}

impl Drop for TableLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// A JSON object on disk mapping string keys to records.
struct JsonTable<T> {
    path: PathBuf,
    _record: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> JsonTable<T> {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            _record: PhantomData,
        }
    }

    fn load(&self) -> Result<BTreeMap<String, T>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let parsed = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(parsed)
    }

    fn save(&self, map: &BTreeMap<String, T>) -> Result<()> {
        let parent = self
            .path
            .parent()
            .with_context(|| format!("table path has no parent: {}", self.path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;

        let data = serde_json::to_string_pretty(map)?;
        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to stage write in {}", parent.display()))?;
        tmp.write_all(format!("{data}\n").as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    fn upsert_all(&self, entries: Vec<(String, T)>, mode: LockMode) -> Result<bool> {
        let Some(_lock) = TableLock::acquire(&self.path, mode)? else {
            return Ok(false);
        };
        let mut map = self.load()?;
        for (key, value) in entries {
            map.insert(key, value);
        }
        self.save(&map)?;
        Ok(true)
    }

    fn upsert(&self, key: String, value: T) -> Result<()> {
        self.upsert_all(vec![(key, value)], LockMode::Blocking)?;
        Ok(())
    }
}

fn ledger_file_name(user_id: &str) -> String {
    let slug = user_id
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("user")
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '-' })
        .collect::<String>();
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{slug}-{}.json", &digest[..12])
}

pub struct FileUserTable {
    table: JsonTable<UserRecord>,
}

impl FileUserTable {
    pub fn open(tables_dir: &Path) -> Self {
        Self {
            table: JsonTable::new(tables_dir.join("users.json")),
        }
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.table.load()?.len())
    }
}

impl UserTable for FileUserTable {
    fn get(&self, username: &str, platform: Platform) -> Result<Option<UserRecord>> {
        let map = self.table.load()?;
        Ok(map.get(&user_table_key(username, platform)).cloned())
    }

    fn put(&self, record: &UserRecord) -> Result<()> {
        self.table.upsert(record.table_key(), record.clone())
    }
}

pub struct FileArchiveLedger {
    dir: PathBuf,
}

impl FileArchiveLedger {
    pub fn open(tables_dir: &Path) -> Self {
        Self {
            dir: tables_dir.join("archives"),
        }
    }

    fn table_for(&self, user_id: &str) -> JsonTable<ArchiveRecord> {
        JsonTable::new(self.dir.join(ledger_file_name(user_id)))
    }

    pub fn user_count(&self) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut count = 0usize;
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl ArchiveLedger for FileArchiveLedger {
    fn query_by_user(&self, user_id: &str) -> Result<Vec<ArchiveRecord>> {
        let map = self.table_for(user_id).load()?;
        Ok(map
            .into_values()
            .filter(|record| record.user_id == user_id)
            .collect())
    }

    fn batch_write(&self, items: &[ArchiveRecord]) -> Result<Vec<ArchiveRecord>> {
        if items.len() > MAX_BATCH_SIZE {
            anyhow::bail!(
                "batch write accepts at most {MAX_BATCH_SIZE} items, got {}",
                items.len()
            );
        }

        let mut by_user: BTreeMap<&str, Vec<&ArchiveRecord>> = BTreeMap::new();
        for item in items {
            by_user.entry(item.user_id.as_str()).or_default().push(item);
        }

        let mut unprocessed = Vec::new();
        for (user_id, records) in by_user {
            let entries = records
                .iter()
                .map(|record| (record.archive_id.clone(), (*record).clone()))
                .collect::<Vec<_>>();
            let written = self
                .table_for(user_id)
                .upsert_all(entries, LockMode::NonBlocking)?;
            if !written {
                unprocessed.extend(records.into_iter().cloned());
            }
        }
        Ok(unprocessed)
    }
}

pub struct FileSessionTable {
    table: JsonTable<DownloadSession>,
}

impl FileSessionTable {
    pub fn open(tables_dir: &Path) -> Self {
        Self {
            table: JsonTable::new(tables_dir.join("downloads.json")),
        }
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.table.load()?.len())
    }
}

impl SessionTable for FileSessionTable {
    fn put(&self, session: &DownloadSession) -> Result<()> {
        self.table.upsert(session.session_id.clone(), session.clone())
    }
}

pub struct FileSearchTable {
    table: JsonTable<SearchRecord>,
}

impl FileSearchTable {
    pub fn open(tables_dir: &Path) -> Self {
        Self {
            table: JsonTable::new(tables_dir.join("searches.json")),
        }
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.table.load()?.len())
    }
}

impl SearchTable for FileSearchTable {
    fn put(&self, record: &SearchRecord) -> Result<()> {
        self.table.upsert(record.search_id.clone(), record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn archive(user_id: &str, id: &str) -> ArchiveRecord {
        ArchiveRecord::fresh(user_id, id, 2024, 1)
    }

    #[test]
    fn persisting_same_archive_twice_leaves_one_entry() {
        let tmp = tempdir().expect("tempdir");
        let ledger = FileArchiveLedger::open(tmp.path());
        let record = archive("u-1", "https://x/games/2024/01");

        assert!(ledger.batch_write(&[record.clone()]).expect("write").is_empty());
        assert!(ledger.batch_write(&[record.clone()]).expect("write").is_empty());

        let stored = ledger.query_by_user("u-1").expect("query");
        assert_eq!(stored, vec![record]);
    }

    #[test]
    fn ledgers_are_isolated_per_user() {
        let tmp = tempdir().expect("tempdir");
        let ledger = FileArchiveLedger::open(tmp.path());
        ledger
            .batch_write(&[archive("u-1", "a"), archive("u-2", "b")])
            .expect("write");

        let first = ledger.query_by_user("u-1").expect("query");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].archive_id, "a");
        assert!(ledger.query_by_user("u-3").expect("query").is_empty());
        assert_eq!(ledger.user_count().expect("count"), 2);
    }

    #[test]
    fn batch_over_store_limit_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        let ledger = FileArchiveLedger::open(tmp.path());
        let items = (0..26)
            .map(|i| archive("u-1", &format!("2020/{i}")))
            .collect::<Vec<_>>();
        assert!(ledger.batch_write(&items).is_err());
    }

    #[test]
    fn contended_user_ledger_returns_items_unprocessed() {
        let tmp = tempdir().expect("tempdir");
        let ledger = FileArchiveLedger::open(tmp.path());
        let held = ledger.table_for("u-1");
        let _guard = TableLock::acquire(&held.path, LockMode::Blocking)
            .expect("lock")
            .expect("uncontended");

        let items = vec![archive("u-1", "a"), archive("u-2", "b")];
        let unprocessed = ledger.batch_write(&items).expect("write");
        assert_eq!(unprocessed, vec![archive("u-1", "a")]);
        assert_eq!(ledger.query_by_user("u-2").expect("query").len(), 1);
    }

    #[test]
    fn user_table_is_keyed_by_username_and_platform() {
        let tmp = tempdir().expect("tempdir");
        let users = FileUserTable::open(tmp.path());
        let record = UserRecord {
            username: "magnus".to_string(),
            platform: Platform::ChessDotCom,
            user_id: "https://api.chess.com/pub/player/magnus".to_string(),
        };
        users.put(&record).expect("put");
        users.put(&record).expect("put again");

        assert_eq!(
            users.get("magnus", Platform::ChessDotCom).expect("get"),
            Some(record)
        );
        assert_eq!(users.get("hikaru", Platform::ChessDotCom).expect("get"), None);
        assert_eq!(users.count().expect("count"), 1);
    }

    #[test]
    fn session_table_round_trips_sessions() {
        let tmp = tempdir().expect("tempdir");
        let sessions = FileSessionTable::open(tmp.path());
        sessions
            .put(&DownloadSession {
                session_id: "s-1".to_string(),
                expected_command_count: 4,
                created_at: Utc::now(),
            })
            .expect("put");
        assert_eq!(sessions.count().expect("count"), 1);
    }

    #[test]
    fn ledger_file_name_is_stable_and_filesystem_safe() {
        let a = ledger_file_name("https://api.chess.com/pub/player/Magnus");
        assert_eq!(a, ledger_file_name("https://api.chess.com/pub/player/Magnus"));
        assert!(a.starts_with("magnus-"));
        assert!(a.ends_with(".json"));
        assert_ne!(a, ledger_file_name("https://api.chess.com/pub/player/magnus"));
    }
}
