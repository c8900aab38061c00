use crate::sync::util::now_epoch_secs;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: String,
    pub deduplication_id: String,
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub message_id: String,
    /// The deduplication id was already seen inside the window; nothing new was enqueued.
    pub duplicate: bool,
}

/// FIFO queue with per-group ordering and deduplication.
pub trait CommandQueue {
    fn publish(&self, message: &OutboundMessage) -> Result<PublishReceipt>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub message_id: String,
    pub group_id: String,
    pub deduplication_id: String,
    pub body: String,
    pub sent_at_epoch_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DedupEntry {
    message_id: String,
    seen_at_epoch_secs: u64,
}

/// Queue backed by `messages.jsonl` plus a `dedup.json` index in its own directory.
pub struct FileQueue {
    dir: PathBuf,
    dedup_window_secs: u64,
}

impl FileQueue {
    pub fn open(queues_dir: &Path, name: &str, dedup_window_secs: u64) -> Self {
        Self {
            dir: queues_dir.join(name),
            dedup_window_secs,
        }
    }

    fn messages_path(&self) -> PathBuf {
        self.dir.join("messages.jsonl")
    }

    fn dedup_path(&self) -> PathBuf {
        self.dir.join("dedup.json")
    }

    /// The on-disk index is a cache. A missing or torn `dedup.json` reads as
    /// empty and is rebuilt from the message log.
    fn load_dedup(&self) -> BTreeMap<String, DedupEntry> {
        let path = self.dedup_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "dedup index unreadable, rebuilding");
                return BTreeMap::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(index) => index,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "dedup index corrupt, rebuilding");
                BTreeMap::new()
            }
        }
    }

    /// Dedup entries for every logged message still inside the window at `now`.
    /// Later lines win, so a re-sent id maps to its newest message.
    fn index_from_log(&self, now: u64) -> Result<BTreeMap<String, DedupEntry>> {
        let mut index = BTreeMap::new();
        for queued in self.read_messages()? {
            if now.saturating_sub(queued.sent_at_epoch_secs) < self.dedup_window_secs {
                index.insert(
                    queued.deduplication_id,
                    DedupEntry {
                        message_id: queued.message_id,
                        seen_at_epoch_secs: queued.sent_at_epoch_secs,
                    },
                );
            }
        }
        Ok(index)
    }

    fn save_dedup(&self, index: &BTreeMap<String, DedupEntry>) -> Result<()> {
        let path = self.dedup_path();
        let data = serde_json::to_string_pretty(index)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("failed to stage write in {}", self.dir.display()))?;
        tmp.write_all(format!("{data}\n").as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Messages in append order. A line torn by an interrupted append is skipped.
    pub fn read_messages(&self) -> Result<Vec<QueuedMessage>> {
        let path = self.messages_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let mut out = Vec::new();
        for (number, line) in raw.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<QueuedMessage>(trimmed) {
                Ok(entry) => out.push(entry),
                Err(err) => warn!(
                    path = %path.display(),
                    line = number + 1,
                    error = %err,
                    "skipping unreadable queue line"
                ),
            }
        }
        Ok(out)
    }

    fn append_message(&self, queued: &QueuedMessage) -> Result<()> {
        let path = self.messages_path();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        // Start on a fresh line if a previous append was cut short.
        let mut line = String::new();
        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                line.push('\n');
            }
        }
        line.push_str(&serde_json::to_string(queued)?);
        line.push('\n');
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", path.display()))?;
        file.sync_data()
            .with_context(|| format!("failed to sync {}", path.display()))?;
        Ok(())
    }

    fn publish_at(&self, message: &OutboundMessage, now: u64) -> Result<PublishReceipt> {
        if message.deduplication_id.trim().is_empty() {
            anyhow::bail!("deduplication id cannot be empty");
        }
        if message.group_id.trim().is_empty() {
            anyhow::bail!("group id cannot be empty");
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let lock_path = self.dir.join("queue.lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open {}", lock_path.display()))?;
        lock.lock_exclusive()
            .with_context(|| format!("failed to lock {}", lock_path.display()))?;

        let result = self.publish_locked(message, now);
        let _ = lock.unlock();
        result
    }

    fn publish_locked(&self, message: &OutboundMessage, now: u64) -> Result<PublishReceipt> {
        let window = self.dedup_window_secs;
        let mut index = self.load_dedup();
        index.extend(self.index_from_log(now)?);
        index.retain(|_, entry| now.saturating_sub(entry.seen_at_epoch_secs) < window);

        if let Some(entry) = index.get(&message.deduplication_id) {
            return Ok(PublishReceipt {
                message_id: entry.message_id.clone(),
                duplicate: true,
            });
        }

        let queued = QueuedMessage {
            message_id: Uuid::new_v4().to_string(),
            group_id: message.group_id.clone(),
            deduplication_id: message.deduplication_id.clone(),
            body: message.body.clone(),
            sent_at_epoch_secs: now,
        };
        self.append_message(&queued)?;

        index.insert(
            message.deduplication_id.clone(),
            DedupEntry {
                message_id: queued.message_id.clone(),
                seen_at_epoch_secs: now,
            },
        );
        // The message is enqueued at this point; the log rebuilds a lost index.
        if let Err(err) = self.save_dedup(&index) {
            warn!(error = %format!("{err:#}"), "failed to save dedup index");
        }

        Ok(PublishReceipt {
            message_id: queued.message_id,
            duplicate: false,
        })
    }
}

impl CommandQueue for FileQueue {
    fn publish(&self, message: &OutboundMessage) -> Result<PublishReceipt> {
        self.publish_at(message, now_epoch_secs()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn message(dedup: &str, group: &str) -> OutboundMessage {
        OutboundMessage {
            body: format!("{{\"archiveId\":\"{dedup}\"}}"),
            deduplication_id: dedup.to_string(),
            group_id: group.to_string(),
        }
    }

    #[test]
    fn duplicate_inside_window_is_absorbed() {
        let tmp = tempdir().expect("tempdir");
        let queue = FileQueue::open(tmp.path(), "download-games", 300);

        let first = queue.publish_at(&message("a", "u-1"), 1_000).expect("publish");
        let second = queue.publish_at(&message("a", "u-1"), 1_299).expect("publish");
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.message_id, second.message_id);
        assert_eq!(queue.read_messages().expect("read").len(), 1);
    }

    #[test]
    fn duplicate_after_window_is_enqueued_again() {
        let tmp = tempdir().expect("tempdir");
        let queue = FileQueue::open(tmp.path(), "download-games", 300);

        queue.publish_at(&message("a", "u-1"), 1_000).expect("publish");
        let later = queue.publish_at(&message("a", "u-1"), 1_300).expect("publish");
        assert!(!later.duplicate);
        assert_eq!(queue.read_messages().expect("read").len(), 2);
    }

    #[test]
    fn messages_keep_emission_order_within_group() {
        let tmp = tempdir().expect("tempdir");
        let queue = FileQueue::open(tmp.path(), "download-games", 300);
        for id in ["c", "a", "b"] {
            queue.publish_at(&message(id, "u-1"), 10).expect("publish");
        }
        queue.publish_at(&message("z", "u-2"), 10).expect("publish");

        let order = queue
            .read_messages()
            .expect("read")
            .into_iter()
            .filter(|m| m.group_id == "u-1")
            .map(|m| m.deduplication_id)
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn empty_ids_are_rejected() {
        let tmp = tempdir().expect("tempdir");
        let queue = FileQueue::open(tmp.path(), "download-games", 300);
        assert!(queue.publish_at(&message("", "u-1"), 10).is_err());
        assert!(queue.publish_at(&message("a", " "), 10).is_err());
    }

    #[test]
    fn torn_dedup_index_is_rebuilt_from_the_log() {
        let tmp = tempdir().expect("tempdir");
        let queue = FileQueue::open(tmp.path(), "download-games", 300);
        let first = queue.publish_at(&message("a", "u-1"), 1_000).expect("publish");

        let index_path = queue.dedup_path();
        let raw = fs::read_to_string(&index_path).expect("read index");
        fs::write(&index_path, &raw[..raw.len() / 2]).expect("truncate index");

        let next = queue.publish_at(&message("b", "u-1"), 1_001).expect("publish after tear");
        assert!(!next.duplicate);
        let again = queue.publish_at(&message("a", "u-1"), 1_002).expect("republish");
        assert!(again.duplicate);
        assert_eq!(again.message_id, first.message_id);
        assert_eq!(queue.read_messages().expect("read").len(), 2);
    }

    #[test]
    fn lost_index_still_absorbs_logged_messages() {
        let tmp = tempdir().expect("tempdir");
        let queue = FileQueue::open(tmp.path(), "download-games", 300);
        queue.publish_at(&message("a", "u-1"), 1_000).expect("publish");
        fs::remove_file(queue.dedup_path()).expect("drop index");

        let again = queue.publish_at(&message("a", "u-1"), 1_100).expect("republish");
        assert!(again.duplicate);
        assert_eq!(queue.read_messages().expect("read").len(), 1);

        let expired = queue.publish_at(&message("a", "u-1"), 1_300).expect("after window");
        assert!(!expired.duplicate);
    }

    #[test]
    fn torn_trailing_line_does_not_swallow_the_next_message() {
        let tmp = tempdir().expect("tempdir");
        let queue = FileQueue::open(tmp.path(), "download-games", 300);
        queue.publish_at(&message("a", "u-1"), 10).expect("publish");
        OpenOptions::new()
            .append(true)
            .open(queue.messages_path())
            .expect("open log")
            .write_all(b"{\"message_id\":\"cut")
            .expect("tear");

        queue.publish_at(&message("b", "u-1"), 11).expect("publish after tear");
        let ids = queue
            .read_messages()
            .expect("read")
            .into_iter()
            .map(|m| m.deduplication_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
