use crate::sync::model::ArchiveRecord;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Remote archive ids with no ledger entry, in remote order.
    pub missing: Vec<String>,
    /// Known records still inside their re-fetch window, in ledger order.
    pub pending: Vec<ArchiveRecord>,
}

impl Reconciliation {
    pub fn expected_command_count(&self) -> usize {
        self.missing.len() + self.pending.len()
    }
}

pub fn reconcile(remote: &[String], ledger: &[ArchiveRecord]) -> Reconciliation {
    Reconciliation {
        missing: resolve_missing_archives(remote, ledger),
        pending: resolve_pending_archives(ledger),
    }
}

pub fn resolve_missing_archives(remote: &[String], ledger: &[ArchiveRecord]) -> Vec<String> {
    let known = ledger
        .iter()
        .map(|record| record.archive_id.as_str())
        .collect::<BTreeSet<_>>();

    let mut seen = BTreeSet::new();
    let mut missing = Vec::new();
    for id in remote {
        if known.contains(id.as_str()) || !seen.insert(id.as_str()) {
            continue;
        }
        missing.push(id.clone());
    }
    missing
}

pub fn resolve_pending_archives(ledger: &[ArchiveRecord]) -> Vec<ArchiveRecord> {
    ledger
        .iter()
        .filter(|record| is_eligible(record))
        .cloned()
        .collect()
}

/// First instant (UTC) of the month after `(year, month)`.
pub fn period_cutoff(year: i32, month: u32) -> Option<DateTime<Utc>> {
    let (next_year, next_month) = if month == 12 {
        (year.checked_add(1)?, 1)
    } else {
        (year, month.checked_add(1)?)
    };
    let first = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&first))
}

/// A record stays eligible until it has been fetched after its period closed.
/// Records whose period cannot be resolved are treated as eligible.
pub fn is_eligible(record: &ArchiveRecord) -> bool {
    let Some(downloaded_at) = record.downloaded_at else {
        return true;
    };
    match period_cutoff(record.year, record.month) {
        Some(cutoff) => downloaded_at < cutoff,
        None => true,
    }
}

/// Parse the trailing `YYYY/MM` segments of an archive identifier.
pub fn parse_archive_period(archive_id: &str) -> Option<(i32, u32)> {
    let mut segments = archive_id.trim_end_matches('/').rsplit('/');
    let month = segments.next()?.parse::<u32>().ok()?;
    let year = segments.next()?.parse::<i32>().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year, month))
}
