use anyhow::Result;

use crate::commands::CommandReport;
use crate::sync::paths::SyncPaths;
use crate::sync::reconcile::is_eligible;
use crate::sync::store::{ArchiveLedger, FileArchiveLedger};

pub fn run(paths: &SyncPaths, user_id: &str) -> Result<CommandReport> {
    let mut report = CommandReport::new("ledger");
    let ledger = FileArchiveLedger::open(&paths.tables_dir);

    let mut records = ledger.query_by_user(user_id)?;
    records.sort_by(|a, b| (a.year, a.month).cmp(&(b.year, b.month)));

    report.detail(format!("user_id={user_id} archives={}", records.len()));
    for record in &records {
        let downloaded_at = record
            .downloaded_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        report.detail(format!(
            "{} period={:04}-{:02} games={} downloaded_at={} eligible={}",
            record.archive_id,
            record.year,
            record.month,
            record.downloaded_count,
            downloaded_at,
            is_eligible(record)
        ));
    }
    Ok(report)
}
