use anyhow::Result;

use crate::commands::CommandReport;
use crate::sync::audit;
use crate::sync::config::SyncConfig;
use crate::sync::paths::SyncPaths;
use crate::sync::queue::FileQueue;
use crate::sync::store::{FileArchiveLedger, FileSearchTable, FileSessionTable, FileUserTable};

const RECENT_AUDIT_EVENTS: usize = 5;

fn count_detail(report: &mut CommandReport, label: &str, count: Result<usize>) {
    match count {
        Ok(n) => report.detail(format!("{label}={n}")),
        Err(err) => report.issue(format!("{label} unreadable: {err:#}")),
    }
}

pub fn run(paths: &SyncPaths, cfg: &SyncConfig) -> Result<CommandReport> {
    let mut report = CommandReport::new("status");

    report.detail(format!("build_uuid={}", env!("BUILD_UUID")));
    report.detail(format!("fanout_home={}", paths.fanout_home.display()));
    report.detail(format!("tables_dir={}", paths.tables_dir.display()));
    report.detail(format!("queues_dir={}", paths.queues_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("catalog_url={}", cfg.catalog.base_url));
    report.detail(format!(
        "batch_size={} retry={} delay_ms={} max_delay_ms={} max_attempts={} max_elapsed_ms={}",
        cfg.store.batch_size,
        cfg.retry.backoff.label(),
        cfg.retry.retry_delay_ms,
        cfg.retry.retry_max_delay_ms,
        cfg.retry.max_attempts,
        cfg.retry.max_elapsed_ms
    ));

    count_detail(
        &mut report,
        "users",
        FileUserTable::open(&paths.tables_dir).count(),
    );
    count_detail(
        &mut report,
        "ledgers",
        FileArchiveLedger::open(&paths.tables_dir).user_count(),
    );
    count_detail(
        &mut report,
        "download_sessions",
        FileSessionTable::open(&paths.tables_dir).count(),
    );
    count_detail(
        &mut report,
        "searches",
        FileSearchTable::open(&paths.tables_dir).count(),
    );

    for name in [&cfg.queue.download_queue, &cfg.queue.search_queue] {
        let queue = FileQueue::open(&paths.queues_dir, name, cfg.queue.dedup_window_secs);
        count_detail(
            &mut report,
            &format!("queue[{name}]"),
            queue.read_messages().map(|messages| messages.len()),
        );
    }

    match audit::recent_events(paths, RECENT_AUDIT_EVENTS) {
        Ok(events) => {
            for event in events {
                report.detail(format!(
                    "audit: {} {} {} {}",
                    event.at_epoch_secs, event.phase, event.status, event.message
                ));
            }
        }
        Err(err) => report.issue(format!("audit log unreadable: {err:#}")),
    }

    Ok(report)
}
