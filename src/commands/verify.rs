use anyhow::Result;

use crate::commands::CommandReport;
use crate::commands::status;
use crate::error::SyncError;
use crate::sync::config::{self, SyncConfig};
use crate::sync::paths::SyncPaths;
use crate::sync::validator::CommandBoardValidator;

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub strict: bool,
}

pub fn run(
    paths: &SyncPaths,
    cfg: Result<&SyncConfig, &anyhow::Error>,
    opts: &VerifyOptions,
) -> Result<CommandReport> {
    let mut report = CommandReport::new("verify");

    let cfg = match cfg {
        Ok(cfg) => {
            report.detail("config: ok");
            cfg
        }
        Err(err) => {
            match err.downcast_ref::<SyncError>() {
                Some(sync_err) => report.issue(format!("config: {sync_err}")),
                None => report.issue(format!("config: {err:#}")),
            }
            return Ok(report);
        }
    };

    for key in config::unknown_env_keys() {
        report.issue(format!("unknown environment variable {key}"));
    }

    match CommandBoardValidator::resolve(cfg.validator.board_validator_bin.as_deref()) {
        Ok(_) => report.detail("board validator: ok"),
        Err(err) if opts.strict => report.issue(format!("board validator: {err:#}")),
        Err(err) => report.detail(format!("board validator unavailable: {err:#}")),
    }

    report.merge(status::run(paths, cfg)?);

    if opts.strict && !report.ok {
        report.issue("strict verify failed");
    }

    Ok(report)
}
