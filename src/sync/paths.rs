use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SyncPaths {
    pub fanout_home: PathBuf,
    pub tables_dir: PathBuf,
    pub queues_dir: PathBuf,
    pub logs_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<SyncPaths> {
    let fanout_home = match env::var("FANOUT_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".archive-fanout"),
    };

    let tables_dir = env_or_default_path("FANOUT_TABLES_DIR", fanout_home.join("tables"));
    let queues_dir = env_or_default_path("FANOUT_QUEUES_DIR", fanout_home.join("queues"));
    let logs_dir = env_or_default_path("FANOUT_LOGS_DIR", fanout_home.join("logs"));

    Ok(SyncPaths {
        fanout_home,
        tables_dir,
        queues_dir,
        logs_dir,
    })
}

#[cfg(test)]
impl SyncPaths {
    pub fn rooted_at(home: impl Into<PathBuf>) -> Self {
        let fanout_home = home.into();
        Self {
            tables_dir: fanout_home.join("tables"),
            queues_dir: fanout_home.join("queues"),
            logs_dir: fanout_home.join("logs"),
            fanout_home,
        }
    }
}
