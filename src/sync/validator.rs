use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

const DEFAULT_VALIDATOR_BIN: &str = "chess-board-validator";

/// Opaque predicate deciding whether a search board is well formed.
pub trait BoardValidator {
    fn is_valid(&self, board: &str) -> Result<bool>;
}

/// Delegates to an external program: exit 0 accepts the board, exit 1 rejects
/// it, anything else is an error.
pub struct CommandBoardValidator {
    bin: PathBuf,
}

fn resolve_validator_bin(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = configured {
        let path = Path::new(path);
        if !path.is_file() {
            anyhow::bail!("board validator binary does not exist: {}", path.display());
        }
        return Ok(path.to_path_buf());
    }
    which::which(DEFAULT_VALIDATOR_BIN)
        .context("board validator not found in FANOUT_BOARD_VALIDATOR_BIN or PATH")
}

impl CommandBoardValidator {
    pub fn resolve(configured: Option<&str>) -> Result<Self> {
        Ok(Self {
            bin: resolve_validator_bin(configured)?,
        })
    }
}

impl BoardValidator for CommandBoardValidator {
    fn is_valid(&self, board: &str) -> Result<bool> {
        let output = Command::new(&self.bin)
            .arg(board)
            .output()
            .with_context(|| format!("failed to run `{}`", self.bin.display()))?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => anyhow::bail!(
                "board validator failed with {}\nstderr: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ),
        }
    }
}
