use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use std::{env, fs};

/// Every `.rs` file below `dir`, depth first.
fn sources(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .flat_map(|path| {
            if path.is_dir() {
                sources(&path)
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                vec![path]
            } else {
                Vec::new()
            }
        })
        .collect()
}

/// Whole `FANOUT_*` identifiers; `GENERATED_FANOUT_X` does not count.
fn fanout_keys(source: &str) -> impl Iterator<Item = &str> {
    source
        .split(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
        .filter(|token| token.len() > "FANOUT_".len() && token.starts_with("FANOUT_"))
}

fn main() {
    let keys = sources(Path::new("src"))
        .iter()
        .filter_map(|file| fs::read_to_string(file).ok())
        .flat_map(|source| fanout_keys(&source).map(str::to_owned).collect::<Vec<_>>())
        .collect::<BTreeSet<_>>();

    let entries = keys
        .iter()
        .map(|key| format!("    {key:?},\n"))
        .collect::<String>();
    let generated = format!("pub const GENERATED_FANOUT_ENV_ALLOWLIST: &[&str] = &[\n{entries}];\n");
    let out_dir = env::var_os("OUT_DIR").expect("cargo sets OUT_DIR");
    fs::write(Path::new(&out_dir).join("fanout_env_allowlist.rs"), generated)
        .expect("write env allowlist");

    let built_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    println!("cargo:rustc-env=BUILD_UUID={built_at:x}-{}", env!("CARGO_PKG_VERSION"));
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
}
