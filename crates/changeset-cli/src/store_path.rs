use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".changeset";
pub const DB_FILE: &str = "ledger.redb";

/// Resolve the ledger database file.
///
/// Priority:
/// 1. `--db` flag / `CHANGESET_DB` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.changeset/`
/// 3. Fall back to `cwd/.changeset/ledger.redb`
pub fn resolve_db(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_state_dir(&cwd)
        .unwrap_or_else(|| cwd.join(STATE_DIR))
        .join(DB_FILE)
}

fn find_state_dir(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(STATE_DIR);
        if candidate.is_dir() {
            return Some(candidate);
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => return None,
        }
    }
}
