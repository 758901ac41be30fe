use crate::errors::DeckError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Deletes the oldest `.jsonl` run logs in `dir` until the directory's run
/// logs fit in `budget_bytes`. The active log is never removed.
pub fn prune_run_logs(
    dir: &Path,
    active: &Path,
    budget_bytes: u64,
) -> Result<Vec<PathBuf>, DeckError> {
    let mut logs = fs::read_dir(dir)
        .map_err(|e| DeckError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl"))
        .filter_map(|path| {
            let meta = fs::metadata(&path).ok()?;
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((path, modified, meta.len()))
        })
        .collect::<Vec<_>>();
    logs.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let mut total = logs.iter().map(|(_, _, len)| len).sum::<u64>();
    let mut deleted = Vec::new();
    for (path, _, len) in logs {
        if total <= budget_bytes {
            break;
        }
        if path == active {
            continue;
        }
        fs::remove_file(&path).map_err(|e| DeckError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }
    Ok(deleted)
}
