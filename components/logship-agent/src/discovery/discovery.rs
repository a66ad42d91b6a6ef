// Local crates
use crate::metrics::metrics::DISCOVERY_ERRORS_TOTAL;

// External crates
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

/// Login-accounting databases. Binary, never tailed.
pub const EXCLUDED_FILE_NAMES: &[&str] = &["wtmp", "btmp", "utmp", "wtmpx", "btmpx", "utmpx"];

lazy_static! {
    /// Dated rotation suffix such as `cron-20150928` or `messages-2024-01-31`.
    static ref DATED_SUFFIX: Regex = Regex::new(r"-20\d{2}").unwrap();
}

/// A configured root. Directories are recursed, files are tailed as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    pub path: PathBuf,
    pub is_dir: bool,
}

impl LogSource {
    pub fn resolve(path: &Path) -> Self {
        Self {
            path: absolute(path),
            is_dir: path.is_dir(),
        }
    }
}

/// Enumerate candidate log files below `root`, depth first, in file name order.
///
/// Unreadable directories and entries are logged and skipped so one bad
/// subtree never hides its siblings.
#[instrument(name = "pipeline::discovery::scan", skip_all, fields(root = %root.display()), level = "debug")]
pub fn scan(root: &Path) -> Vec<PathBuf> {
    let source = LogSource::resolve(root);
    let mut files = Vec::new();

    if !source.is_dir {
        match std::fs::metadata(&source.path) {
            Ok(meta) if meta.is_file() => {
                if !is_excluded(&source.path) {
                    files.push(source.path);
                }
            }
            Ok(_) => debug!(path = %source.path.display(), "Log source is neither file nor directory, skipping"),
            Err(e) => {
                DISCOVERY_ERRORS_TOTAL.inc();
                warn!(error = %e, path = %source.path.display(), "Failed to open log source");
            }
        }
        return files;
    }

    for entry in build_walker(&source.path) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                DISCOVERY_ERRORS_TOTAL.inc();
                warn!(
                    error = %e,
                    path = ?e.path().map(Path::display),
                    "Failed to read directory entry, skipping"
                );
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.into_path();
        if valid_file_format(&path) {
            files.push(path);
        }
    }

    debug!(files = files.len(), "Directory scan complete");
    files
}

/// Scan every configured root in order, dropping paths already found under an
/// earlier root.
pub fn scan_all<P: AsRef<Path>>(roots: &[P]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for root in roots {
        for path in scan(root.as_ref()) {
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    files
}

fn build_walker(root: &Path) -> walkdir::IntoIter {
    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
}

/// `*.log` files, or extension-less files that do not carry a dated rotation
/// suffix, minus the login-accounting databases.
pub fn valid_file_format(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
        return false;
    };

    if is_excluded(path) {
        return false;
    }

    let is_log = file_name.to_lowercase().ends_with(".log");
    let is_plain = !file_name.contains('.') && !DATED_SUFFIX.is_match(file_name);

    is_log || is_plain
}

fn is_excluded(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|name| EXCLUDED_FILE_NAMES.contains(&name))
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path, bytes: usize) {
        fs::write(path, vec![b'x'; bytes]).unwrap();
    }

    #[test]
    fn scan_keeps_logs_and_plain_files_and_skips_accounting() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.log"), 100);
        touch(&dir.path().join("cronjob"), 10);
        touch(&dir.path().join("wtmp"), 10);

        let found = scan(dir.path());
        assert_eq!(
            found,
            vec![dir.path().join("a.log"), dir.path().join("cronjob")]
        );
    }

    #[test]
    fn dated_and_dotted_names_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("cron-20150928"), 1);
        touch(&dir.path().join("syslog.1"), 1);
        touch(&dir.path().join("syslog.2.gz"), 1);
        touch(&dir.path().join("APP.LOG"), 1);
        touch(&dir.path().join("syslog"), 1);

        let found = scan(dir.path());
        assert_eq!(
            found,
            vec![dir.path().join("APP.LOG"), dir.path().join("syslog")]
        );
    }

    #[test]
    fn recurses_depth_first() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        touch(&dir.path().join("a.log"), 1);
        touch(&dir.path().join("b/nested/deep.log"), 1);
        touch(&dir.path().join("b/z.log"), 1);
        touch(&dir.path().join("c.log"), 1);

        let found = scan(dir.path());
        assert_eq!(
            found,
            vec![
                dir.path().join("a.log"),
                dir.path().join("b/nested/deep.log"),
                dir.path().join("b/z.log"),
                dir.path().join("c.log"),
            ]
        );
    }

    #[test]
    fn concrete_file_root_is_included_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.out.1");
        touch(&file, 1);

        assert_eq!(scan(&file), vec![file]);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan(&dir.path().join("gone")).is_empty());
    }

    #[test]
    fn scan_all_deduplicates_overlapping_roots() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub/x.log"), 1);
        touch(&dir.path().join("y.log"), 1);

        let found = scan_all(&[dir.path().join("sub"), dir.path().to_path_buf()]);
        assert_eq!(
            found,
            vec![dir.path().join("sub/x.log"), dir.path().join("y.log")]
        );
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subdirectory_does_not_hide_siblings() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        touch(&locked.join("hidden.log"), 1);
        touch(&dir.path().join("visible.log"), 1);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let found = scan(dir.path());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(found.contains(&dir.path().join("visible.log")));
    }
}
