use glob::Pattern;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, trace};
use walkdir::WalkDir;

/// Lists files under `root` whose extension matches `extension`
/// (case-insensitive, leading dot optional), skipping anything matching an
/// ignore glob. Only the top level is visited unless `recursive` is set.
/// Results are sorted so enumeration order is stable across runs.
pub fn candidate_files(
    root: &Path,
    extension: &str,
    recursive: bool,
    ignore_globs: &[String],
) -> io::Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Scan directory {} does not exist", root.display()),
        ));
    }

    let extension = extension.trim_start_matches('.');
    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    let mut walker = WalkDir::new(root).min_depth(1).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    let entries = walker.into_iter().filter_entry(|entry| {
        !ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(entry.path()))
    });
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.io_error().map(|e| e.kind()) == Some(io::ErrorKind::PermissionDenied) {
                    error!("Access denied while scanning: {}", err);
                    continue;
                }
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("Error reading {}: {}", root.display(), err),
                ));
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        let matches_extension = entry
            .path()
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if matches_extension {
            trace!("Candidate {}", entry.path().display());
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}
