use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use encoding_rs::SHIFT_JIS;
use thiserror::Error;
use tracing::debug;

use crate::record::{FileRecord, SourceFile};

/// Largest selection accepted in one go.
pub const MAX_FILES: usize = 2000;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("You can upload a maximum of {max} files ({count} selected).")]
    TooManyFiles { count: usize, max: usize },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open archive {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

struct Candidate {
    name: String,
    modified: Option<DateTime<Utc>>,
    source: SourceFile,
}

/// Entry names are UTF-8 in most archives, but zips made by Japanese
/// Windows tools store raw Shift_JIS. Anything else decodes lossily.
fn decode_entry_name(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(name) => name.to_owned(),
        Err(_) => SHIFT_JIS
            .decode_without_bom_handling_and_without_replacement(raw)
            .map_or_else(|| String::from_utf8_lossy(raw).into_owned(), |name| name.into_owned()),
    }
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let secs = modified.duration_since(UNIX_EPOCH).ok()?.as_secs();
    DateTime::from_timestamp(secs as i64, 0)
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> SelectionError + '_ {
    move |source| SelectionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn scan_directory(dir: &Path, out: &mut Vec<Candidate>) -> Result<(), SelectionError> {
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        files.push((name, path));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, path) in files {
        out.push(Candidate {
            name,
            modified: modified_time(&path),
            source: SourceFile::Path(path),
        });
    }
    Ok(())
}

fn scan_zip(path: &Path, out: &mut Vec<Candidate>) -> Result<(), SelectionError> {
    let zip_err = |source| SelectionError::Zip {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err(path))?;
    let mut archive = zip::ZipArchive::new(file).map_err(zip_err)?;
    let modified = modified_time(path);

    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(zip_err)?;
        if entry.is_dir() {
            continue;
        }
        let entry_path = decode_entry_name(entry.name_raw());
        let name = entry_path.rsplit('/').next().unwrap_or("").to_string();
        if name.is_empty() {
            continue;
        }
        out.push(Candidate {
            name,
            modified,
            source: SourceFile::ZipEntry {
                archive: path.to_path_buf(),
                index: i,
            },
        });
    }
    Ok(())
}

/// Build records for the given inputs, in order.
///
/// Regular files become one record each, directories contribute their direct
/// children sorted by name, and `.zip` archives contribute every file entry.
/// A selection larger than `max_files` is rejected as a whole.
pub fn select_files(paths: &[PathBuf], max_files: usize) -> Result<Vec<FileRecord>, SelectionError> {
    let mut candidates: Vec<Candidate> = Vec::new();
    for path in paths {
        if path.is_dir() {
            scan_directory(path, &mut candidates)?;
        } else if is_zip(path) {
            scan_zip(path, &mut candidates)?;
        } else {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| SelectionError::Io {
                    path: path.clone(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, "not a file name"),
                })?;
            fs::metadata(path).map_err(io_err(path))?;
            candidates.push(Candidate {
                name,
                modified: modified_time(path),
                source: SourceFile::Path(path.clone()),
            });
        }
    }

    if candidates.len() > max_files {
        return Err(SelectionError::TooManyFiles {
            count: candidates.len(),
            max: max_files,
        });
    }

    debug!(files = candidates.len(), "Selection accepted");
    Ok(candidates
        .into_iter()
        .enumerate()
        .map(|(i, c)| FileRecord::new(i, c.name, c.modified, c.source))
        .collect())
}
