use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a record's bytes live. Payloads are read on demand, never mutated.
#[derive(Debug, Clone)]
pub enum SourceFile {
    /// A regular file on disk
    Path(PathBuf),
    /// An entry inside a zip archive (for by_index access)
    ZipEntry { archive: PathBuf, index: usize },
    /// Bytes already held in memory
    Memory(Arc<[u8]>),
}

impl SourceFile {
    pub fn read(&self) -> io::Result<Vec<u8>> {
        match self {
            SourceFile::Path(path) => std::fs::read(path),
            SourceFile::ZipEntry { archive, index } => {
                let file = File::open(archive)?;
                let mut archive = zip::ZipArchive::new(file).map_err(io::Error::other)?;
                let mut entry = archive.by_index(*index).map_err(io::Error::other)?;
                let mut bytes = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
            SourceFile::Memory(bytes) => Ok(bytes.to_vec()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Loading,
    Done,
    Error,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileStatus::Pending => "pending",
            FileStatus::Loading => "loading",
            FileStatus::Done => "done",
            FileStatus::Error => "error",
        })
    }
}

/// One selected file, kept in selection order for the whole session.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub source: SourceFile,
    pub original_name: String,
    /// Everything from the last dot on (".jpg"), or empty
    pub extension: String,
    pub mime_type: String,
    pub modified: Option<DateTime<Utc>>,
    pub new_name: String,
    pub status: FileStatus,
    pub description: String,
    pub error_message: Option<String>,
}

impl FileRecord {
    pub fn new(index: usize, name: String, modified: Option<DateTime<Utc>>, source: SourceFile) -> Self {
        let extension = split_extension(&name).1.to_string();
        let mime_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let stamp = modified.map_or(0, |m| m.timestamp());
        Self {
            id: format!("{}-{}-{}", name, stamp, index),
            source,
            new_name: name.clone(),
            original_name: name,
            extension,
            mime_type,
            modified,
            status: FileStatus::Pending,
            description: String::new(),
            error_message: None,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Original name without its extension.
    pub fn stem(&self) -> &str {
        split_extension(&self.original_name).0
    }

    /// Start of a rename cycle: clears the previous cycle's outcome.
    pub fn begin(&mut self) {
        self.status = FileStatus::Loading;
        self.error_message = None;
        self.description.clear();
    }

    pub fn complete(&mut self, new_name: String, description: String) {
        self.new_name = new_name;
        self.description = description;
        self.error_message = None;
        self.status = FileStatus::Done;
    }

    /// Mark as failed. `new_name` keeps whatever it held before the cycle.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.status = FileStatus::Error;
    }
}

/// Split a file name into (stem, extension). The extension keeps its dot and is
/// empty when there is no dot or the only dot leads the name (".bashrc").
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(dot) => name.split_at(dot),
    }
}
