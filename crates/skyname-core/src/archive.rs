use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tempfile::NamedTempFile;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::record::{split_extension, FileRecord};
use crate::ThrottledProgress;

pub const DESCRIPTIONS_FILENAME: &str = "descriptions.txt";
pub const DEFAULT_ARCHIVE_NAME: &str = "renamed-files";
const NO_DESCRIPTION: &str = "No description generated.";

/// "<name>.zip", falling back to the default name when blank.
pub fn archive_file_name(name: &str) -> String {
    let name = name.trim();
    let name = if name.is_empty() { DEFAULT_ARCHIVE_NAME } else { name };
    format!("{}.zip", name)
}

/// Text manifest of image descriptions, or None when there are no images.
pub fn descriptions_manifest(records: &[FileRecord]) -> Option<String> {
    let mut images = records.iter().filter(|r| r.is_image()).peekable();
    images.peek()?;

    let mut content = String::from("File Descriptions\n=================\n\n");
    for r in images {
        let description = if r.description.is_empty() {
            NO_DESCRIPTION
        } else {
            r.description.as_str()
        };
        content.push_str(&format!("{}: {}\n", r.new_name, description));
    }
    Some(content)
}

/// Assign entry names, numbering repeats as `name(1).ext`, `name(2).ext`, ...
fn assign_entry_names(records: &[FileRecord], reserved: &[&str]) -> Vec<String> {
    // Counters per base name avoid rescanning numbers already handed out
    let mut name_counters: HashMap<&str, u32> = HashMap::new();
    let mut used: HashSet<String> = reserved.iter().map(|s| s.to_string()).collect();
    let mut assignments: Vec<String> = Vec::with_capacity(records.len());

    for r in records {
        let base = r.new_name.as_str();
        let counter = name_counters.entry(base).or_insert(0);
        if *counter == 0 && !used.contains(base) {
            used.insert(base.to_string());
            assignments.push(base.to_string());
            continue;
        }

        let (stem, ext) = split_extension(base);
        let name = loop {
            *counter += 1;
            let candidate = format!("{}({}){}", stem, counter, ext);
            if !used.contains(&candidate) {
                break candidate;
            }
        };
        used.insert(name.clone());
        assignments.push(name);
    }
    assignments
}

/// Write every record under its new name into `<output_dir>/<archive_name>.zip`,
/// plus the descriptions manifest when the selection holds images.
///
/// Records are only read; a failure here leaves the session as it was.
/// The zip is built in a temporary file next to the target and renamed into
/// place once finished, so a failed write never leaves a partial archive.
pub fn write_archive(
    records: &[FileRecord],
    output_dir: &Path,
    archive_name: &str,
    progress: &ThrottledProgress,
) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let archive_path = output_dir.join(archive_file_name(archive_name));

    let manifest = descriptions_manifest(records);
    let reserved: &[&str] = if manifest.is_some() { &[DESCRIPTIONS_FILENAME] } else { &[] };
    let entry_names = assign_entry_names(records, reserved);

    // Dropped (and deleted) on any early return below
    let staging = NamedTempFile::new_in(output_dir)
        .with_context(|| format!("failed to create a temporary file in {}", output_dir.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(staging));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let total = records.len() as u64;
    for (i, (r, entry_name)) in records.iter().zip(&entry_names).enumerate() {
        let bytes = r
            .source
            .read()
            .with_context(|| format!("failed to read {}", r.original_name))?;
        zip.start_file(entry_name.as_str(), options)?;
        zip.write_all(&bytes)?;
        progress.report("archive", i as u64 + 1, total, "Writing archive");
    }

    if let Some(manifest) = manifest {
        zip.start_file(DESCRIPTIONS_FILENAME, options)?;
        zip.write_all(manifest.as_bytes())?;
    }

    let staging = zip.finish()?.into_inner().map_err(|e| e.into_error())?;
    staging
        .persist(&archive_path)
        .with_context(|| format!("failed to write {}", archive_path.display()))?;
    info!(files = records.len(), path = %archive_path.display(), "Archive written");
    Ok(archive_path)
}
