use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::{FileRecord, FileStatus};

fn is_blank(s: &&str) -> bool {
    s.is_empty()
}

#[derive(Serialize)]
struct ReportFile<'a> {
    id: &'a str,
    original_name: &'a str,
    new_name: &'a str,
    status: FileStatus,
    #[serde(skip_serializing_if = "is_blank")]
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Serialize)]
struct Report<'a> {
    generated_at: DateTime<Utc>,
    files: Vec<ReportFile<'a>>,
}

/// Write a JSON summary of every record: names, status, description, error.
pub fn write_report(records: &[FileRecord], report_path: &Path) -> anyhow::Result<()> {
    let report = Report {
        generated_at: Utc::now(),
        files: records
            .iter()
            .map(|r| ReportFile {
                id: &r.id,
                original_name: &r.original_name,
                new_name: &r.new_name,
                status: r.status,
                description: &r.description,
                error: r.error_message.as_deref(),
            })
            .collect(),
    };

    if let Some(parent) = report_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(report_path)?;
    serde_json::to_writer_pretty(file, &report)?;

    Ok(())
}
