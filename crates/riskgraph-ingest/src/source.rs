//! CSV record sources: one export file per entity type.
//!
//! The header row names the fields; every cell becomes a text value and is
//! interpreted later by the mapper. A row the CSV decoder cannot read stays
//! in the stream as a `RecordError` so it is counted at its own position.

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};

use riskgraph_core::{EntityType, RawRecord, RecordError, ScalarValue};

use crate::config::SourceFiles;
use crate::error::{IngestError, Result};
use crate::pipeline::RecordSources;

/// Open `path` and stream its rows as raw records, one item per data row.
pub fn csv_records(
    path: &Path,
) -> Result<impl Iterator<Item = std::result::Result<RawRecord, RecordError>> + Send + 'static> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => IngestError::SourceNotFound {
            path: path.to_path_buf(),
        },
        _ => IngestError::Io(e),
    })?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(file);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|source| IngestError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let file_name = path.display().to_string();
    Ok(reader
        .into_records()
        .enumerate()
        .map(move |(row, result)| match result {
            Ok(record) => Ok(to_raw(&headers, &record)),
            Err(e) => {
                tracing::warn!(file = %file_name, row, error = %e, "Undecodable CSV row");
                Err(RecordError::mapping("row", format!("undecodable CSV row: {e}")))
            }
        }))
}

fn to_raw(headers: &[String], record: &StringRecord) -> RawRecord {
    headers
        .iter()
        .zip(record.iter())
        .map(|(name, cell)| (name.clone(), ScalarValue::Text(cell.to_string())))
        .collect()
}

/// The export file for each entity type in `only` (or every type when
/// `only` is empty) that exists on disk. Missing files are logged and
/// skipped; their stages load zero records.
pub fn discover(files: &SourceFiles, only: &[EntityType]) -> Vec<(EntityType, PathBuf)> {
    EntityType::LOAD_ORDER
        .into_iter()
        .filter(|entity| only.is_empty() || only.contains(entity))
        .filter_map(|entity| {
            let path = files.path_for(entity);
            if path.is_file() {
                Some((entity, path))
            } else {
                tracing::warn!(%entity, path = %path.display(), "Source file not found, stage will be empty");
                None
            }
        })
        .collect()
}

/// Open every discovered export as a lazy record stream.
pub fn open_sources(files: &SourceFiles, only: &[EntityType]) -> Result<RecordSources> {
    let mut sources = RecordSources::new();
    for (entity, path) in discover(files, only) {
        tracing::info!(%entity, path = %path.display(), "Using source file");
        sources.insert_decoded(entity, csv_records(&path)?);
    }
    Ok(sources)
}
