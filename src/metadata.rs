//! Metadata handling module.
//!
//! Provides the in-memory sample metadata table and reading/writing of
//! tab-separated QIIME mapping files.

use crate::io::{open_text, IoError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::Path;
use thiserror::Error;

/// Marker that opens the header line of a mapping file.
pub const SAMPLE_ID_HEADER: &str = "#SampleID";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("mapping file has no header line starting with '{SAMPLE_ID_HEADER}'")]
    MissingHeader,

    #[error("row for sample '{sample_id}' has {actual} columns, header has {expected}")]
    RowLength {
        sample_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("sample '{0}' appears more than once")]
    DuplicateSample(String),
}

/// Sample metadata: a header naming the columns and one row per sample.
///
/// Rows keep file order and each row holds the sample ID as its first value,
/// so column indices line up with the header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadataTable {
    header: Vec<String>,
    rows: IndexMap<String, Vec<String>>,
}

impl SampleMetadataTable {
    /// Creates a table, checking that every row matches the header width and
    /// that sample IDs are unique.
    pub fn new<I>(header: Vec<String>, rows: I) -> Result<Self, MetadataError>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let mut table = SampleMetadataTable {
            header,
            rows: IndexMap::new(),
        };
        for row in rows {
            table.add_row(row)?;
        }
        Ok(table)
    }

    /// Appends a row keyed on its first value.
    pub fn add_row(&mut self, row: Vec<String>) -> Result<(), MetadataError> {
        let sample_id = row.first().cloned().unwrap_or_default();
        if row.len() != self.header.len() {
            return Err(MetadataError::RowLength {
                sample_id,
                expected: self.header.len(),
                actual: row.len(),
            });
        }
        if self.rows.contains_key(&sample_id) {
            return Err(MetadataError::DuplicateSample(sample_id));
        }
        self.rows.insert(sample_id, row);
        Ok(())
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &IndexMap<String, Vec<String>> {
        &self.rows
    }

    pub fn row(&self, sample_id: &str) -> Option<&[String]> {
        self.rows.get(sample_id).map(Vec::as_slice)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Value of `column` for `sample_id`, if both exist.
    pub fn value(&self, sample_id: &str, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(sample_id).map(|row| row[idx].as_str())
    }

    /// Sample IDs in file order.
    pub fn sample_ids(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    /// Returns the number of samples in the metadata.
    pub fn sample_count(&self) -> usize {
        self.rows.len()
    }
}

/// Loads a QIIME mapping file (tab-separated, optionally gzipped).
///
/// The header is the line starting with `#SampleID`; other `#` lines are
/// comments and blank lines are skipped.
pub fn load_mapping_file<P: AsRef<Path>>(path: P) -> Result<SampleMetadataTable, MetadataError> {
    let reader = open_text(path.as_ref())?;
    let table = read_mapping(reader)?;
    log::info!(
        "Loaded {} samples with {} metadata columns from {}",
        table.sample_count(),
        table.header().len(),
        path.as_ref().display()
    );
    Ok(table)
}

/// Reads mapping-file content from any reader.
pub fn read_mapping<R: Read>(reader: R) -> Result<SampleMetadataTable, MetadataError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for result in rdr.records() {
        let record = result?;
        let first = record.get(0).unwrap_or("");
        if first.starts_with(SAMPLE_ID_HEADER) {
            header = Some(record.iter().map(str::to_string).collect());
            continue;
        }
        if first.starts_with('#') || record.iter().all(str::is_empty) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }

    let header = header.ok_or(MetadataError::MissingHeader)?;
    SampleMetadataTable::new(header, rows)
}

/// Writes the header line followed by every row, tab-separated.
pub fn write_mapping_file<P: AsRef<Path>>(
    path: P,
    table: &SampleMetadataTable,
) -> Result<(), MetadataError> {
    let file = File::create(path.as_ref()).map_err(IoError::from)?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(BufWriter::new(file));

    writer.write_record(table.header())?;
    for row in table.rows().values() {
        writer.write_record(row)?;
    }
    writer.flush().map_err(IoError::from)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    pub(crate) const MAPPING: &str = "\
#SampleID\tBarcodeSequence\tTreatment\tColor\tSmoking\tDescription
#a comment line
PC.636\tACGGTGAGTGTC\tFast\t#0000CC\tCurrent_Smoker\tFasting_636
PC.355\tAACTCGTCGATG\tControl\t#008000\tCurrent_Smoker\tControl_355

PC.607\tAACTGTGCGTAC\tFast\t#0000CC\tNever_Smoker\tFasting_607
PC.593\tAGCAGCACTTGT\tControl\t#008000\tNever_Smoker\tControl_593
";

    pub(crate) fn test_table() -> SampleMetadataTable {
        read_mapping(MAPPING.as_bytes()).unwrap()
    }

    #[test]
    fn test_read_mapping_basic() {
        let table = test_table();
        assert_eq!(table.header().len(), 6);
        assert_eq!(table.header()[0], "#SampleID");
        assert_eq!(table.sample_count(), 4);
        assert_eq!(
            table.sample_ids().collect::<Vec<_>>(),
            vec!["PC.636", "PC.355", "PC.607", "PC.593"]
        );
        assert_eq!(table.value("PC.355", "Treatment"), Some("Control"));
        assert_eq!(table.value("PC.355", "Missing"), None);
        assert_eq!(table.row("PC.607").unwrap()[0], "PC.607");
    }

    #[test]
    fn test_read_mapping_missing_header() {
        let result = read_mapping("S1\tA\nS2\tB\n".as_bytes());
        assert!(matches!(result, Err(MetadataError::MissingHeader)));
    }

    #[test]
    fn test_read_mapping_ragged_row() {
        let result = read_mapping("#SampleID\tA\tB\nS1\tx\n".as_bytes());
        match result {
            Err(MetadataError::RowLength {
                sample_id,
                expected,
                actual,
            }) => {
                assert_eq!(sample_id, "S1");
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("expected row length error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_sample_rejected() {
        let result = read_mapping("#SampleID\tA\nS1\tx\nS1\ty\n".as_bytes());
        assert!(matches!(result, Err(MetadataError::DuplicateSample(id)) if id == "S1"));
    }

    #[test]
    fn test_write_then_load_mapping_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map.txt");
        let table = test_table();

        write_mapping_file(&path, &table).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("#SampleID\tBarcodeSequence\tTreatment"));
        assert_eq!(content.lines().count(), 5);

        let reloaded = load_mapping_file(&path).unwrap();
        assert_eq!(reloaded, table);
    }
}
