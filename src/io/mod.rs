//! Input/Output operations module.
//!
//! Handles reading the flat tab-separated inputs (OTU maps, taxonomy tables)
//! and writing pruning results. Every file is read completely into memory and
//! its handle released before any computation starts.

pub mod ordination;

use crate::pipeline::prune::RemovedOtu;
use flate2::read::MultiGzDecoder;
use indexmap::IndexMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed line {line}: '{content}'")]
    Malformed { line: usize, content: String },

    #[error("OTU '{otu_id}' listed again on line {line}")]
    DuplicateOtu { line: u64, otu_id: String },
}

/// OTU ID → sequence IDs, in file order.
pub type OtuMap = IndexMap<String, Vec<String>>;

/// Opens a text file for buffered reading, decompressing `.gz` files.
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead>, IoError> {
    let file = File::open(path)?;
    let is_gz = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("gz"));
    if is_gz {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn tsv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

fn tsv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(writer)
}

/// Reads an OTU map (`OTU_ID<TAB>seqID_1<TAB>seqID_2...`), the output of OTU
/// picking.
pub fn read_otu_map<P: AsRef<Path>>(path: P) -> Result<OtuMap, IoError> {
    let otus = read_otu_map_from(open_text(path.as_ref())?)?;
    log::info!("Read {} OTUs from {}", otus.len(), path.as_ref().display());
    Ok(otus)
}

pub fn read_otu_map_from<R: Read>(reader: R) -> Result<OtuMap, IoError> {
    let mut otus = OtuMap::new();
    for result in tsv_reader(reader).records() {
        let record = result?;
        let mut fields = record.iter().filter(|f| !f.is_empty());
        if let Some(otu_id) = fields.next() {
            if otus.contains_key(otu_id) {
                return Err(IoError::DuplicateOtu {
                    line: record.position().map_or(0, |p| p.line()),
                    otu_id: otu_id.to_string(),
                });
            }
            otus.insert(otu_id.to_string(), fields.map(str::to_string).collect());
        }
    }
    Ok(otus)
}

/// Reads an `OTU_ID<TAB>lineage[<TAB>...]` taxonomy assignment table.
///
/// Columns after the lineage (e.g. a confidence score) are ignored.
pub fn read_taxonomy_table<P: AsRef<Path>>(path: P) -> Result<IndexMap<String, String>, IoError> {
    read_taxonomy_table_from(open_text(path.as_ref())?)
}

pub fn read_taxonomy_table_from<R: Read>(reader: R) -> Result<IndexMap<String, String>, IoError> {
    let mut taxa = IndexMap::new();
    for (i, result) in tsv_reader(reader).records().enumerate() {
        let record = result?;
        match (record.get(0), record.get(1)) {
            (Some(id), Some(lineage)) if !id.is_empty() => {
                taxa.insert(id.to_string(), lineage.to_string());
            }
            (Some(""), None) | (None, _) => continue,
            _ => {
                return Err(IoError::Malformed {
                    line: i + 1,
                    content: record.iter().collect::<Vec<_>>().join("\t"),
                })
            }
        }
    }
    Ok(taxa)
}

/// Writes OTUs in the same shape as [`read_otu_map`] consumes.
pub fn write_otu_map<'a, P, I>(path: P, otus: I) -> Result<(), IoError>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = (&'a str, &'a [String])>,
{
    let file = File::create(path)?;
    let mut writer = tsv_writer(BufWriter::new(file));
    for (otu_id, seq_ids) in otus {
        let mut record = Vec::with_capacity(seq_ids.len() + 1);
        record.push(otu_id);
        record.extend(seq_ids.iter().map(String::as_str));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn format_fraction(value: Option<f64>) -> String {
    value.map_or_else(String::new, |v| format!("{:.4}", v))
}

/// Writes the removed-OTU report: `OTU ID`, `Sample%`, `Seq%`, then the
/// sequence IDs. A fraction that was never computed is left empty.
pub fn write_removed_report<P: AsRef<Path>>(
    path: P,
    removed: &[RemovedOtu],
) -> Result<(), IoError> {
    let file = File::create(path)?;
    let mut writer = tsv_writer(BufWriter::new(file));

    writer.write_record(["OTU ID", "Sample%", "Seq%", "Sequence IDs"])?;
    for otu in removed {
        let mut record = vec![
            otu.otu_id.clone(),
            format_fraction(otu.sample_fraction),
            format_fraction(otu.seq_fraction),
        ];
        record.extend(otu.seq_ids.iter().cloned());
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}
