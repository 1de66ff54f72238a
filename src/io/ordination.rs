//! Parsing of PCoA/UniFrac ordination result files.
//!
//! Two layouts are recognized from the first token of the file:
//!
//! * legacy (`pc vector number`): one row per sample, then the eigenvalue and
//!   percent-explained lines at the very end of the file;
//! * current (`Eigvals`): sectioned layout with eigenvalues, proportion
//!   explained (scaled here to percent), and a `Site` block of sample rows.

use super::{open_text, IoError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;
use thiserror::Error;

const LEGACY_HEADER: &str = "pc vector number";
const CURRENT_HEADER: &str = "Eigvals";

/// Line offsets (after the header line) of the current layout.
const CURRENT_EIGVALS_LINE: usize = 0;
const CURRENT_VAREXP_LINE: usize = 3;
const CURRENT_SITE_START: usize = 8;

#[derive(Error, Debug)]
pub enum OrdinationError {
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error("ordination format not supported/recognized (first token '{0}')")]
    UnsupportedFormat(String),

    #[error("could not parse line {line}: '{content}'")]
    Parse { line: usize, content: String },

    #[error("ordination file ends before line {0}")]
    Truncated(usize),
}

impl From<std::io::Error> for OrdinationError {
    fn from(err: std::io::Error) -> Self {
        OrdinationError::Io(IoError::Io(err))
    }
}

/// The layout a file was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrdinationFormat {
    Legacy,
    Current,
}

/// Parsed ordination: eigenvalues, percent variance explained per axis and
/// per-sample coordinates in file order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinationResult {
    pub format: OrdinationFormat,
    pub eigvals: Vec<f64>,
    pub varexp: Vec<f64>,
    pub pcd: IndexMap<String, Vec<f64>>,
}

impl OrdinationResult {
    /// Number of axes carried by the sample coordinates.
    pub fn axis_count(&self) -> usize {
        self.pcd.values().next().map_or(0, Vec::len)
    }

    /// Percent variance explained by `axis` (0-based), when the file
    /// reports one.
    pub fn explained_variance(&self, axis: usize) -> Option<f64> {
        self.varexp.get(axis).copied()
    }

    pub fn coordinates(&self, sample_id: &str) -> Option<&[f64]> {
        self.pcd.get(sample_id).map(Vec::as_slice)
    }
}

/// Parses an ordination file, detecting its layout.
pub fn parse_unifrac<P: AsRef<Path>>(path: P) -> Result<OrdinationResult, OrdinationError> {
    let reader = open_text(path.as_ref())?;
    let result = parse_unifrac_reader(reader)?;
    log::info!(
        "Parsed {:?} ordination with {} samples and {} axes from {}",
        result.format,
        result.pcd.len(),
        result.axis_count(),
        path.as_ref().display()
    );
    Ok(result)
}

pub fn parse_unifrac_reader<R: BufRead>(reader: R) -> Result<OrdinationResult, OrdinationError> {
    let mut lines = reader.lines();
    let first = match lines.next() {
        Some(line) => line?,
        None => return Err(OrdinationError::UnsupportedFormat(String::new())),
    };
    let rest = lines
        .map(|line| line.map(|l| l.trim().to_string()))
        .collect::<Result<Vec<_>, _>>()?;

    let token = first.split('\t').next().unwrap_or("").trim();
    match token {
        LEGACY_HEADER => parse_legacy(&rest),
        CURRENT_HEADER => parse_current(&rest),
        other => Err(OrdinationError::UnsupportedFormat(other.to_string())),
    }
}

/// Parses every tab-separated token of `line` as a float. `line_no` is the
/// 1-based position in the file, used for error reporting.
fn parse_floats<'a, I>(tokens: I, line_no: usize, line: &str) -> Result<Vec<f64>, OrdinationError>
where
    I: Iterator<Item = &'a str>,
{
    tokens
        .map(|t| {
            t.trim().parse::<f64>().map_err(|_| OrdinationError::Parse {
                line: line_no,
                content: line.to_string(),
            })
        })
        .collect()
}

/// `sample_id<TAB>coord...` rows starting at `start`, until a blank line or
/// `end`. Indices are into the lines after the header.
fn parse_rows(
    lines: &[String],
    start: usize,
    end: usize,
) -> Result<IndexMap<String, Vec<f64>>, OrdinationError> {
    let mut pcd = IndexMap::new();
    for (idx, line) in lines.iter().enumerate().take(end).skip(start) {
        if line.is_empty() {
            break;
        }
        let mut fields = line.split('\t');
        let sample_id = fields.next().unwrap_or("").to_string();
        let coords = parse_floats(fields, idx + 2, line)?;
        pcd.insert(sample_id, coords);
    }

    let mut widths = pcd.values().map(Vec::len);
    if let Some(width) = widths.next() {
        if let Some((sample_id, _)) = pcd.iter().find(|(_, c)| c.len() != width) {
            let idx = lines
                .iter()
                .position(|l| l.split('\t').next() == Some(sample_id.as_str()))
                .unwrap_or(start);
            return Err(OrdinationError::Parse {
                line: idx + 2,
                content: lines[idx].clone(),
            });
        }
    }
    Ok(pcd)
}

fn parse_legacy(lines: &[String]) -> Result<OrdinationResult, OrdinationError> {
    // Trailing blank lines do not count toward the eigenvalue trailer.
    let len = lines
        .iter()
        .rposition(|l| !l.is_empty())
        .map_or(0, |idx| idx + 1);
    if len < 2 {
        return Err(OrdinationError::Truncated(len + 2));
    }
    let (eig_idx, var_idx) = (len - 2, len - 1);

    let pcd = parse_rows(lines, 0, eig_idx)?;
    let trailer = |idx: usize| {
        let line = &lines[idx];
        parse_floats(line.split('\t').skip(1), idx + 2, line)
    };

    Ok(OrdinationResult {
        format: OrdinationFormat::Legacy,
        eigvals: trailer(eig_idx)?,
        varexp: trailer(var_idx)?,
        pcd,
    })
}

fn parse_current(lines: &[String]) -> Result<OrdinationResult, OrdinationError> {
    let line_at = |idx: usize| {
        lines
            .get(idx)
            .ok_or(OrdinationError::Truncated(idx + 2))
    };

    let eig_line = line_at(CURRENT_EIGVALS_LINE)?;
    let eigvals = parse_floats(eig_line.split('\t'), CURRENT_EIGVALS_LINE + 2, eig_line)?;

    let var_line = line_at(CURRENT_VAREXP_LINE)?;
    let varexp = parse_floats(var_line.split('\t'), CURRENT_VAREXP_LINE + 2, var_line)?
        .into_iter()
        .map(|p| p * 100.0)
        .collect();

    let pcd = parse_rows(lines, CURRENT_SITE_START, lines.len())?;

    Ok(OrdinationResult {
        format: OrdinationFormat::Current,
        eigvals,
        varexp,
        pcd,
    })
}
