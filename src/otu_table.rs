//! OTU abundance tables.
//!
//! All abundance code works through the [`OtuTable`] trait so that dense
//! in-memory matrices and sparse BIOM-style triplet data are interchangeable.

use crate::bio::Lineage;
use crate::io::OtuMap;
use indexmap::{IndexMap, IndexSet};
use ndarray::Array2;
use sprs::{CsMat, TriMat};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum OtuTableError {
    #[error("dimension mismatch: expected {expected:?} (otus x samples), got {actual:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("duplicate identifier '{0}'")]
    DuplicateId(String),

    #[error("entry ({row}, {col}) lies outside a {n_otus} x {n_samples} table")]
    OutOfRange {
        row: usize,
        col: usize,
        n_otus: usize,
        n_samples: usize,
    },

    #[error("negative count {value} for OTU '{otu_id}' in sample '{sample_id}'")]
    NegativeCount {
        otu_id: String,
        sample_id: String,
        value: f64,
    },
}

/// Read access to an OTU-by-sample count table.
pub trait OtuTable {
    /// Sample identifiers, in table order.
    fn sample_ids(&self) -> &[String];

    /// OTU identifiers, in table order.
    fn otu_ids(&self) -> &[String];

    /// Raw count of `otu_id` in `sample_id`; zero when either is unknown.
    fn count(&self, otu_id: &str, sample_id: &str) -> f64;

    /// Lineage assigned to `otu_id`, if any.
    fn taxonomy(&self, otu_id: &str) -> Option<&Lineage>;

    /// Returns the dimensions of the table (otus, samples).
    fn dimensions(&self) -> (usize, usize) {
        (self.otu_ids().len(), self.sample_ids().len())
    }
}

/// The sample a sequence ID belongs to: everything before its final `_`.
pub fn sample_id_of(seq_id: &str) -> &str {
    seq_id.rfind('_').map_or(seq_id, |idx| &seq_id[..idx])
}

fn index_ids(ids: &[String]) -> Result<HashMap<String, usize>, OtuTableError> {
    let mut map = HashMap::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        if map.insert(id.clone(), i).is_some() {
            return Err(OtuTableError::DuplicateId(id.clone()));
        }
    }
    Ok(map)
}

/// Dense count table backed by an `ndarray` matrix (OTUs x samples).
#[derive(Debug, Clone)]
pub struct CountTable {
    counts: Array2<f64>,
    otu_ids: Vec<String>,
    otu_map: HashMap<String, usize>,
    sample_ids: Vec<String>,
    sample_map: HashMap<String, usize>,
    taxonomy: HashMap<String, Lineage>,
}

impl CountTable {
    pub fn new(
        counts: Array2<f64>,
        otu_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self, OtuTableError> {
        let expected = (otu_ids.len(), sample_ids.len());
        if counts.dim() != expected {
            return Err(OtuTableError::DimensionMismatch {
                expected,
                actual: counts.dim(),
            });
        }
        if let Some(((r, c), &value)) = counts.indexed_iter().find(|(_, v)| **v < 0.0) {
            return Err(OtuTableError::NegativeCount {
                otu_id: otu_ids[r].clone(),
                sample_id: sample_ids[c].clone(),
                value,
            });
        }
        Ok(CountTable {
            otu_map: index_ids(&otu_ids)?,
            sample_map: index_ids(&sample_ids)?,
            counts,
            otu_ids,
            sample_ids,
            taxonomy: HashMap::new(),
        })
    }

    /// Builds a table of sequence counts from an OTU map: each sequence ID
    /// adds one to its OTU in the sample named by its prefix.
    pub fn from_otu_map(otus: &OtuMap) -> Self {
        let samples: IndexSet<&str> = otus
            .values()
            .flatten()
            .map(|seq| sample_id_of(seq))
            .collect();
        let sample_ids: Vec<String> = samples.iter().map(|s| s.to_string()).collect();
        let otu_ids: Vec<String> = otus.keys().cloned().collect();

        let mut counts = Array2::zeros((otu_ids.len(), sample_ids.len()));
        for (r, seqs) in otus.values().enumerate() {
            for seq in seqs {
                if let Some(c) = samples.get_index_of(sample_id_of(seq)) {
                    counts[[r, c]] += 1.0;
                }
            }
        }

        // OTU map keys are unique and samples come from an IndexSet.
        CountTable {
            otu_map: otu_ids.iter().cloned().enumerate().map(|(i, id)| (id, i)).collect(),
            sample_map: sample_ids.iter().cloned().enumerate().map(|(i, id)| (id, i)).collect(),
            counts,
            otu_ids,
            sample_ids,
            taxonomy: HashMap::new(),
        }
    }

    /// Attaches lineages to OTUs; entries for unknown OTUs are ignored.
    pub fn with_taxonomy<I>(mut self, taxonomy: I) -> Self
    where
        I: IntoIterator<Item = (String, Lineage)>,
    {
        for (otu_id, lineage) in taxonomy {
            if self.otu_map.contains_key(&otu_id) {
                self.taxonomy.insert(otu_id, lineage);
            }
        }
        self
    }

    /// Retrieves the counts for a specific OTU.
    pub fn get_otu_counts(&self, otu_id: &str) -> Option<ndarray::ArrayView1<f64>> {
        self.otu_map.get(otu_id).map(|&idx| self.counts.row(idx))
    }

    /// Retrieves the counts for a specific sample.
    pub fn get_sample_counts(&self, sample_id: &str) -> Option<ndarray::ArrayView1<f64>> {
        self.sample_map
            .get(sample_id)
            .map(|&idx| self.counts.column(idx))
    }
}

impl OtuTable for CountTable {
    fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    fn otu_ids(&self) -> &[String] {
        &self.otu_ids
    }

    fn count(&self, otu_id: &str, sample_id: &str) -> f64 {
        match (self.otu_map.get(otu_id), self.sample_map.get(sample_id)) {
            (Some(&r), Some(&c)) => self.counts[[r, c]],
            _ => 0.0,
        }
    }

    fn taxonomy(&self, otu_id: &str) -> Option<&Lineage> {
        self.taxonomy.get(otu_id)
    }
}

/// Sparse count table in the shape of a BIOM `data` block: a list of
/// `(otu_index, sample_index, count)` triplets over row and column IDs.
#[derive(Debug, Clone)]
pub struct SparseOtuTable {
    counts: CsMat<f64>,
    otu_ids: Vec<String>,
    otu_map: HashMap<String, usize>,
    sample_ids: Vec<String>,
    sample_map: HashMap<String, usize>,
    taxonomy: IndexMap<String, Lineage>,
}

impl SparseOtuTable {
    /// Builds the table; repeated triplets for one cell are summed.
    pub fn from_triplets(
        otu_ids: Vec<String>,
        sample_ids: Vec<String>,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self, OtuTableError> {
        let (n_otus, n_samples) = (otu_ids.len(), sample_ids.len());
        let mut tri = TriMat::new((n_otus, n_samples));
        for &(row, col, value) in triplets {
            if row >= n_otus || col >= n_samples {
                return Err(OtuTableError::OutOfRange {
                    row,
                    col,
                    n_otus,
                    n_samples,
                });
            }
            if value < 0.0 {
                return Err(OtuTableError::NegativeCount {
                    otu_id: otu_ids[row].clone(),
                    sample_id: sample_ids[col].clone(),
                    value,
                });
            }
            tri.add_triplet(row, col, value);
        }

        Ok(SparseOtuTable {
            counts: tri.to_csr(),
            otu_map: index_ids(&otu_ids)?,
            sample_map: index_ids(&sample_ids)?,
            otu_ids,
            sample_ids,
            taxonomy: IndexMap::new(),
        })
    }

    /// Sparse counterpart of [`CountTable::from_otu_map`]: one entry per
    /// (OTU, sample) pair that has at least one sequence.
    pub fn from_otu_map(otus: &OtuMap) -> Result<Self, OtuTableError> {
        let samples: IndexSet<&str> = otus
            .values()
            .flatten()
            .map(|seq| sample_id_of(seq))
            .collect();
        let samples = &samples;
        let triplets: Vec<(usize, usize, f64)> = otus
            .values()
            .enumerate()
            .flat_map(|(r, seqs)| {
                seqs.iter()
                    .filter_map(move |seq| samples.get_index_of(sample_id_of(seq)))
                    .map(move |c| (r, c, 1.0))
            })
            .collect();

        Self::from_triplets(
            otus.keys().cloned().collect(),
            samples.iter().map(|s| s.to_string()).collect(),
            &triplets,
        )
    }

    /// Attaches lineages to OTUs; entries for unknown OTUs are ignored.
    pub fn with_taxonomy<I>(mut self, taxonomy: I) -> Self
    where
        I: IntoIterator<Item = (String, Lineage)>,
    {
        for (otu_id, lineage) in taxonomy {
            if self.otu_map.contains_key(&otu_id) {
                self.taxonomy.insert(otu_id, lineage);
            }
        }
        self
    }

    /// Number of stored (non-zero) entries.
    pub fn nnz(&self) -> usize {
        self.counts.nnz()
    }
}

impl OtuTable for SparseOtuTable {
    fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    fn otu_ids(&self) -> &[String] {
        &self.otu_ids
    }

    fn count(&self, otu_id: &str, sample_id: &str) -> f64 {
        match (self.otu_map.get(otu_id), self.sample_map.get(sample_id)) {
            (Some(&r), Some(&c)) => self.counts.get(r, c).copied().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    fn taxonomy(&self, otu_id: &str) -> Option<&Lineage> {
        self.taxonomy.get(otu_id)
    }
}
