//! Two-stage OTU pruning by sample prevalence and sequence abundance.
//!
//! OTUs are pooled by their lineage truncated at a chosen rank. Stage one
//! drops groups seen in too few samples; stage two drops surviving groups
//! holding too small a share of all sequences. Groups that failed stage one
//! get a second chance: if their sequence share alone clears the abundance
//! threshold they are kept after all.

use crate::bio::{truncate, TaxonomicRank, TaxonomyError};
use crate::io::OtuMap;
use crate::otu_table::sample_id_of;
use indexmap::{IndexMap, IndexSet};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PruneError {
    #[error("empty input: {samples} samples and {seqs} sequences")]
    EmptyInput { samples: usize, seqs: usize },

    #[error("taxonomy error: {0}")]
    Taxonomy(#[from] TaxonomyError),

    #[error("OTU '{0}' has no taxonomy assignment")]
    MissingTaxonomy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid parameter file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pruning thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PruneParams {
    /// Rank at which OTUs are pooled; written as its one-letter code.
    #[serde(with = "rank_letter")]
    pub rank: TaxonomicRank,
    /// Minimum fraction of samples a group must occur in.
    pub sample_pct: f64,
    /// Minimum fraction of all sequences a group must hold.
    pub seq_pct: f64,
}

impl Default for PruneParams {
    fn default() -> Self {
        PruneParams {
            rank: TaxonomicRank::Genus,
            sample_pct: 0.05,
            seq_pct: 0.0001,
        }
    }
}

impl PruneParams {
    /// Loads parameters from a JSON file; missing fields keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, PruneError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// Serializes a rank as its letter; unknown letters read back as species.
mod rank_letter {
    use crate::bio::TaxonomicRank;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(rank: &TaxonomicRank, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_char(rank.letter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<TaxonomicRank, D::Error> {
        let code = String::deserialize(d)?;
        let mut chars = code.chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) => Ok(TaxonomicRank::from_letter_or_species(letter)),
            _ => code.parse().map_err(D::Error::custom),
        }
    }
}

/// An OTU's lineage string and the sequences assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtuRecord {
    pub taxonomy: String,
    pub seq_ids: Vec<String>,
}

/// OTU ID → record, in input order.
pub type OtuRecords = IndexMap<String, OtuRecord>;

/// An OTU dropped by the pipeline, with the fraction(s) that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedOtu {
    pub otu_id: String,
    pub taxonomy: String,
    /// Fraction of samples its group occurs in, when that test failed.
    pub sample_fraction: Option<f64>,
    /// Fraction of all sequences its group holds, when that test failed.
    pub seq_fraction: Option<f64>,
    pub seq_ids: Vec<String>,
}

impl RemovedOtu {
    fn record(&self) -> OtuRecord {
        OtuRecord {
            taxonomy: self.taxonomy.clone(),
            seq_ids: self.seq_ids.clone(),
        }
    }
}

/// One taxonomic group at the pruning rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStat {
    pub taxon: String,
    pub otus: usize,
    pub seqs: usize,
    pub samples: usize,
    pub kept: bool,
}

/// Totals describing one pruning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneSummary {
    #[serde(with = "rank_letter")]
    pub rank: TaxonomicRank,
    pub total_samples: usize,
    pub total_seqs: usize,
    pub input_otus: usize,
    pub kept_otus: usize,
    pub removed_otus: usize,
    pub kept_seqs: usize,
    pub removed_seqs: usize,
    /// Per-group breakdown, in order of first appearance.
    pub groups: Vec<GroupStat>,
}

impl PruneSummary {
    pub fn total_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn kept_groups(&self) -> usize {
        self.groups.iter().filter(|g| g.kept).count()
    }

    pub fn removed_groups(&self) -> usize {
        self.groups.iter().filter(|g| !g.kept).count()
    }

    /// `part` as a percentage of `whole`; zero when `whole` is zero.
    pub fn percent(part: usize, whole: usize) -> f64 {
        if whole == 0 {
            0.0
        } else {
            part as f64 / whole as f64 * 100.0
        }
    }
}

/// Result of [`prune_otus`]: kept and removed OTUs partition the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneReport {
    pub kept: OtuRecords,
    pub removed: Vec<RemovedOtu>,
    pub summary: PruneSummary,
}

/// Pairs every OTU of an OTU map with its lineage string.
pub fn assign_taxonomy(
    otus: &OtuMap,
    taxonomy: &IndexMap<String, String>,
) -> Result<OtuRecords, PruneError> {
    otus.iter()
        .map(|(otu_id, seq_ids)| {
            let lineage = taxonomy
                .get(otu_id)
                .ok_or_else(|| PruneError::MissingTaxonomy(otu_id.clone()))?;
            let record = OtuRecord {
                taxonomy: lineage.clone(),
                seq_ids: seq_ids.clone(),
            };
            Ok((otu_id.clone(), record))
        })
        .collect()
}

/// Drops sequences whose sample is not in `keep`; OTUs left empty are
/// removed.
pub fn filter_otu_map_by_samples(otus: &OtuMap, keep: &HashSet<String>) -> OtuMap {
    otus.iter()
        .filter_map(|(otu_id, seqs)| {
            let kept: Vec<String> = seqs
                .iter()
                .filter(|seq| keep.contains(sample_id_of(seq)))
                .cloned()
                .collect();
            if kept.is_empty() {
                debug!("OTU {} removed: no sequences from retained samples", otu_id);
                None
            } else {
                Some((otu_id.clone(), kept))
            }
        })
        .collect()
}

/// Number of distinct samples and of sequences across all OTUs.
pub fn count_totals(otus: &OtuRecords) -> (usize, usize) {
    let samples: HashSet<&str> = otus
        .values()
        .flat_map(|r| r.seq_ids.iter())
        .map(|seq| sample_id_of(seq))
        .collect();
    let seqs = otus.values().map(|r| r.seq_ids.len()).sum();
    (samples.len(), seqs)
}

fn group_of(record: &OtuRecord, rank: TaxonomicRank) -> Result<String, PruneError> {
    Ok(truncate(&record.taxonomy, rank)?)
}

/// Splits OTUs by the fraction of all `n_samples` samples their group occurs
/// in. Returns `(above, below)`; `below` entries carry the sample fraction.
pub fn filter_by_sample_pct(
    otus: &OtuRecords,
    n_samples: usize,
    pct: f64,
    rank: TaxonomicRank,
) -> Result<(OtuRecords, IndexMap<String, RemovedOtu>), PruneError> {
    if n_samples == 0 {
        return Err(PruneError::EmptyInput {
            samples: 0,
            seqs: otus.values().map(|r| r.seq_ids.len()).sum(),
        });
    }

    let mut group_samples: HashMap<String, HashSet<&str>> = HashMap::new();
    for record in otus.values() {
        group_samples
            .entry(group_of(record, rank)?)
            .or_default()
            .extend(record.seq_ids.iter().map(|seq| sample_id_of(seq)));
    }
    let prevalence: HashMap<String, f64> = group_samples
        .into_iter()
        .map(|(group, samples)| (group, samples.len() as f64 / n_samples as f64))
        .collect();

    split_by(otus, rank, &prevalence, pct, |otu_id, record, fraction| RemovedOtu {
        otu_id: otu_id.to_string(),
        taxonomy: record.taxonomy.clone(),
        sample_fraction: Some(fraction),
        seq_fraction: None,
        seq_ids: record.seq_ids.clone(),
    })
}

/// Splits OTUs by the fraction of all `n_seqs` sequences their group holds.
/// Returns `(above, below)`; `below` entries carry the sequence fraction.
pub fn filter_by_sequence_pct(
    otus: &OtuRecords,
    n_seqs: usize,
    pct: f64,
    rank: TaxonomicRank,
) -> Result<(OtuRecords, IndexMap<String, RemovedOtu>), PruneError> {
    if n_seqs == 0 {
        return Err(PruneError::EmptyInput {
            samples: count_totals(otus).0,
            seqs: 0,
        });
    }

    let mut group_seqs: HashMap<String, usize> = HashMap::new();
    for record in otus.values() {
        *group_seqs.entry(group_of(record, rank)?).or_default() += record.seq_ids.len();
    }
    let abundance: HashMap<String, f64> = group_seqs
        .into_iter()
        .map(|(group, seqs)| (group, seqs as f64 / n_seqs as f64))
        .collect();

    split_by(otus, rank, &abundance, pct, |otu_id, record, fraction| RemovedOtu {
        otu_id: otu_id.to_string(),
        taxonomy: record.taxonomy.clone(),
        sample_fraction: None,
        seq_fraction: Some(fraction),
        seq_ids: record.seq_ids.clone(),
    })
}

fn split_by<F>(
    otus: &OtuRecords,
    rank: TaxonomicRank,
    fractions: &HashMap<String, f64>,
    pct: f64,
    removed: F,
) -> Result<(OtuRecords, IndexMap<String, RemovedOtu>), PruneError>
where
    F: Fn(&str, &OtuRecord, f64) -> RemovedOtu,
{
    let mut above = OtuRecords::new();
    let mut below = IndexMap::new();
    for (otu_id, record) in otus {
        let fraction = fractions
            .get(&group_of(record, rank)?)
            .copied()
            .unwrap_or(0.0);
        if fraction >= pct {
            above.insert(otu_id.clone(), record.clone());
        } else {
            below.insert(otu_id.clone(), removed(otu_id, record, fraction));
        }
    }
    Ok((above, below))
}

/// Runs the full pruning pipeline.
///
/// 1. Sample-prevalence filter over all OTUs.
/// 2. Sequence-abundance filter over the OTUs that passed step 1.
/// 3. Sequence-abundance filter over the OTUs that failed step 1; passing
///    groups are rescued.
///
/// Both abundance passes divide by the sequence total of the whole input.
/// Kept and removed OTUs are listed in input order.
pub fn prune_otus(otus: &OtuRecords, params: &PruneParams) -> Result<PruneReport, PruneError> {
    let (n_samples, n_seqs) = count_totals(otus);
    if n_samples == 0 || n_seqs == 0 {
        return Err(PruneError::EmptyInput {
            samples: n_samples,
            seqs: n_seqs,
        });
    }
    info!(
        "Pruning {} OTUs ({} samples, {} sequences) at rank {}",
        otus.len(),
        n_samples,
        n_seqs,
        params.rank.as_str()
    );

    let (above1, below1) = filter_by_sample_pct(otus, n_samples, params.sample_pct, params.rank)?;
    debug!("Sample filter: {} above, {} below", above1.len(), below1.len());

    let (above2, below2) = filter_by_sequence_pct(&above1, n_seqs, params.seq_pct, params.rank)?;
    debug!("Sequence filter: {} above, {} below", above2.len(), below2.len());

    let second_chance: OtuRecords = below1
        .iter()
        .map(|(otu_id, removed)| (otu_id.clone(), removed.record()))
        .collect();
    let (rescued, still_below) =
        filter_by_sequence_pct(&second_chance, n_seqs, params.seq_pct, params.rank)?;
    debug!("Rescue pass: {} rescued, {} removed", rescued.len(), still_below.len());

    let mut kept = OtuRecords::new();
    let mut removed = Vec::new();
    for (otu_id, record) in otus {
        if above2.contains_key(otu_id) || rescued.contains_key(otu_id) {
            kept.insert(otu_id.clone(), record.clone());
        } else if let Some(entry) = below2.get(otu_id) {
            removed.push(entry.clone());
        } else if let Some(entry) = still_below.get(otu_id) {
            removed.push(RemovedOtu {
                sample_fraction: below1.get(otu_id).and_then(|r| r.sample_fraction),
                ..entry.clone()
            });
        }
    }

    let summary = summarize(otus, &kept, &removed, n_samples, n_seqs, params.rank)?;
    info!(
        "{} OTUs kept, {} removed",
        summary.kept_otus, summary.removed_otus
    );
    Ok(PruneReport {
        kept,
        removed,
        summary,
    })
}

fn summarize(
    otus: &OtuRecords,
    kept: &OtuRecords,
    removed: &[RemovedOtu],
    n_samples: usize,
    n_seqs: usize,
    rank: TaxonomicRank,
) -> Result<PruneSummary, PruneError> {
    let mut groups: IndexMap<String, (GroupStat, IndexSet<&str>)> = IndexMap::new();
    for (otu_id, record) in otus {
        let taxon = group_of(record, rank)?;
        let (stat, samples) = groups.entry(taxon.clone()).or_insert_with(|| {
            let stat = GroupStat {
                taxon,
                otus: 0,
                seqs: 0,
                samples: 0,
                kept: false,
            };
            (stat, IndexSet::new())
        });
        stat.otus += 1;
        stat.seqs += record.seq_ids.len();
        stat.kept |= kept.contains_key(otu_id);
        samples.extend(record.seq_ids.iter().map(|seq| sample_id_of(seq)));
    }

    Ok(PruneSummary {
        rank,
        total_samples: n_samples,
        total_seqs: n_seqs,
        input_otus: otus.len(),
        kept_otus: kept.len(),
        removed_otus: removed.len(),
        kept_seqs: kept.values().map(|r| r.seq_ids.len()).sum(),
        removed_seqs: removed.iter().map(|r| r.seq_ids.len()).sum(),
        groups: groups
            .into_values()
            .map(|(stat, samples)| GroupStat {
                samples: samples.len(),
                ..stat
            })
            .collect(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn seqs(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn record(taxonomy: &str, ids: &[&str]) -> OtuRecord {
        OtuRecord {
            taxonomy: taxonomy.to_string(),
            seq_ids: seqs(ids),
        }
    }

    /// Two samples; OTUs 1 and 2 are species A (5 sequences each), OTU 3 is
    /// species B with a single sequence.
    pub(crate) fn scenario() -> OtuRecords {
        let mut otus = OtuRecords::new();
        otus.insert(
            "1".into(),
            record("k__K; g__G; s__A", &["S1_1", "S1_2", "S1_3", "S2_1", "S2_2"]),
        );
        otus.insert(
            "2".into(),
            record("k__K; g__G; s__A", &["S1_4", "S1_5", "S2_3", "S2_4", "S2_5"]),
        );
        otus.insert("B".into(), record("k__K; g__G; s__B", &["S1_6"]));
        otus
    }

    fn species(sample_pct: f64, seq_pct: f64) -> PruneParams {
        PruneParams {
            rank: TaxonomicRank::Species,
            sample_pct,
            seq_pct,
        }
    }

    fn assert_partition(otus: &OtuRecords, report: &PruneReport) {
        assert_eq!(report.kept.len() + report.removed.len(), otus.len());
        for removed in &report.removed {
            assert!(!report.kept.contains_key(&removed.otu_id));
        }
    }

    #[test]
    fn test_low_abundance_species_removed() {
        let otus = scenario();
        let report = prune_otus(&otus, &species(0.5, 0.1)).unwrap();

        assert_partition(&otus, &report);
        assert_eq!(report.kept.keys().collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(report.removed.len(), 1);
        let b = &report.removed[0];
        assert_eq!(b.otu_id, "B");
        assert_eq!(b.sample_fraction, None);
        assert_relative_eq!(b.seq_fraction.unwrap(), 1.0 / 11.0);
        assert_eq!(b.seq_ids, seqs(&["S1_6"]));
    }

    #[test]
    fn test_rescue_pass_keeps_abundant_rare_group() {
        let mut otus = scenario();
        // Species C lives in one of three samples but holds many sequences.
        otus.insert(
            "C".into(),
            record("k__K; g__G; s__C", &["S3_1", "S3_2", "S3_3", "S3_4", "S3_5", "S3_6"]),
        );
        let report = prune_otus(&otus, &species(0.5, 0.1)).unwrap();

        assert_partition(&otus, &report);
        assert!(report.kept.contains_key("C"));
        let removed: Vec<_> = report.removed.iter().map(|r| r.otu_id.as_str()).collect();
        assert_eq!(removed, vec!["B"]);
    }

    #[test]
    fn test_rescue_failure_carries_both_fractions() {
        let otus = scenario();
        let report = prune_otus(&otus, &species(0.75, 0.1)).unwrap();

        assert_partition(&otus, &report);
        let b = &report.removed[0];
        assert_eq!(b.otu_id, "B");
        assert_relative_eq!(b.sample_fraction.unwrap(), 0.5);
        assert_relative_eq!(b.seq_fraction.unwrap(), 1.0 / 11.0);
    }

    #[test]
    fn test_coarser_rank_pools_species() {
        let otus = scenario();
        let params = PruneParams {
            rank: TaxonomicRank::Genus,
            sample_pct: 0.5,
            seq_pct: 0.1,
        };
        let report = prune_otus(&otus, &params).unwrap();
        assert_eq!(report.kept.len(), 3);
        assert!(report.removed.is_empty());
        assert_eq!(report.summary.total_groups(), 1);
    }

    #[test]
    fn test_summary_counts() {
        let otus = scenario();
        let report = prune_otus(&otus, &species(0.5, 0.1)).unwrap();
        let summary = &report.summary;

        assert_eq!(summary.total_samples, 2);
        assert_eq!(summary.total_seqs, 11);
        assert_eq!(summary.input_otus, 3);
        assert_eq!(summary.kept_otus, 2);
        assert_eq!(summary.removed_otus, 1);
        assert_eq!(summary.kept_seqs, 10);
        assert_eq!(summary.removed_seqs, 1);
        assert_eq!(summary.kept_groups(), 1);
        assert_eq!(summary.removed_groups(), 1);
        assert_eq!(summary.groups[0].taxon, "k__K; g__G; s__A");
        assert_eq!(summary.groups[0].otus, 2);
        assert_eq!(summary.groups[0].samples, 2);
        assert_eq!(summary.groups[1].seqs, 1);
        assert!(!summary.groups[1].kept);
        assert_relative_eq!(PruneSummary::percent(10, 11), 90.909090909, epsilon = 1e-6);
    }

    #[test]
    fn test_filter_stages_directly() {
        let otus = scenario();
        let (above, below) = filter_by_sample_pct(&otus, 2, 0.75, TaxonomicRank::Species).unwrap();
        assert_eq!(above.len(), 2);
        assert_relative_eq!(below["B"].sample_fraction.unwrap(), 0.5);

        let (above, below) =
            filter_by_sequence_pct(&otus, 11, 0.5, TaxonomicRank::Species).unwrap();
        assert_eq!(above.len(), 2);
        assert_relative_eq!(below["B"].seq_fraction.unwrap(), 1.0 / 11.0);
    }

    #[test]
    fn test_empty_input_is_fatal() {
        let err = prune_otus(&OtuRecords::new(), &PruneParams::default()).unwrap_err();
        assert!(matches!(err, PruneError::EmptyInput { samples: 0, seqs: 0 }));

        let mut otus = OtuRecords::new();
        otus.insert("x".into(), record("k__K; s__x", &[]));
        assert!(matches!(
            prune_otus(&otus, &PruneParams::default()),
            Err(PruneError::EmptyInput { .. })
        ));
    }

    #[test]
    fn test_missing_rank_in_lineage() {
        let mut otus = OtuRecords::new();
        otus.insert("x".into(), record("k__K; p__P", &["S1_1"]));
        let err = prune_otus(&otus, &PruneParams::default()).unwrap_err();
        assert!(matches!(err, PruneError::Taxonomy(TaxonomyError::RankNotFound { rank: 'g', .. })));
    }

    #[test]
    fn test_params_json_and_rank_fallback() {
        let params: PruneParams =
            serde_json::from_str(r#"{"rank": "f", "seq_pct": 0.01}"#).unwrap();
        assert_eq!(params.rank, TaxonomicRank::Family);
        assert_eq!(params.sample_pct, 0.05);
        assert_eq!(params.seq_pct, 0.01);

        let params: PruneParams = serde_json::from_str(r#"{"rank": "z"}"#).unwrap();
        assert_eq!(params.rank, TaxonomicRank::Species);

        let json = serde_json::to_string(&PruneParams::default()).unwrap();
        assert!(json.contains(r#""rank":"g""#));
    }

    #[test]
    fn test_assign_taxonomy() {
        let mut map = OtuMap::new();
        map.insert("1".into(), seqs(&["S1_1"]));
        let mut taxa = IndexMap::new();
        taxa.insert("1".to_string(), "k__K; s__A".to_string());
        let records = assign_taxonomy(&map, &taxa).unwrap();
        assert_eq!(records["1"].taxonomy, "k__K; s__A");

        map.insert("2".into(), seqs(&["S1_2"]));
        assert!(matches!(
            assign_taxonomy(&map, &taxa),
            Err(PruneError::MissingTaxonomy(id)) if id == "2"
        ));
    }

    #[test]
    fn test_filter_otu_map_by_samples() {
        let mut map = OtuMap::new();
        map.insert("1".into(), seqs(&["S1_1", "S2_1", "S_x_3"]));
        map.insert("2".into(), seqs(&["S2_2"]));
        let keep: HashSet<String> = ["S1".to_string(), "S_x".to_string()].into_iter().collect();
        let filtered = filter_otu_map_by_samples(&map, &keep);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered["1"], seqs(&["S1_1", "S_x_3"]));
    }
}
