//! Relative abundance and variance-stabilizing transforms.
//!
//! Raw counts are turned into per-sample fractions, which can then be
//! transformed and averaged across a sample set (mean relative abundance,
//! MRA). A sample whose total count is zero gets all-zero fractions.

use crate::otu_table::OtuTable;
use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;

/// Sample ID → (OTU ID → value).
pub type RelAbundance = IndexMap<String, IndexMap<String, f64>>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AbundanceError {
    #[error("value {value} for OTU '{otu}' in sample '{sample}' lies outside [0, 1]")]
    Domain {
        sample: String,
        otu: String,
        value: f64,
    },

    #[error("unsupported transform '{0}' (expected arcsin_sqrt or log10)")]
    UnknownTransform(String),
}

/// Transform applied to relative abundances before averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transform {
    /// `asin(sqrt(p))`
    ArcsinSqrt,
    /// `log10(p)`, with the non-finite result for zero mapped to zero.
    Log10,
}

impl Transform {
    pub fn apply(&self, rel_abd: &RelAbundance) -> Result<RelAbundance, AbundanceError> {
        match self {
            Transform::ArcsinSqrt => arcsine_sqrt_transform(rel_abd),
            Transform::Log10 => Ok(map_values(rel_abd, |p| {
                let v = p.log10();
                if v.is_finite() {
                    v
                } else {
                    0.0
                }
            })),
        }
    }
}

impl FromStr for Transform {
    type Err = AbundanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arcsin_sqrt" | "arcsine_sqrt" => Ok(Transform::ArcsinSqrt),
            "log10" => Ok(Transform::Log10),
            _ => Err(AbundanceError::UnknownTransform(s.to_string())),
        }
    }
}

fn map_values<F: Fn(f64) -> f64>(rel_abd: &RelAbundance, f: F) -> RelAbundance {
    rel_abd
        .iter()
        .map(|(sid, otus)| {
            let values = otus.iter().map(|(oid, &p)| (oid.clone(), f(p))).collect();
            (sid.clone(), values)
        })
        .collect()
}

/// Table samples restricted to `sample_ids` (when given), in table order.
fn selected_samples<'a, T: OtuTable + ?Sized>(
    table: &'a T,
    sample_ids: Option<&[String]>,
) -> Vec<&'a str> {
    match sample_ids {
        None => table.sample_ids().iter().map(String::as_str).collect(),
        Some(ids) => {
            let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
            if let Some(missing) = ids.iter().find(|id| !table.sample_ids().contains(id)) {
                warn!("Sample '{}' is not present in the OTU table; ignoring it.", missing);
            }
            table
                .sample_ids()
                .iter()
                .map(String::as_str)
                .filter(|sid| wanted.contains(sid))
                .collect()
        }
    }
}

/// Calculates the relative abundance of every OTU in each sample.
///
/// # Arguments
///
/// * `table` - The OTU table.
/// * `sample_ids` - Restrict to these samples; all samples when `None`.
///
/// # Returns
///
/// Sample ID → (OTU ID → count / sample total). A sample with a zero total
/// maps every OTU to `0.0`.
pub fn relative_abundance<T: OtuTable + ?Sized>(
    table: &T,
    sample_ids: Option<&[String]>,
) -> RelAbundance {
    selected_samples(table, sample_ids)
        .into_iter()
        .map(|sid| {
            let counts: Vec<f64> = table
                .otu_ids()
                .iter()
                .map(|oid| table.count(oid, sid))
                .collect();
            let total: f64 = counts.iter().sum();
            if total <= 0.0 {
                warn!("Sample '{}' has a total count of zero.", sid);
            }
            let fractions = table
                .otu_ids()
                .iter()
                .zip(counts)
                .map(|(oid, count)| {
                    let fraction = if total > 0.0 { count / total } else { 0.0 };
                    (oid.clone(), fraction)
                })
                .collect();
            (sid.to_string(), fractions)
        })
        .collect()
}

/// Calculates the mean percent abundance of each OTU across the samples of
/// `rel_abd`.
///
/// The mean is taken over every sample in `rel_abd`; an OTU with no entry for
/// a sample contributes zero for that sample.
pub fn mean_otu_pct_abundance(rel_abd: &RelAbundance, otu_ids: &[String]) -> IndexMap<String, f64> {
    otu_ids
        .iter()
        .map(|oid| {
            let mean = if rel_abd.is_empty() {
                0.0
            } else {
                rel_abd
                    .values()
                    .map(|otus| otus.get(oid).copied().unwrap_or(0.0))
                    .collect::<Vec<f64>>()
                    .mean()
            };
            (oid.clone(), mean * 100.0)
        })
        .collect()
}

/// Mean relative abundance (percent) of every OTU in the table over
/// `sample_ids`, optionally transforming the relative abundances first.
pub fn mra<T: OtuTable + ?Sized>(
    table: &T,
    sample_ids: Option<&[String]>,
    transform: Option<Transform>,
) -> Result<IndexMap<String, f64>, AbundanceError> {
    let rel_abd = relative_abundance(table, sample_ids);
    let rel_abd = match transform {
        Some(t) => t.apply(&rel_abd)?,
        None => rel_abd,
    };
    Ok(mean_otu_pct_abundance(&rel_abd, table.otu_ids()))
}

/// Total raw counts per sample (`by_sample`) or per OTU, over `sample_ids`.
pub fn raw_abundance<T: OtuTable + ?Sized>(
    table: &T,
    sample_ids: Option<&[String]>,
    by_sample: bool,
) -> IndexMap<String, f64> {
    let samples = selected_samples(table, sample_ids);
    if by_sample {
        samples
            .iter()
            .map(|sid| {
                let total = table.otu_ids().iter().map(|oid| table.count(oid, sid)).sum();
                (sid.to_string(), total)
            })
            .collect()
    } else {
        table
            .otu_ids()
            .iter()
            .map(|oid| {
                let total = samples.iter().map(|sid| table.count(oid, sid)).sum();
                (oid.clone(), total)
            })
            .collect()
    }
}

/// [`raw_abundance`] with `f` applied to every total (commonly `f64::log10`).
pub fn transform_raw_abundance<T, F>(
    table: &T,
    f: F,
    sample_ids: Option<&[String]>,
    by_sample: bool,
) -> IndexMap<String, f64>
where
    T: OtuTable + ?Sized,
    F: Fn(f64) -> f64,
{
    raw_abundance(table, sample_ids, by_sample)
        .into_iter()
        .map(|(id, total)| (id, f(total)))
        .collect()
}

/// Applies `asin(sqrt(p))` to every fraction.
///
/// Fails with [`AbundanceError::Domain`] if any value lies outside `[0, 1]`.
pub fn arcsine_sqrt_transform(rel_abd: &RelAbundance) -> Result<RelAbundance, AbundanceError> {
    for (sid, otus) in rel_abd {
        if let Some((oid, &value)) = otus.iter().find(|(_, p)| !(0.0..=1.0).contains(*p)) {
            return Err(AbundanceError::Domain {
                sample: sid.clone(),
                otu: oid.clone(),
                value,
            });
        }
    }
    Ok(map_values(rel_abd, |p| p.sqrt().asin()))
}

/// Shannon diversity index of each sample, `H = -sum(p * ln p)` over the
/// sample's relative abundances. Zero abundances contribute nothing, so a
/// sample with no counts has `H = 0`.
pub fn shannon_diversity(rel_abd: &RelAbundance) -> IndexMap<String, f64> {
    rel_abd
        .iter()
        .map(|(sid, otus)| {
            let h: f64 = otus
                .values()
                .filter(|&&p| p > 0.0)
                .map(|&p| -p * p.ln())
                .sum();
            (sid.clone(), h)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otu_table::tests::{dense_table, sparse_table};
    use crate::otu_table::CountTable;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_relative_abundance_sums_to_one() {
        let rel = relative_abundance(&dense_table(), None);
        assert_eq!(rel.len(), 3);
        for sid in ["S1", "S2"] {
            let total: f64 = rel[sid].values().sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        }
        assert_relative_eq!(rel["S1"]["otu2"], 0.3);
        assert_relative_eq!(rel["S2"]["otu3"], 0.75);
    }

    #[test]
    fn test_relative_abundance_zero_total_sample() {
        let rel = relative_abundance(&dense_table(), None);
        assert_eq!(rel["S3"].len(), 3);
        assert!(rel["S3"].values().all(|&p| p == 0.0));
    }

    #[test]
    fn test_relative_abundance_subset() {
        let rel = relative_abundance(&sparse_table(), Some(&ids(&["S2", "nope"])));
        assert_eq!(rel.keys().collect::<Vec<_>>(), vec!["S2"]);
        assert_relative_eq!(rel["S2"]["otu1"], 0.25);
    }

    #[test]
    fn test_mean_divides_by_all_samples() {
        let mut rel = RelAbundance::new();
        rel.insert("S1".into(), [("a".to_string(), 0.5)].into_iter().collect());
        rel.insert("S2".into(), IndexMap::new());
        let means = mean_otu_pct_abundance(&rel, &ids(&["a", "b"]));
        assert_relative_eq!(means["a"], 25.0);
        assert_eq!(means["b"], 0.0);

        let empty = mean_otu_pct_abundance(&RelAbundance::new(), &ids(&["a"]));
        assert_eq!(empty["a"], 0.0);
    }

    #[test]
    fn test_mra_dense_and_sparse_agree() {
        let samples = ids(&["S1", "S2"]);
        let dense = mra(&dense_table(), Some(&samples), None).unwrap();
        let sparse = mra(&sparse_table(), Some(&samples), None).unwrap();
        // otu1: (0.1 + 0.25) / 2
        assert_relative_eq!(dense["otu1"], 17.5, epsilon = 1e-9);
        for (oid, value) in &dense {
            assert_relative_eq!(*value, sparse[oid], epsilon = 1e-12);
        }
        let total: f64 = dense.values().sum();
        assert_relative_eq!(total, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mra_with_transform() {
        let samples = ids(&["S1"]);
        let result = mra(&dense_table(), Some(&samples), Some(Transform::ArcsinSqrt)).unwrap();
        assert_relative_eq!(result["otu1"], 0.1f64.sqrt().asin() * 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_raw_abundance() {
        let table = sparse_table();
        let by_sample = raw_abundance(&table, None, true);
        assert_eq!(by_sample["S1"], 100.0);
        assert_eq!(by_sample["S2"], 4.0);
        assert_eq!(by_sample["S3"], 0.0);

        let by_otu = raw_abundance(&table, Some(&ids(&["S2"])), false);
        assert_eq!(by_otu["otu1"], 1.0);
        assert_eq!(by_otu["otu2"], 0.0);
        assert_eq!(by_otu["otu3"], 3.0);

        let logged = transform_raw_abundance(&table, f64::log10, None, true);
        assert_relative_eq!(logged["S1"], 2.0);
    }

    #[test]
    fn test_arcsine_sqrt_inverse() {
        let rel = relative_abundance(&dense_table(), None);
        let transformed = arcsine_sqrt_transform(&rel).unwrap();
        for (sid, otus) in &rel {
            for (oid, &p) in otus {
                let back = transformed[sid][oid].sin().powi(2);
                assert_abs_diff_eq!(back, p, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_arcsine_sqrt_domain_error() {
        let mut rel = RelAbundance::new();
        rel.insert("S1".into(), [("a".to_string(), 1.5)].into_iter().collect());
        let err = arcsine_sqrt_transform(&rel).unwrap_err();
        assert_eq!(
            err,
            AbundanceError::Domain {
                sample: "S1".into(),
                otu: "a".into(),
                value: 1.5
            }
        );

        rel.insert("S1".into(), [("a".to_string(), f64::NAN)].into_iter().collect());
        assert!(arcsine_sqrt_transform(&rel).is_err());
    }

    #[test]
    fn test_transform_parsing_and_log10() {
        assert_eq!("arcsin_sqrt".parse::<Transform>().unwrap(), Transform::ArcsinSqrt);
        assert_eq!("LOG10".parse::<Transform>().unwrap(), Transform::Log10);
        assert!("ra".parse::<Transform>().is_err());

        let mut rel = RelAbundance::new();
        rel.insert(
            "S1".into(),
            [("a".to_string(), 0.01), ("b".to_string(), 0.0)]
                .into_iter()
                .collect(),
        );
        let logged = Transform::Log10.apply(&rel).unwrap();
        assert_relative_eq!(logged["S1"]["a"], -2.0);
        assert_eq!(logged["S1"]["b"], 0.0);
    }

    #[test]
    fn test_shannon_diversity_uniform_sample() {
        let table = CountTable::new(
            ndarray::arr2(&[[5.0, 0.0], [5.0, 0.0], [5.0, 0.0], [5.0, 0.0]]),
            ids(&["a", "b", "c", "d"]),
            ids(&["even", "empty"]),
        )
        .unwrap();
        let h = shannon_diversity(&relative_abundance(&table, None));

        assert_relative_eq!(h["even"], 4f64.ln(), epsilon = 1e-12);
        assert_eq!(h["empty"], 0.0);
    }

    #[test]
    fn test_shannon_diversity_skips_absent_otus() {
        let h = shannon_diversity(&relative_abundance(&dense_table(), None));
        let expected = -(0.1f64 * 0.1f64.ln() + 0.3 * 0.3f64.ln() + 0.6 * 0.6f64.ln());
        assert_relative_eq!(h["S1"], expected, epsilon = 1e-12);
        let expected = -(0.25f64 * 0.25f64.ln() + 0.75 * 0.75f64.ln());
        assert_relative_eq!(h["S2"], expected, epsilon = 1e-12);
        assert_eq!(h["S3"], 0.0);
    }
}
