//! Sample grouping driven by mapping-file columns.
//!
//! Specifiers are either a bare column name (group by that column's values)
//! or `Column=Value` (keep only samples whose `Column` equals one of the
//! listed values). Conditions on one column are OR-ed, conditions on
//! different columns are AND-ed.

use crate::bio::resolve_name;
use crate::metadata::SampleMetadataTable;
use crate::normalization::{mra, AbundanceError, Transform};
use crate::otu_table::OtuTable;
use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Name of the single category returned when no usable specifier is given.
pub const DEFAULT_CATEGORY: &str = "default";

/// ColorBrewer Set3 (12 classes), cycled when no color column is given.
pub const DEFAULT_PALETTE: [&str; 12] = [
    "#8DD3C7", "#FFFFB3", "#BEBADA", "#FB8072", "#80B1D3", "#FDB462", "#B3DE69", "#FCCDE5",
    "#D9D9D9", "#BC80BD", "#CCEBC5", "#FFED6F",
];

/// A group of samples plus caller-computed per-group results (e.g. the mean
/// relative abundance of each OTU within the group).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub sids: BTreeSet<String>,
    pub results: IndexMap<String, f64>,
}

impl Category {
    fn with_samples<I: IntoIterator<Item = String>>(sids: I) -> Self {
        Category {
            sids: sids.into_iter().collect(),
            results: IndexMap::new(),
        }
    }

    pub fn sample_ids(&self) -> Vec<String> {
        self.sids.iter().cloned().collect()
    }
}

enum Specifier<'a> {
    Column(&'a str),
    Condition { column: &'a str, value: &'a str },
}

impl<'a> Specifier<'a> {
    fn parse(spec: &'a str) -> Self {
        match spec.split_once('=') {
            Some((column, value)) => Specifier::Condition { column, value },
            None => Specifier::Column(spec),
        }
    }
}

fn default_categories(metadata: &SampleMetadataTable) -> IndexMap<String, Category> {
    let all = Category::with_samples(metadata.sample_ids().map(str::to_string));
    IndexMap::from([(DEFAULT_CATEGORY.to_string(), all)])
}

fn join_key(row: &[String], indices: impl IntoIterator<Item = usize>) -> String {
    indices.into_iter().map(|idx| row[idx].as_str()).join("_")
}

/// Partitions samples into named categories.
///
/// # Arguments
///
/// * `metadata` - Mapping-file table (its header resolves column names).
/// * `specifiers` - Column names and/or `Column=Value` conditions.
///
/// # Returns
///
/// Categories sorted by name. With only group-by columns the name joins the
/// sample's values in those columns with `_`. When conditions are present the
/// name joins the values of every group-by *and* condition column in header
/// order, so a condition column's matched value is part of the name.
/// Without usable specifiers, or when no sample qualifies, a single
/// `default` category holds every sample.
pub fn gather_categories<S: AsRef<str>>(
    metadata: &SampleMetadataTable,
    specifiers: &[S],
) -> IndexMap<String, Category> {
    if specifiers.is_empty() {
        return default_categories(metadata);
    }

    let mut group_cols = Vec::new();
    let mut conditions: BTreeMap<usize, HashSet<&str>> = BTreeMap::new();
    for spec in specifiers {
        match Specifier::parse(spec.as_ref()) {
            Specifier::Column(name) => match metadata.column_index(name) {
                Some(idx) => group_cols.push(idx),
                None => debug!("Ignoring unknown column '{}'", name),
            },
            Specifier::Condition { column, value } => match metadata.column_index(column) {
                Some(idx) => {
                    conditions.entry(idx).or_default().insert(value);
                }
                None => debug!("Ignoring condition on unknown column '{}'", column),
            },
        }
    }

    if group_cols.is_empty() && conditions.is_empty() {
        warn!(
            "None of the categories {:?} match the mapping header; using all samples.",
            specifiers.iter().map(|s| s.as_ref()).collect::<Vec<&str>>()
        );
        return default_categories(metadata);
    }

    let mut table: BTreeMap<String, Category> = BTreeMap::new();
    if conditions.is_empty() {
        for (sid, row) in metadata.rows() {
            let key = join_key(row, group_cols.iter().copied());
            table.entry(key).or_default().sids.insert(sid.clone());
        }
    } else {
        let key_cols: BTreeSet<usize> = group_cols
            .iter()
            .copied()
            .chain(conditions.keys().copied())
            .collect();
        for (sid, row) in metadata.rows() {
            let qualifies = conditions
                .iter()
                .all(|(&idx, accepted)| accepted.contains(row[idx].as_str()));
            if qualifies {
                let key = join_key(row, key_cols.iter().copied());
                table.entry(key).or_default().sids.insert(sid.clone());
            }
        }
    }

    if table.is_empty() {
        warn!("No samples satisfy the given conditions; using all samples.");
        return default_categories(metadata);
    }

    debug!("Gathered {} categories", table.len());
    table.into_iter().collect()
}

/// Assigns a color to every group of `group_column`.
///
/// With a `color_column`, a group takes the color value of the first color
/// category sharing at least one sample with it. Otherwise colors cycle
/// through [`DEFAULT_PALETTE`] in group order.
pub fn color_mapping(
    metadata: &SampleMetadataTable,
    group_column: &str,
    color_column: Option<&str>,
) -> IndexMap<String, String> {
    let groups = gather_categories(metadata, &[group_column]);

    match color_column {
        Some(color_column) => {
            let colors = gather_categories(metadata, &[color_column]);
            groups
                .iter()
                .filter_map(|(name, group)| {
                    let color = colors
                        .iter()
                        .find(|(_, color)| !group.sids.is_disjoint(&color.sids))
                        .map(|(color, _)| color.clone());
                    if color.is_none() {
                        warn!("Group '{}' shares no samples with any color category", name);
                    }
                    color.map(|c| (name.clone(), c))
                })
                .collect()
        }
        None => groups
            .keys()
            .cloned()
            .zip(DEFAULT_PALETTE.iter().cycle().map(|c| c.to_string()))
            .collect(),
    }
}

/// Fills each category's results with the mean relative abundance (percent)
/// of every OTU over that category's samples.
///
/// Results are keyed by the OTU's resolved display name when it has a usable
/// lineage, else by OTU ID; OTUs sharing a name are summed.
pub fn category_mra<T: OtuTable + ?Sized>(
    table: &T,
    categories: &IndexMap<String, Category>,
    transform: Option<Transform>,
) -> Result<IndexMap<String, Category>, AbundanceError> {
    categories
        .iter()
        .map(|(name, category)| {
            let otu_means = mra(table, Some(category.sample_ids().as_slice()), transform)?;
            let mut results: IndexMap<String, f64> = IndexMap::new();
            for (oid, value) in otu_means {
                let label = table
                    .taxonomy(&oid)
                    .and_then(|lineage| resolve_name(lineage).ok())
                    .unwrap_or(oid);
                *results.entry(label).or_insert(0.0) += value;
            }
            let filled = Category {
                sids: category.sids.clone(),
                results,
            };
            Ok((name.clone(), filled))
        })
        .collect()
}
