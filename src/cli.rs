use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use log::{info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::bio::{parse_lineage, resolve_name, truncate, Lineage, TaxonomicRank};
use crate::category::{
    category_mra, color_mapping, gather_categories, Category, DEFAULT_CATEGORY,
};
use crate::io::ordination::parse_unifrac;
use crate::io::{read_otu_map, read_taxonomy_table, write_otu_map, write_removed_report};
use crate::metadata::load_mapping_file;
use crate::normalization::{relative_abundance, shannon_diversity, Transform};
use crate::otu_table::{CountTable, OtuTable, SparseOtuTable};
use crate::pipeline::{
    assign_taxonomy, filter_otu_map_by_samples, format_summary, prune_otus, PruneParams,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "OTU table analytics toolkit", long_about = None)]
pub struct Cli {
    /// Enable informational logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Remove OTUs whose taxonomic group is rare in samples and sequences
    Prune {
        /// OTU map (OTU ID followed by sequence IDs), optionally gzipped
        #[arg(short = 'i', long)]
        otu_map: PathBuf,

        /// Taxonomy assignments (OTU ID, lineage)
        #[arg(short, long)]
        taxonomy: PathBuf,

        /// Output path for the pruned OTU map
        #[arg(short, long)]
        output: PathBuf,

        /// Output path for the removed-OTU report
        #[arg(short, long)]
        removed: Option<PathBuf>,

        /// JSON parameter file; command-line thresholds override it
        #[arg(long)]
        params: Option<PathBuf>,

        /// Rank to pool OTUs at (k, p, c, o, f, g, s)
        #[arg(long, value_parser = parse_rank)]
        rank: Option<TaxonomicRank>,

        /// Minimum fraction of samples a group must occur in
        #[arg(long)]
        sample_pct: Option<f64>,

        /// Minimum fraction of all sequences a group must hold
        #[arg(long)]
        seq_pct: Option<f64>,

        /// Mapping file; only sequences from its samples are considered
        #[arg(short, long)]
        mapping: Option<PathBuf>,
    },

    /// Group samples by mapping-file columns or `column=value` conditions
    Categorize {
        /// Sample mapping file
        #[arg(short, long)]
        mapping: PathBuf,

        /// Column names and/or `column=value` conditions
        #[arg(short, long, num_args = 1..)]
        group_by: Vec<String>,
    },

    /// Assign a color to every group of a mapping-file column
    Colors {
        /// Sample mapping file
        #[arg(short, long)]
        mapping: PathBuf,

        /// Column whose values form the groups
        #[arg(short, long)]
        group_column: String,

        /// Column holding each group's color; the built-in palette is used otherwise
        #[arg(short, long)]
        color_column: Option<String>,
    },

    /// Mean relative abundance (percent) per OTU for each sample category
    Mra {
        /// OTU map (OTU ID followed by sequence IDs), optionally gzipped
        #[arg(short = 'i', long)]
        otu_map: PathBuf,

        /// Taxonomy assignments; results are keyed by taxon name when given
        #[arg(short, long)]
        taxonomy: Option<PathBuf>,

        /// Sample mapping file used to build categories
        #[arg(short, long)]
        mapping: Option<PathBuf>,

        /// Column names and/or `column=value` conditions
        #[arg(short, long, num_args = 1..)]
        group_by: Vec<String>,

        /// Transform applied to relative abundances (arcsin_sqrt, log10)
        #[arg(long)]
        transform: Option<Transform>,

        /// Hold counts in a dense matrix instead of a sparse one
        #[arg(long)]
        dense: bool,

        /// Output TSV path; written to stdout otherwise
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Shannon diversity index of every sample
    Diversity {
        /// OTU map (OTU ID followed by sequence IDs), optionally gzipped
        #[arg(short = 'i', long)]
        otu_map: PathBuf,
    },

    /// Summarize a PCoA/UniFrac ordination results file
    Ordination {
        /// Ordination file (legacy or current layout)
        #[arg(short, long)]
        input: PathBuf,

        /// Write the parsed result as JSON to this path
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Resolve a lineage to its display name, or truncate it to a rank
    Name {
        /// Lineage string, e.g. "k__Bacteria; g__Streptococcus; s__"
        lineage: String,

        /// Truncate to this rank instead of resolving the name
        #[arg(long, value_parser = parse_rank)]
        rank: Option<TaxonomicRank>,
    },
}

/// Accepts a rank letter or name; an unrecognized letter falls back to
/// species.
fn parse_rank(value: &str) -> Result<TaxonomicRank, String> {
    match value.parse() {
        Ok(rank) => Ok(rank),
        Err(_) if value.chars().count() == 1 => value
            .chars()
            .next()
            .map(TaxonomicRank::from_letter_or_species)
            .ok_or_else(|| format!("invalid rank '{}'", value)),
        Err(e) => Err(e.to_string()),
    }
}

pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Prune {
            otu_map,
            taxonomy,
            output,
            removed,
            params,
            rank,
            sample_pct,
            seq_pct,
            mapping,
        } => {
            let mut prune_params = match params {
                Some(path) => PruneParams::from_json_file(&path)
                    .with_context(|| format!("Failed to load parameters from {}", path.display()))?,
                None => PruneParams::default(),
            };
            if let Some(rank) = rank {
                prune_params.rank = rank;
            }
            if let Some(pct) = sample_pct {
                prune_params.sample_pct = pct;
            }
            if let Some(pct) = seq_pct {
                prune_params.seq_pct = pct;
            }
            info!("Pruning parameters: {:?}", prune_params);

            let mut otus = read_otu_map(&otu_map)
                .with_context(|| format!("Failed to read OTU map {}", otu_map.display()))?;
            if let Some(path) = mapping {
                let metadata = load_mapping_file(&path)
                    .with_context(|| format!("Failed to read mapping file {}", path.display()))?;
                let keep: HashSet<String> = metadata.sample_ids().map(str::to_string).collect();
                otus = filter_otu_map_by_samples(&otus, &keep);
                info!("{} OTUs remain after sample filtering", otus.len());
            }
            let taxa = read_taxonomy_table(&taxonomy)
                .with_context(|| format!("Failed to read taxonomy {}", taxonomy.display()))?;

            let records = assign_taxonomy(&otus, &taxa)?;
            let report = prune_otus(&records, &prune_params).context("Pruning failed")?;

            write_otu_map(
                &output,
                report
                    .kept
                    .iter()
                    .map(|(id, record)| (id.as_str(), record.seq_ids.as_slice())),
            )
            .with_context(|| format!("Failed to write {}", output.display()))?;
            info!("Pruned OTU map saved to: {}", output.display());

            if let Some(path) = removed {
                write_removed_report(&path, &report.removed)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Removed-OTU report saved to: {}", path.display());
            }

            println!("{}", format_summary(&report.summary));
            Ok(())
        }
        Commands::Categorize { mapping, group_by } => {
            let metadata = load_mapping_file(&mapping)
                .with_context(|| format!("Failed to read mapping file {}", mapping.display()))?;
            for (name, category) in gather_categories(&metadata, &group_by) {
                println!("{}\t{}", name, category.sids.iter().join(","));
            }
            Ok(())
        }
        Commands::Colors {
            mapping,
            group_column,
            color_column,
        } => {
            let metadata = load_mapping_file(&mapping)
                .with_context(|| format!("Failed to read mapping file {}", mapping.display()))?;
            for (group, color) in color_mapping(&metadata, &group_column, color_column.as_deref()) {
                println!("{}\t{}", group, color);
            }
            Ok(())
        }
        Commands::Mra {
            otu_map,
            taxonomy,
            mapping,
            group_by,
            transform,
            dense,
            output,
        } => {
            let otus = read_otu_map(&otu_map)
                .with_context(|| format!("Failed to read OTU map {}", otu_map.display()))?;
            let lineages: Vec<(String, Lineage)> = match taxonomy {
                Some(path) => read_taxonomy_table(&path)
                    .with_context(|| format!("Failed to read taxonomy {}", path.display()))?
                    .into_iter()
                    .map(|(id, lineage)| (id, parse_lineage(&lineage)))
                    .collect(),
                None => Vec::new(),
            };
            let categories = match mapping {
                Some(path) => {
                    let metadata = load_mapping_file(&path).with_context(|| {
                        format!("Failed to read mapping file {}", path.display())
                    })?;
                    Some(gather_categories(&metadata, &group_by))
                }
                None => {
                    if !group_by.is_empty() {
                        warn!("--group-by ignored without a mapping file");
                    }
                    None
                }
            };

            let rendered = if dense {
                let table = CountTable::from_otu_map(&otus).with_taxonomy(lineages);
                mra_by_category(&table, categories, transform)?
            } else {
                let table = SparseOtuTable::from_otu_map(&otus)?.with_taxonomy(lineages);
                info!("Sparse table holds {} non-zero cells", table.nnz());
                mra_by_category(&table, categories, transform)?
            };
            match output {
                Some(path) => {
                    fs::write(&path, rendered)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("MRA table saved to: {}", path.display());
                }
                None => print!("{}", rendered),
            }
            Ok(())
        }
        Commands::Diversity { otu_map } => {
            let otus = read_otu_map(&otu_map)
                .with_context(|| format!("Failed to read OTU map {}", otu_map.display()))?;
            let table = SparseOtuTable::from_otu_map(&otus)?;
            println!("SampleID\tShannon");
            for (sample_id, h) in shannon_diversity(&relative_abundance(&table, None)) {
                println!("{}\t{:.6}", sample_id, h);
            }
            Ok(())
        }
        Commands::Ordination { input, json } => {
            let result = parse_unifrac(&input)
                .with_context(|| format!("Failed to parse ordination {}", input.display()))?;
            println!("Format: {:?}", result.format);
            println!("Samples: {}", result.pcd.len());
            println!("Axes: {}", result.axis_count());
            let axes = result.eigvals.iter().zip(&result.varexp).enumerate();
            for (axis, (eig, var)) in axes.take(3) {
                println!("PC{}: eigenvalue {:.4}, {:.2}% explained", axis + 1, eig, var);
            }
            if let Some(path) = json {
                write_json(&path, &result)?;
            }
            Ok(())
        }
        Commands::Name { lineage, rank } => {
            let name = match rank {
                Some(rank) => truncate(&lineage, rank)?,
                None => resolve_name(&parse_lineage(&lineage))?,
            };
            println!("{}", name);
            Ok(())
        }
    }
}

/// Runs [`category_mra`] over `categories` (every sample in one `default`
/// category when absent) and renders the result.
fn mra_by_category<T: OtuTable>(
    table: &T,
    categories: Option<IndexMap<String, Category>>,
    transform: Option<Transform>,
) -> Result<String> {
    let categories = categories.unwrap_or_else(|| {
        let all = Category {
            sids: table.sample_ids().iter().cloned().collect(),
            results: IndexMap::new(),
        };
        IndexMap::from([(DEFAULT_CATEGORY.to_string(), all)])
    });
    let results = category_mra(table, &categories, transform)?;
    Ok(render_mra(&results))
}

/// One row per taxon (first-seen order across categories), one column per
/// category; taxa absent from a category are reported as 0.
fn render_mra(results: &IndexMap<String, Category>) -> String {
    let taxa: IndexSet<&String> = results.values().flat_map(|c| c.results.keys()).collect();
    let mut out = format!("Taxon\t{}\n", results.keys().join("\t"));
    for taxon in taxa {
        let values = results
            .values()
            .map(|c| format!("{:.6}", c.results.get(taxon).copied().unwrap_or(0.0)))
            .join("\t");
        out.push_str(&format!("{}\t{}\n", taxon, values));
    }
    out
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;
    info!("JSON saved to: {}", path.display());
    Ok(())
}
