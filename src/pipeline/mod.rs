pub mod prune;
pub mod report;

pub use prune::{assign_taxonomy, filter_otu_map_by_samples, prune_otus, PruneParams};
pub use report::format_summary;
