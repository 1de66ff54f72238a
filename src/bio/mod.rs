//! Bioinformatics utilities module.
//!
//! Groups the taxonomy handling shared by the abundance, grouping and
//! pruning code.

pub mod taxonomy;

pub use taxonomy::{
    parse_lineage, resolve_name, truncate, Lineage, TaxonomicRank, TaxonomyError,
};
