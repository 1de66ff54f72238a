//! Taxonomic classification utilities.
//!
//! This module works with QIIME-style ranked lineages, where every rank is a
//! token of the form `<letter>__<name>` (e.g. `g__Streptococcus`), and turns
//! them into short display names or truncates them to a chosen rank.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Placeholder species suffix used when a lineage stops at genus.
pub const SPECIES_PLACEHOLDER: &str = "spp.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaxonomyError {
    #[error("empty lineage: no rank carries a name")]
    EmptyLineage,

    #[error("rank '{rank}' not present in lineage '{lineage}'")]
    RankNotFound { rank: char, lineage: String },

    #[error("unknown taxonomic rank '{0}' (expected one of k, p, c, o, f, g, s)")]
    UnknownRank(String),
}

/// Taxonomic classification levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaxonomicRank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl TaxonomicRank {
    /// Returns a string representation of the taxonomic level.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonomicRank::Kingdom => "kingdom",
            TaxonomicRank::Phylum => "phylum",
            TaxonomicRank::Class => "class",
            TaxonomicRank::Order => "order",
            TaxonomicRank::Family => "family",
            TaxonomicRank::Genus => "genus",
            TaxonomicRank::Species => "species",
        }
    }

    /// Plural form, used in summary reports ("12 genera were kept").
    pub fn plural(&self) -> &'static str {
        match self {
            TaxonomicRank::Kingdom => "kingdoms",
            TaxonomicRank::Phylum => "phyla",
            TaxonomicRank::Class => "classes",
            TaxonomicRank::Order => "orders",
            TaxonomicRank::Family => "families",
            TaxonomicRank::Genus => "genera",
            TaxonomicRank::Species => "species",
        }
    }

    /// The one-letter prefix used in QIIME lineage tokens.
    pub fn letter(&self) -> char {
        match self {
            TaxonomicRank::Kingdom => 'k',
            TaxonomicRank::Phylum => 'p',
            TaxonomicRank::Class => 'c',
            TaxonomicRank::Order => 'o',
            TaxonomicRank::Family => 'f',
            TaxonomicRank::Genus => 'g',
            TaxonomicRank::Species => 's',
        }
    }

    /// Returns all taxonomic levels in hierarchical order.
    pub fn all_levels() -> [TaxonomicRank; 7] {
        [
            TaxonomicRank::Kingdom,
            TaxonomicRank::Phylum,
            TaxonomicRank::Class,
            TaxonomicRank::Order,
            TaxonomicRank::Family,
            TaxonomicRank::Genus,
            TaxonomicRank::Species,
        ]
    }

    pub fn from_letter(letter: char) -> Option<TaxonomicRank> {
        Self::all_levels()
            .into_iter()
            .find(|rank| rank.letter() == letter.to_ascii_lowercase())
    }

    /// Like [`from_letter`](Self::from_letter), but an unrecognized letter
    /// falls back to species instead of failing.
    pub fn from_letter_or_species(letter: char) -> TaxonomicRank {
        Self::from_letter(letter).unwrap_or_else(|| {
            log::warn!(
                "Unknown taxonomic rank '{}', falling back to species.",
                letter
            );
            TaxonomicRank::Species
        })
    }
}

impl fmt::Display for TaxonomicRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for TaxonomicRank {
    type Err = TaxonomyError;

    /// Accepts either the one-letter code or the full rank name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        if let (Some(letter), None) = (chars.next(), chars.next()) {
            return Self::from_letter(letter).ok_or_else(|| TaxonomyError::UnknownRank(s.into()));
        }
        Self::all_levels()
            .into_iter()
            .find(|rank| rank.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TaxonomyError::UnknownRank(s.into()))
    }
}

/// Represents a ranked lineage, ordered from kingdom toward species.
///
/// Tokens are stored exactly as read (`"g__Neisseria"`, `"s__"`); a rank is
/// empty when its token carries no name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lineage {
    ranks: Vec<String>,
}

impl Lineage {
    /// Builds a lineage from anything yielding rank tokens, e.g. the
    /// `taxonomy` metadata list of a BIOM row.
    pub fn from_ranks<I, S>(ranks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Lineage {
            ranks: ranks.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ranks(&self) -> &[String] {
        &self.ranks
    }

    /// Gets the taxon name at a specific rank, if the lineage names it.
    pub fn get_level(&self, rank: TaxonomicRank) -> Option<&str> {
        self.ranks
            .iter()
            .find(|token| token_letter(token) == Some(rank.letter()) && !is_empty_rank(token))
            .map(|token| rank_name(token))
    }

    /// Returns the most specific rank with a defined name.
    pub fn most_specific_level(&self) -> Option<TaxonomicRank> {
        TaxonomicRank::all_levels()
            .into_iter()
            .rev()
            .find(|rank| self.get_level(*rank).is_some())
    }
}

impl fmt::Display for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ranks.join("; "))
    }
}

/// A rank token is empty when nothing follows its `x__` prefix.
pub fn is_empty_rank(token: &str) -> bool {
    token.trim().len() <= 3
}

/// The rank letter of an `x__name` token; `None` for unprefixed tokens such
/// as `Unassigned`.
fn token_letter(token: &str) -> Option<char> {
    let token = token.trim();
    match token.get(1..3) {
        Some("__") => token.chars().next().map(|c| c.to_ascii_lowercase()),
        _ => None,
    }
}

/// The name part of a rank token. An unprefixed token is its own name.
fn rank_name(token: &str) -> &str {
    let token = token.trim();
    match token_letter(token) {
        Some(_) => &token[3..],
        None => token,
    }
}

/// Determines a short `Genus_species` style identifier for a lineage.
///
/// Walking from the most specific rank back toward kingdom, empty ranks are
/// skipped. A species name is remembered and the walk continues; the first
/// named genus yields `Genus_species` (or `Genus_spp.`), and any other named
/// rank yields `Unclassified_<name>`.
pub fn resolve_name(lineage: &Lineage) -> Result<String, TaxonomyError> {
    let mut species = SPECIES_PLACEHOLDER;

    for token in lineage.ranks().iter().rev() {
        if is_empty_rank(token) {
            continue;
        }
        let name = rank_name(token);
        match token_letter(token) {
            Some('s') => species = name,
            Some('g') => return Ok(format!("{}_{}", name, species)),
            _ => return Ok(format!("Unclassified_{}", name)),
        }
    }

    Err(TaxonomyError::EmptyLineage)
}

/// Truncates a `;`-joined lineage string after the token of `rank`.
///
/// `truncate("k__Bacteria; p__Firmicutes; c__Bacilli", Phylum)` gives
/// `"k__Bacteria; p__Firmicutes"`.
pub fn truncate(lineage: &str, rank: TaxonomicRank) -> Result<String, TaxonomyError> {
    let marker = format!("{}__", rank.letter());

    // The marker must open a token, not sit inside another rank's name.
    let start = lineage
        .match_indices(&marker)
        .map(|(idx, _)| idx)
        .find(|&idx| {
            lineage[..idx]
                .chars()
                .next_back()
                .map_or(true, |c| c == ';' || c.is_whitespace())
        })
        .ok_or_else(|| TaxonomyError::RankNotFound {
            rank: rank.letter(),
            lineage: lineage.to_string(),
        })?;

    let name_start = start + marker.len();
    let end = lineage[name_start..]
        .find(';')
        .map_or(lineage.len(), |offset| name_start + offset);

    Ok(lineage[..end].to_string())
}

/// Parses a lineage from a string like `"k__Bacteria; p__Firmicutes; ..."`.
pub fn parse_lineage(lineage_str: &str) -> Lineage {
    Lineage::from_ranks(
        lineage_str
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lineage(tokens: &[&str]) -> Lineage {
        Lineage::from_ranks(tokens.iter().copied())
    }

    const FULL: &str = "k__Bacteria; p__Firmicutes; c__Bacilli; o__Lactobacillales; \
                        f__Streptococcaceae; g__Streptococcus; s__mitis";

    #[test]
    fn test_rank_letters_round_trip() {
        for rank in TaxonomicRank::all_levels() {
            assert_eq!(TaxonomicRank::from_letter(rank.letter()), Some(rank));
        }
        assert_eq!(TaxonomicRank::from_letter('x'), None);
        assert_eq!(TaxonomicRank::from_letter_or_species('x'), TaxonomicRank::Species);
        assert_eq!("G".parse::<TaxonomicRank>().unwrap(), TaxonomicRank::Genus);
        assert_eq!("family".parse::<TaxonomicRank>().unwrap(), TaxonomicRank::Family);
        assert!("strain".parse::<TaxonomicRank>().is_err());
    }

    #[test]
    fn test_resolve_genus_species() {
        let lin = parse_lineage(FULL);
        assert_eq!(resolve_name(&lin).unwrap(), "Streptococcus_mitis");
    }

    #[test]
    fn test_resolve_genus_only() {
        let lin = lineage(&["k__Bacteria", "p__Firmicutes", "g__Streptococcus", "s__"]);
        assert_eq!(resolve_name(&lin).unwrap(), "Streptococcus_spp.");
    }

    #[test]
    fn test_resolve_unclassified() {
        let lin = lineage(&[
            "k__Bacteria",
            "p__Firmicutes",
            "c__Bacilli",
            "o__",
            "f__",
            "g__",
            "s__",
        ]);
        assert_eq!(resolve_name(&lin).unwrap(), "Unclassified_Bacilli");

        // A species name does not rescue a lineage with no genus.
        let lin = lineage(&["k__Bacteria", "f__Neisseriaceae", "g__", "s__HOT.018"]);
        assert_eq!(resolve_name(&lin).unwrap(), "Unclassified_Neisseriaceae");
    }

    #[test]
    fn test_resolve_keeps_underscores_in_names() {
        let lin = lineage(&["f__Lachnospiraceae_[XIVa]", "g__Eubacterium_[XI]", "s__"]);
        assert_eq!(resolve_name(&lin).unwrap(), "Eubacterium_[XI]_spp.");
    }

    #[test]
    fn test_resolve_unprefixed_token() {
        let lin = parse_lineage("Unassigned");
        assert_eq!(resolve_name(&lin).unwrap(), "Unclassified_Unassigned");

        // An unprefixed name is never mistaken for a species token.
        let lin = lineage(&["k__Bacteria", "g__Neisseria", "subflava"]);
        assert_eq!(resolve_name(&lin).unwrap(), "Unclassified_subflava");
        assert_eq!(lin.get_level(TaxonomicRank::Species), None);
    }

    #[test]
    fn test_resolve_empty_lineage() {
        let lin = lineage(&["k__", "p__", "s__"]);
        assert_eq!(resolve_name(&lin), Err(TaxonomyError::EmptyLineage));
        assert_eq!(resolve_name(&Lineage::default()), Err(TaxonomyError::EmptyLineage));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(
            truncate(FULL, TaxonomicRank::Class).unwrap(),
            "k__Bacteria; p__Firmicutes; c__Bacilli"
        );
        assert_eq!(truncate(FULL, TaxonomicRank::Species).unwrap(), FULL);
        assert_eq!(truncate(FULL, TaxonomicRank::Kingdom).unwrap(), "k__Bacteria");
    }

    #[test]
    fn test_truncate_missing_rank() {
        let err = truncate("k__Bacteria; p__Firmicutes", TaxonomicRank::Genus).unwrap_err();
        assert!(matches!(err, TaxonomyError::RankNotFound { rank: 'g', .. }));
    }

    #[test]
    fn test_truncate_ignores_marker_inside_name() {
        let lin = "k__Bacteria; p__Xs__odd; s__real";
        assert_eq!(truncate(lin, TaxonomicRank::Species).unwrap(), lin);
        assert_eq!(truncate(lin, TaxonomicRank::Phylum).unwrap(), "k__Bacteria; p__Xs__odd");
    }

    #[test]
    fn test_parse_lineage_levels() {
        let lin = parse_lineage(FULL);
        assert_eq!(lin.ranks().len(), 7);
        assert_eq!(lin.get_level(TaxonomicRank::Genus), Some("Streptococcus"));
        assert_eq!(lin.most_specific_level(), Some(TaxonomicRank::Species));
        assert_eq!(lin.to_string(), FULL.split(';').map(str::trim).collect::<Vec<_>>().join("; "));

        let partial = parse_lineage("k__Bacteria; p__Firmicutes; c__; ");
        assert_eq!(partial.ranks().len(), 3);
        assert_eq!(partial.most_specific_level(), Some(TaxonomicRank::Phylum));
    }
}
