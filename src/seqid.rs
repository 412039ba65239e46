//! Sequence Identifier Module
//!
//! Protein and ORF identifiers carry their origin in the name:
//!
//! ```text
//! <genomeID>_<index>_<Suffix>
//! NC_001422_12_RefProdPosi
//! ```
//!
//! The suffix is a run of capitalised tokens: source (`Ref`, ...),
//! prediction tool (`Prod`, `Geto`) and strand (`Posi`, `Nega`).

use regex::Regex;
use std::sync::LazyLock;

static GENOME_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_[0-9]+_[A-Za-z]+$").expect("valid genome suffix regex"));

static SUFFIX_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z][a-z]+").expect("valid suffix token regex"));

/// Source tag used for reference annotations.
pub const REFERENCE_SOURCE: &str = "Ref";

/// Genome identifier of a sequence: the ID without its `_<index>_<Suffix>` tail.
pub fn genome_id(seq_id: &str) -> &str {
    match GENOME_SUFFIX.find(seq_id) {
        Some(m) => &seq_id[..m.start()],
        None => seq_id,
    }
}

/// Genome identifier used for ORF/protein linking: drops the last two `_` fields.
pub fn orf_genome_id(seq_id: &str) -> String {
    let fields: Vec<&str> = seq_id.split('_').collect();
    if fields.len() < 3 {
        return String::new();
    }
    fields[..fields.len() - 2].join("_")
}

/// Expands the abbreviations found in ID suffixes.
pub fn expand_abbreviation(abbr: &str) -> &str {
    match abbr {
        "Prod" => "Prodigal",
        "Geto" => "Getorf",
        "Posi" => "+",
        "Nega" => "-",
        other => other,
    }
}

/// Origin decoded from an ID suffix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeqOrigin {
    pub source: Option<String>,
    pub tool: Option<String>,
    pub strand: Option<String>,
}

/// Decodes source, prediction tool and strand from the last `_` field.
pub fn decode_suffix(seq_id: &str) -> SeqOrigin {
    let suffix = seq_id.rsplit('_').next().unwrap_or("");
    let tokens: Vec<&str> = SUFFIX_TOKEN.find_iter(suffix).map(|m| m.as_str()).collect();

    SeqOrigin {
        source: tokens.first().map(|s| s.to_string()),
        tool: tokens.get(1).map(|s| expand_abbreviation(s).to_string()),
        strand: tokens.get(2).map(|s| expand_abbreviation(s).to_string()),
    }
}

/// Makes an ID safe for use as a file name or column key.
pub fn sanitize_id(id: &str) -> String {
    id.replace(['/', '.'], "_")
}
