//! MOG Enrichment Module
//!
//! Adds Microvirus Orthologous Group (MOG) assignments to the annotation
//! table. Definitions come from the headers of the annotated MOG protein
//! FASTA (`>MOG_ID MOG_NUMBER DESCRIPTION...`), assignments from the best
//! hit of each sequence in a sequences-vs-MOG search.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::annotate::AnnotationTable;
use crate::m8::M8Reader;

/// Number and description of a MOG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MogDefinition {
    pub number: String,
    pub text: String,
}

/// MOG ID → definition.
pub type MogDefinitions = FxHashMap<String, MogDefinition>;

/// Parses one definition header (with or without the leading '>').
///
/// Returns `None` for headers with fewer than two words.
pub fn parse_definition_header(header: &str) -> Option<(String, MogDefinition)> {
    let header = header.trim().trim_start_matches('>');
    let mut words = header.split_whitespace();
    let id = words.next()?;
    let number = words.next()?;
    let text = words.collect::<Vec<_>>().join(" ");
    Some((id.to_string(), MogDefinition { number: number.to_string(), text }))
}

/// Reads MOG definitions from the headers of a FASTA file.
pub fn load_definitions<P: AsRef<Path>>(path: P) -> Result<MogDefinitions> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open MOG definitions: {}", path.display()))?;

    let mut defs = MogDefinitions::default();
    let mut skipped = 0usize;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.starts_with('>') {
            continue;
        }
        match parse_definition_header(&line) {
            Some((id, def)) => {
                defs.insert(id, def);
            }
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!("Skipped {} MOG headers without a number", skipped);
    }
    Ok(defs)
}

/// Best MOG hit per sequence: the first hit seen for it.
pub fn load_best_hits<P: AsRef<Path>>(path: P) -> Result<FxHashMap<String, String>> {
    let mut best: FxHashMap<String, String> = FxHashMap::default();
    for record in M8Reader::open(path)? {
        let rec = record?;
        best.entry(rec.query).or_insert(rec.target);
    }
    Ok(best)
}

/// Writes MOG ID, number and text into matching annotation rows.
///
/// Returns the number of rows enriched; hits on sequences absent from the
/// table are ignored.
pub fn enrich(
    table: &mut AnnotationTable,
    defs: &MogDefinitions,
    best_hits: &FxHashMap<String, String>,
) -> usize {
    let mut enriched = 0;
    for (seq_id, mog_id) in best_hits {
        let Some(row) = table.get_mut(seq_id) else {
            continue;
        };
        let def = defs.get(mog_id);
        row.mog_id = Some(mog_id.clone());
        row.mog_number = def.map(|d| d.number.clone());
        row.mog_text = def.map(|d| d.text.clone()).filter(|t| !t.is_empty());
        enriched += 1;
    }
    enriched
}
