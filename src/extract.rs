//! Candidate Extraction Module
//!
//! Selects candidate non-coding / novel ORFs from the annotation table and
//! writes their sequences for embedding.

use anyhow::Result;
use rustc_hash::FxHashMap;
use std::path::Path;

use crate::annotate::{AnnotationRow, AnnotationTable};
use crate::seqio::{self, FastaRecord};

/// Row selection rules.
#[derive(Debug, Clone)]
pub struct SelectionCriteria {
    /// Minimum number of genomes in the sequence's cluster.
    pub min_relatives: usize,
    /// Drop ORFs already linked to a protein of the same genome.
    pub exclude_same_genome_protein: bool,
    /// Keep reference sequences even when their genome is not a representative.
    pub allow_reference: bool,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            min_relatives: 0,
            exclude_same_genome_protein: true,
            allow_reference: true,
        }
    }
}

impl SelectionCriteria {
    pub fn accepts(&self, row: &AnnotationRow) -> bool {
        if self.exclude_same_genome_protein && row.matched_prot_same_genome.is_some() {
            return false;
        }
        if row.n_relatives < self.min_relatives {
            return false;
        }
        row.is_cluster_representative() || (self.allow_reference && row.is_reference())
    }
}

/// IDs of the selected rows, in table order.
pub fn select_ids(table: &AnnotationTable, criteria: &SelectionCriteria) -> Vec<String> {
    table
        .rows()
        .iter()
        .filter(|row| criteria.accepts(row))
        .map(|row| row.id.clone())
        .collect()
}

/// Outcome of an extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractionSummary {
    pub selected: usize,
    pub written: usize,
    pub missing: usize,
    pub ids: Vec<String>,
}

/// Collects the selected sequences that exist in `sequences`.
pub fn collect_records(
    ids: &[String],
    sequences: &FxHashMap<String, String>,
) -> (Vec<FastaRecord>, usize) {
    let mut records = Vec::with_capacity(ids.len());
    let mut missing = 0;
    for id in ids {
        match sequences.get(id) {
            Some(seq) if !seq.is_empty() => records.push(FastaRecord::new(id.clone(), seq.clone())),
            _ => {
                log::debug!("Selected ID absent from FASTA: {}", id);
                missing += 1;
            }
        }
    }
    (records, missing)
}

/// Selects rows, writes the candidate FASTA and optionally the ID list.
///
/// The ID list holds only the IDs actually written to the FASTA.
pub fn extract_candidates(
    table: &AnnotationTable,
    fasta: &Path,
    criteria: &SelectionCriteria,
    out_fasta: &Path,
    out_ids: Option<&Path>,
) -> Result<ExtractionSummary> {
    let ids = select_ids(table, criteria);
    let sequences = seqio::read_fasta_map(fasta)?;
    let (records, missing) = collect_records(&ids, &sequences);

    let written = seqio::write_fasta(out_fasta, &records)?;
    let written_ids: Vec<String> = records.into_iter().map(|r| r.name).collect();
    if let Some(path) = out_ids {
        seqio::write_id_list(path, &written_ids)?;
    }

    if missing > 0 {
        log::warn!("{} selected sequences were not found in {}", missing, fasta.display());
    }

    Ok(ExtractionSummary {
        selected: ids.len(),
        written,
        missing,
        ids: written_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, genome: &str, cluster: Option<&str>, source: &str, linked: Option<u8>, relatives: usize) -> AnnotationRow {
        AnnotationRow {
            id: id.to_string(),
            genome_id: genome.to_string(),
            cluster_id: cluster.map(|c| c.to_string()),
            source: Some(source.to_string()),
            matched_prot_same_genome: linked,
            n_relatives: relatives,
            ..Default::default()
        }
    }

    fn table() -> AnnotationTable {
        let mut t = AnnotationTable::default();
        t.insert(row("rep_orf", "gA", Some("gA"), "Expe", None, 70));
        t.insert(row("member_orf", "gB", Some("gA"), "Expe", None, 70));
        t.insert(row("ref_orf", "gC", Some("gA"), "Ref", None, 70));
        t.insert(row("linked_orf", "gA", Some("gA"), "Expe", Some(1), 70));
        t.insert(row("hit_other_genome", "gA", Some("gA"), "Expe", Some(0), 70));
        t.insert(row("small_cluster", "gD", Some("gD"), "Expe", None, 3));
        t
    }

    #[test]
    fn test_default_selection() {
        let ids = select_ids(&table(), &SelectionCriteria::default());
        assert_eq!(ids, vec!["rep_orf", "ref_orf", "small_cluster"]);
    }

    #[test]
    fn test_min_relatives_and_no_reference() {
        let criteria = SelectionCriteria {
            min_relatives: 60,
            allow_reference: false,
            ..Default::default()
        };
        assert_eq!(select_ids(&table(), &criteria), vec!["rep_orf"]);
    }

    #[test]
    fn test_extract_writes_present_sequences_only() {
        let dir = tempfile::tempdir().unwrap();
        let fasta = dir.path().join("allseqs.faa");
        std::fs::write(&fasta, ">rep_orf\nMKV\n>small_cluster\nMAA\n").unwrap();
        let out_fasta = dir.path().join("candidates.faa");
        let out_ids = dir.path().join("ids.txt");

        let summary = extract_candidates(
            &table(),
            &fasta,
            &SelectionCriteria::default(),
            &out_fasta,
            Some(&out_ids),
        )
        .unwrap();

        assert_eq!(summary.selected, 3);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.missing, 1);
        assert_eq!(std::fs::read_to_string(&out_fasta).unwrap(), ">rep_orf\nMKV\n>small_cluster\nMAA\n");
        assert_eq!(std::fs::read_to_string(&out_ids).unwrap(), "rep_orf\nsmall_cluster\n");
    }
}
