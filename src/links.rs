//! ORF ↔ Protein Link Module
//!
//! Links each ORF (Getorf) to a predicted protein (Prodigal) of the same
//! genome from an ORF-vs-protein search, and counts how many proteins each
//! ORF hits overall.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::m8::M8Reader;
use crate::seqid::orf_genome_id;

/// Default identity (fraction) above which a same-genome hit is a link.
pub const DEFAULT_LINK_IDENTITY: f64 = 0.95;

/// Link information for one ORF.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrfLink {
    /// Linked protein of the same genome, if any.
    pub prot_id: Option<String>,
    /// Identity of the retained link.
    pub identity: f64,
    /// True when a same-genome protein passed the identity threshold.
    pub same_genome: bool,
    /// Number of protein hits for this ORF, all genomes included.
    pub n_matches: usize,
}

/// ORF ID → link.
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    links: FxHashMap<String, OrfLink>,
}

impl LinkTable {
    /// Builds links from an ORF-vs-protein m8 file.
    pub fn from_m8<P: AsRef<Path>>(path: P, min_identity: f64) -> Result<Self> {
        let mut table = Self::default();
        for record in M8Reader::open(path)? {
            let rec = record?;
            table.add_hit(&rec.query, &rec.target, rec.identity.unwrap_or(0.0), min_identity);
        }
        Ok(table)
    }

    /// Accounts one ORF → protein hit.
    pub fn add_hit(&mut self, orf: &str, prot: &str, identity: f64, min_identity: f64) {
        let link = self.links.entry(orf.to_string()).or_default();
        link.n_matches += 1;

        if identity > min_identity && orf_genome_id(orf) == orf_genome_id(prot) {
            // Keep the best same-genome hit; first one wins on ties
            if !link.same_genome || identity > link.identity {
                link.prot_id = Some(prot.to_string());
                link.identity = identity;
                link.same_genome = true;
            }
        }
    }

    pub fn get(&self, orf: &str) -> Option<&OrfLink> {
        self.links.get(orf)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Number of ORFs linked to a same-genome protein.
    pub fn linked_count(&self) -> usize {
        self.links.values().filter(|l| l.same_genome).count()
    }

    /// Writes `liens_orf_prot.tsv`, rows sorted by ORF ID.
    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut out = BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        );
        writeln!(out, "\tprotID\tmatchedProtSameGenome\tnMatchesOnProtOthersGenomes")?;

        let mut orfs: Vec<&String> = self.links.keys().collect();
        orfs.sort();
        for orf in orfs {
            let link = &self.links[orf];
            writeln!(
                out,
                "{}\t{}\t{}\t{}",
                orf,
                link.prot_id.as_deref().unwrap_or(""),
                if link.same_genome { 1 } else { 0 },
                link.n_matches
            )?;
        }
        out.flush()?;
        Ok(())
    }

    /// Reads a table written by [`LinkTable::write_tsv`].
    pub fn load_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open link table: {}", path.display()))?;

        let mut links = FxHashMap::default();
        for (i, line) in BufReader::new(file).lines().enumerate().skip(1) {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 4 {
                anyhow::bail!("Invalid link table line {}: expected 4 columns", i + 1);
            }
            let prot_id = (!fields[1].is_empty()).then(|| fields[1].to_string());
            let same_genome = fields[2].trim() == "1";
            let n_matches = fields[3]
                .trim()
                .parse()
                .with_context(|| format!("Invalid match count on line {}", i + 1))?;
            links.insert(
                fields[0].to_string(),
                OrfLink { prot_id, identity: 0.0, same_genome, n_matches },
            );
        }

        Ok(Self { links })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_genome_link_above_threshold() {
        let mut table = LinkTable::default();
        table.add_hit("gA_5_ExpeGetoPosi", "gA_2_RefProdPosi", 0.99, DEFAULT_LINK_IDENTITY);
        table.add_hit("gA_5_ExpeGetoPosi", "gB_1_RefProdPosi", 1.0, DEFAULT_LINK_IDENTITY);

        let link = table.get("gA_5_ExpeGetoPosi").unwrap();
        assert!(link.same_genome);
        assert_eq!(link.prot_id.as_deref(), Some("gA_2_RefProdPosi"));
        assert_eq!(link.n_matches, 2);
    }

    #[test]
    fn test_low_identity_or_other_genome_is_not_linked() {
        let mut table = LinkTable::default();
        table.add_hit("gA_5_ExpeGetoPosi", "gA_2_RefProdPosi", 0.95, DEFAULT_LINK_IDENTITY);
        table.add_hit("gA_5_ExpeGetoPosi", "gC_2_RefProdPosi", 0.99, DEFAULT_LINK_IDENTITY);

        let link = table.get("gA_5_ExpeGetoPosi").unwrap();
        assert!(!link.same_genome);
        assert!(link.prot_id.is_none());
        assert_eq!(link.n_matches, 2);
        assert_eq!(table.linked_count(), 0);
    }

    #[test]
    fn test_best_identity_link_wins() {
        let mut table = LinkTable::default();
        table.add_hit("gA_5_ExpeGetoPosi", "gA_2_RefProdPosi", 0.96, DEFAULT_LINK_IDENTITY);
        table.add_hit("gA_5_ExpeGetoPosi", "gA_3_RefProdPosi", 0.99, DEFAULT_LINK_IDENTITY);
        table.add_hit("gA_5_ExpeGetoPosi", "gA_4_RefProdPosi", 0.99, DEFAULT_LINK_IDENTITY);
        let link = table.get("gA_5_ExpeGetoPosi").unwrap();
        assert_eq!(link.prot_id.as_deref(), Some("gA_3_RefProdPosi"));
    }

    #[test]
    fn test_tsv_roundtrip() {
        let mut table = LinkTable::default();
        table.add_hit("gA_5_ExpeGetoPosi", "gA_2_RefProdPosi", 0.99, DEFAULT_LINK_IDENTITY);
        table.add_hit("gB_1_ExpeGetoNega", "gC_2_RefProdPosi", 0.99, DEFAULT_LINK_IDENTITY);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liens_orf_prot.tsv");
        table.write_tsv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("\tprotID\t"));
        assert!(text.contains("gB_1_ExpeGetoNega\t\t0\t1"));

        let loaded = LinkTable::load_tsv(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.get("gA_5_ExpeGetoPosi").unwrap().same_genome);
        assert!(loaded.get("gB_1_ExpeGetoNega").unwrap().prot_id.is_none());
    }
}
