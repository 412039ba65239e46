//! Conservation Module
//!
//! Counts, for every sequence of an all-vs-all search, how often it is hit
//! and by how many distinct genomes: once over all genomes ("all") and once
//! restricted to genomes of the same cluster ("near").
//!
//! Every non-self hit credits both query and target.

use anyhow::{Context, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::cluster::ClusterMap;
use crate::m8::M8Reader;
use crate::seqid::genome_id;

/// Match counts for one sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchCounts {
    /// Number of hits involving the sequence.
    pub n_matches: usize,
    /// Genomes in the sequence's cluster.
    pub n_relatives: usize,
    /// Distinct genomes the sequence matched.
    pub n_genomes: usize,
}

/// Sequence ID → counts.
pub type CountTable = FxHashMap<String, MatchCounts>;

/// "all" and "near" count tables.
#[derive(Debug, Clone, Default)]
pub struct ConservationCounts {
    pub all: CountTable,
    pub near: CountTable,
}

#[derive(Default)]
struct Accumulator {
    matches: FxHashMap<String, usize>,
    genomes: FxHashMap<String, FxHashSet<String>>,
}

impl Accumulator {
    fn credit(&mut self, seq: &str, other_genome: &str) {
        *self.matches.entry(seq.to_string()).or_default() += 1;
        self.genomes
            .entry(seq.to_string())
            .or_default()
            .insert(other_genome.to_string());
    }

    fn finish(self, clusters: &ClusterMap) -> CountTable {
        let Accumulator { matches, genomes } = self;
        matches
            .into_iter()
            .map(|(seq, n_matches)| {
                let n_genomes = genomes.get(&seq).map(|g| g.len()).unwrap_or(0);
                let n_relatives = clusters.relatives_of(genome_id(&seq));
                (seq, MatchCounts { n_matches, n_relatives, n_genomes })
            })
            .collect()
    }
}

/// Streaming counter over all-vs-all hits.
pub struct ConservationCounter<'a> {
    clusters: &'a ClusterMap,
    all: Accumulator,
    near: Accumulator,
    self_hits: usize,
}

impl<'a> ConservationCounter<'a> {
    pub fn new(clusters: &'a ClusterMap) -> Self {
        Self {
            clusters,
            all: Accumulator::default(),
            near: Accumulator::default(),
            self_hits: 0,
        }
    }

    pub fn add_hit(&mut self, query: &str, target: &str) {
        if query == target {
            self.self_hits += 1;
            return;
        }

        let query_genome = genome_id(query);
        let target_genome = genome_id(target);

        self.all.credit(query, target_genome);
        self.all.credit(target, query_genome);

        if self.clusters.same_cluster(query_genome, target_genome) {
            self.near.credit(query, target_genome);
            self.near.credit(target, query_genome);
        }
    }

    pub fn self_hits(&self) -> usize {
        self.self_hits
    }

    pub fn finish(self) -> ConservationCounts {
        ConservationCounts {
            all: self.all.finish(self.clusters),
            near: self.near.finish(self.clusters),
        }
    }
}

/// Computes conservation counts from an all-vs-all m8 file.
pub fn count_from_m8<P: AsRef<Path>>(path: P, clusters: &ClusterMap) -> Result<ConservationCounts> {
    let mut counter = ConservationCounter::new(clusters);
    for record in M8Reader::open(path)? {
        let rec = record?;
        counter.add_hit(&rec.query, &rec.target);
    }
    log::debug!("Ignored {} self hits", counter.self_hits());
    Ok(counter.finish())
}

/// Writes a count table (`\tnMatchs\tnRelatives\tnGenomes`), sorted by ID.
pub fn write_counts<P: AsRef<Path>>(path: P, table: &CountTable) -> Result<()> {
    let path = path.as_ref();
    let mut out = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    writeln!(out, "\tnMatchs\tnRelatives\tnGenomes")?;

    let mut ids: Vec<&String> = table.keys().collect();
    ids.sort();
    for id in ids {
        let c = &table[id];
        writeln!(out, "{}\t{}\t{}\t{}", id, c.n_matches, c.n_relatives, c.n_genomes)?;
    }
    out.flush()?;
    Ok(())
}

/// Reads a count table written by [`write_counts`].
pub fn load_counts<P: AsRef<Path>>(path: P) -> Result<CountTable> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open count table: {}", path.display()))?;

    let mut table = CountTable::default();
    for (i, line) in BufReader::new(file).lines().enumerate().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 4 {
            anyhow::bail!("Invalid count table line {} in {}", i + 1, path.display());
        }
        let parse = |idx: usize| -> Result<usize> {
            fields[idx]
                .trim()
                .parse()
                .with_context(|| format!("Invalid number on line {} of {}", i + 1, path.display()))
        };
        table.insert(
            fields[0].to_string(),
            MatchCounts { n_matches: parse(1)?, n_relatives: parse(2)?, n_genomes: parse(3)? },
        );
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clusters() -> ClusterMap {
        ClusterMap::from_pairs(vec![
            ("gA_1_RefProdPosi", "gA_1_RefProdPosi"),
            ("gA_1_RefProdPosi", "gB_1_RefProdPosi"),
            ("gC_1_RefProdPosi", "gC_1_RefProdPosi"),
        ])
    }

    #[test]
    fn test_symmetric_all_and_near_counts() {
        let clusters = clusters();
        let mut counter = ConservationCounter::new(&clusters);
        counter.add_hit("gA_1_RefProdPosi", "gA_1_RefProdPosi");
        counter.add_hit("gA_1_RefProdPosi", "gB_3_ExpeProdPosi");
        counter.add_hit("gA_1_RefProdPosi", "gC_2_RefProdNega");
        assert_eq!(counter.self_hits(), 1);

        let counts = counter.finish();
        let a_all = &counts.all["gA_1_RefProdPosi"];
        assert_eq!(a_all.n_matches, 2);
        assert_eq!(a_all.n_genomes, 2);
        assert_eq!(a_all.n_relatives, 2);

        let a_near = &counts.near["gA_1_RefProdPosi"];
        assert_eq!(a_near.n_matches, 1);
        assert_eq!(a_near.n_genomes, 1);

        assert_eq!(counts.all["gB_3_ExpeProdPosi"].n_matches, 1);
        assert_eq!(counts.all["gC_2_RefProdNega"].n_relatives, 1);
        assert!(!counts.near.contains_key("gC_2_RefProdNega"));
    }

    #[test]
    fn test_distinct_genomes_counted_once() {
        let clusters = clusters();
        let mut counter = ConservationCounter::new(&clusters);
        counter.add_hit("gA_1_RefProdPosi", "gB_1_RefProdPosi");
        counter.add_hit("gA_1_RefProdPosi", "gB_2_RefProdPosi");
        let counts = counter.finish();
        assert_eq!(counts.all["gA_1_RefProdPosi"].n_matches, 2);
        assert_eq!(counts.all["gA_1_RefProdPosi"].n_genomes, 1);
    }

    #[test]
    fn test_unclustered_genomes_are_not_near() {
        let clusters = ClusterMap::default();
        let mut counter = ConservationCounter::new(&clusters);
        counter.add_hit("x_1_RefProdPosi", "y_1_RefProdPosi");
        let counts = counter.finish();
        assert!(counts.near.is_empty());
        assert_eq!(counts.all["x_1_RefProdPosi"].n_relatives, 0);
    }

    #[test]
    fn test_count_table_roundtrip() {
        let clusters = clusters();
        let mut counter = ConservationCounter::new(&clusters);
        counter.add_hit("gA_1_RefProdPosi", "gB_1_RefProdPosi");
        let counts = counter.finish();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("df_match_vs_all.tsv");
        write_counts(&path, &counts.all).unwrap();
        let loaded = load_counts(&path).unwrap();
        assert_eq!(loaded, counts.all);
    }
}
