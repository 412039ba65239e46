//! Genome Cluster Module
//!
//! Loads the `<prefix>_cluster.tsv` table written by MMseqs2 `easy-cluster`
//! (representative, member) and reduces both columns to genome identifiers.

use anyhow::{Context, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::seqid::genome_id;

/// Genome → cluster assignment with per-cluster genome counts.
#[derive(Debug, Clone, Default)]
pub struct ClusterMap {
    genome_to_cluster: FxHashMap<String, String>,
    cluster_sizes: FxHashMap<String, usize>,
}

impl ClusterMap {
    /// Loads a two-column cluster TSV.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open cluster table: {}", path.display()))?;

        let mut pairs = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 {
                anyhow::bail!(
                    "Invalid cluster line {} in {}: expected representative and member",
                    i + 1,
                    path.display()
                );
            }
            pairs.push((fields[0].to_string(), fields[1].to_string()));
        }

        Ok(Self::from_pairs(pairs))
    }

    /// Builds the map from (representative, member) sequence IDs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let mut genome_to_cluster: FxHashMap<String, String> = FxHashMap::default();
        for (rep, member) in pairs {
            genome_to_cluster.insert(
                genome_id(member.as_ref()).to_string(),
                genome_id(rep.as_ref()).to_string(),
            );
        }

        let mut cluster_sizes: FxHashMap<String, usize> = FxHashMap::default();
        for cluster in genome_to_cluster.values() {
            *cluster_sizes.entry(cluster.clone()).or_default() += 1;
        }

        Self { genome_to_cluster, cluster_sizes }
    }

    pub fn cluster_of(&self, genome: &str) -> Option<&str> {
        self.genome_to_cluster.get(genome).map(|s| s.as_str())
    }

    /// Number of genomes in a cluster (0 for unknown clusters).
    pub fn size_of(&self, cluster: &str) -> usize {
        self.cluster_sizes.get(cluster).copied().unwrap_or(0)
    }

    /// Number of relatives of a genome: the size of its cluster, 0 if unclustered.
    pub fn relatives_of(&self, genome: &str) -> usize {
        self.cluster_of(genome).map(|c| self.size_of(c)).unwrap_or(0)
    }

    /// True when both genomes are clustered and share a cluster.
    pub fn same_cluster(&self, a: &str, b: &str) -> bool {
        match (self.cluster_of(a), self.cluster_of(b)) {
            (Some(ca), Some(cb)) => ca == cb,
            _ => false,
        }
    }

    pub fn genome_count(&self) -> usize {
        self.genome_to_cluster.len()
    }

    pub fn cluster_count(&self) -> usize {
        let distinct: FxHashSet<&String> = self.genome_to_cluster.values().collect();
        distinct.len()
    }
}
