//! Embedding Module
//!
//! Prepares protein sequences for a language-model embedder, groups them
//! into length-balanced batches, drives an [`Embedder`] with automatic batch
//! shrinking on out-of-memory errors, and reads/writes embedding TSV files.
//!
//! # Embedding TSV
//! ```text
//! <seqID>\t<v0 v1 v2 ...>
//! ```
//! The reader also accepts one value per tab-separated column.
//!
//! The language model itself sits behind the [`Embedder`] trait. The crate
//! ships [`CompositionEmbedder`], an amino-acid + dipeptide composition
//! vector that needs no model weights.

use anyhow::{Context, Result};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::Range;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;

use crate::seqid::sanitize_id;
use crate::seqio::FastaRecord;

// ============================================================================
// Sequence Preparation
// ============================================================================

/// A sequence ready for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSequence {
    pub id: String,
    pub seq: String,
}

impl PreparedSequence {
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}

/// Normalises a protein sequence: uppercase, gaps removed, rare residues
/// (U, Z, O) mapped to X.
pub fn normalize_protein(seq: &str) -> String {
    seq.chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| match c.to_ascii_uppercase() {
            'U' | 'Z' | 'O' => 'X',
            other => other,
        })
        .collect()
}

/// Keeps the records listed in `keep` (all records when `keep` is empty),
/// sanitises their IDs and normalises their sequences.
///
/// # Errors
/// Fails when no non-empty sequence remains.
pub fn prepare<I>(records: I, keep: &FxHashSet<String>) -> Result<Vec<PreparedSequence>>
where
    I: IntoIterator<Item = FastaRecord>,
{
    let mut prepared = Vec::new();
    for record in records {
        if !keep.is_empty() && !keep.contains(&record.name) {
            continue;
        }
        let seq = normalize_protein(&record.seq);
        if seq.is_empty() {
            log::warn!("Skipping empty sequence: {}", record.name);
            continue;
        }
        prepared.push(PreparedSequence { id: sanitize_id(&record.name), seq });
    }

    if prepared.is_empty() {
        anyhow::bail!("Empty FASTA or no IDs matched");
    }
    Ok(prepared)
}

// ============================================================================
// Batching
// ============================================================================

/// Batch limits and checkpointing.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Residue total that flushes a batch.
    pub max_residues: usize,
    /// Sequences longer than this flush the batch they join.
    pub max_seq_len: usize,
    /// Maximum sequences per batch.
    pub max_batch: usize,
    /// Rewrite the output every N batches.
    pub save_every: usize,
    /// Split batches recursively on out-of-memory errors.
    pub auto_shrink: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_residues: 4000,
            max_seq_len: 1000,
            max_batch: 256,
            save_every: 10000,
            auto_shrink: false,
        }
    }
}

/// Sorts sequences longest first (ID ascending on ties).
pub fn sort_for_batching(seqs: &mut [PreparedSequence]) {
    seqs.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.id.cmp(&b.id)));
}

/// Splits sorted sequences into batches, returned as index ranges.
pub fn plan_batches(seqs: &[PreparedSequence], config: &BatchConfig) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut residues = 0;

    for (i, seq) in seqs.iter().enumerate() {
        residues += seq.len();
        let count = i + 1 - start;
        let flush = count >= config.max_batch.max(1)
            || residues >= config.max_residues
            || seq.len() > config.max_seq_len
            || i + 1 == seqs.len();
        if flush {
            batches.push(start..i + 1);
            start = i + 1;
            residues = 0;
        }
    }
    batches
}

// ============================================================================
// Embedder Seam
// ============================================================================

/// Errors an embedder can report.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The batch did not fit in device memory; a smaller batch may succeed.
    #[error("out of memory embedding {sequences} sequences ({residues} residues)")]
    OutOfMemory { sequences: usize, residues: usize },
    #[error("embedder returned {got} vectors for {expected} sequences")]
    CountMismatch { expected: usize, got: usize },
    #[error("embedding model failed: {0}")]
    Model(String),
}

/// Turns protein sequences into fixed-length vectors (one per protein).
pub trait Embedder: Sync {
    fn name(&self) -> &str;
    fn dimension(&self) -> usize;
    fn embed_batch(&self, batch: &[PreparedSequence]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

const AMINO_ACIDS: &[u8; 20] = b"ACDEFGHIKLMNPQRSTVWY";

fn residue_index(residue: u8) -> Option<usize> {
    AMINO_ACIDS.iter().position(|&aa| aa == residue)
}

/// Amino-acid (20) and dipeptide (400) composition frequencies.
///
/// Residues outside the 20 standard amino acids are ignored; dipeptides
/// spanning such a residue are skipped.
#[derive(Debug, Clone, Default)]
pub struct CompositionEmbedder;

impl CompositionEmbedder {
    pub const DIMENSION: usize = 20 + 20 * 20;

    pub fn embed_one(seq: &str) -> Vec<f32> {
        let mut vec = vec![0f32; Self::DIMENSION];
        let indices: Vec<Option<usize>> = seq.bytes().map(residue_index).collect();

        let mut mono_total = 0usize;
        for idx in indices.iter().flatten() {
            vec[*idx] += 1.0;
            mono_total += 1;
        }

        let mut di_total = 0usize;
        for pair in indices.windows(2) {
            if let (Some(a), Some(b)) = (pair[0], pair[1]) {
                vec[20 + a * 20 + b] += 1.0;
                di_total += 1;
            }
        }

        if mono_total > 0 {
            for v in &mut vec[..20] {
                *v /= mono_total as f32;
            }
        }
        if di_total > 0 {
            for v in &mut vec[20..] {
                *v /= di_total as f32;
            }
        }
        vec
    }
}

impl Embedder for CompositionEmbedder {
    fn name(&self) -> &str {
        "composition"
    }

    fn dimension(&self) -> usize {
        Self::DIMENSION
    }

    fn embed_batch(&self, batch: &[PreparedSequence]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(batch.par_iter().map(|s| Self::embed_one(&s.seq)).collect())
    }
}

// ============================================================================
// Embedding Driver
// ============================================================================

/// ID → vector, kept sorted by ID for output.
pub type EmbeddingStore = BTreeMap<String, Vec<f32>>;

/// Embeds a batch; on out-of-memory errors splits it in halves (when
/// `auto_shrink`) and finally falls back to `fallback` for single sequences.
pub fn safe_embed(
    embedder: &dyn Embedder,
    fallback: Option<&dyn Embedder>,
    batch: &[PreparedSequence],
    auto_shrink: bool,
    store: &mut EmbeddingStore,
    depth: usize,
) -> Result<()> {
    match embedder.embed_batch(batch) {
        Ok(vectors) => {
            if vectors.len() != batch.len() {
                return Err(EmbedError::CountMismatch { expected: batch.len(), got: vectors.len() }.into());
            }
            for (seq, vector) in batch.iter().zip(vectors) {
                store.insert(seq.id.clone(), vector);
            }
            Ok(())
        }
        Err(EmbedError::OutOfMemory { .. }) if auto_shrink && batch.len() > 1 => {
            let mid = batch.len() / 2;
            log::debug!("Out of memory at depth {}, splitting {} sequences", depth, batch.len());
            safe_embed(embedder, fallback, &batch[..mid], auto_shrink, store, depth + 1)?;
            safe_embed(embedder, fallback, &batch[mid..], auto_shrink, store, depth + 1)
        }
        Err(e @ EmbedError::OutOfMemory { .. }) if batch.len() == 1 => match fallback {
            Some(fallback) => {
                log::warn!(
                    "{} too large for {}, falling back to {}",
                    batch[0].id,
                    embedder.name(),
                    fallback.name()
                );
                safe_embed(fallback, None, batch, false, store, depth + 1)
            }
            None => Err(e).with_context(|| format!("No fallback embedder for {}", batch[0].id)),
        },
        Err(e) => Err(e).with_context(|| format!("Embedding batch of {} sequences failed", batch.len())),
    }
}

/// Embeds all sequences batch by batch, checkpointing to `output` when given.
pub fn embed_sequences(
    mut seqs: Vec<PreparedSequence>,
    embedder: &dyn Embedder,
    fallback: Option<&dyn Embedder>,
    config: &BatchConfig,
    output: Option<&Path>,
) -> Result<EmbeddingStore> {
    sort_for_batching(&mut seqs);
    let batches = plan_batches(&seqs, config);
    let total = seqs.len();
    let start = Instant::now();
    let mut store = EmbeddingStore::new();

    log::info!(
        "Embedding {} sequences in {} batches with {}",
        total,
        batches.len(),
        embedder.name()
    );

    for (batch_idx, range) in batches.iter().enumerate() {
        let before = store.len();
        safe_embed(embedder, fallback, &seqs[range.clone()], config.auto_shrink, &mut store, 0)?;
        log::info!(
            "Batch {}: +{}  total={}/{}",
            batch_idx + 1,
            store.len() - before,
            store.len(),
            total
        );

        let last = batch_idx + 1 == batches.len();
        if let Some(path) = output {
            if (batch_idx + 1) % config.save_every.max(1) == 0 || last {
                write_embeddings(path, &store)?;
            }
        }
    }

    log::info!("Finished embedding in {:.1} min", start.elapsed().as_secs_f64() / 60.0);
    Ok(store)
}

// ============================================================================
// Embedding TSV I/O
// ============================================================================

/// Writes `ID\tv0 v1 ...` lines, IDs ascending.
pub fn write_embeddings<P: AsRef<Path>>(path: P, store: &EmbeddingStore) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let mut out = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    for (id, vector) in store {
        let values: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
        writeln!(out, "{}\t{}", id, values.join(" "))?;
    }
    out.flush()?;
    Ok(())
}

/// Vectors loaded for projection, one row per (source, ID).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingMatrix {
    pub ids: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl EmbeddingMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.rows.first().map(|r| r.len()).unwrap_or(0)
    }

    fn push(&mut self, id: String, row: Vec<f64>) -> Result<()> {
        if !self.rows.is_empty() && row.len() != self.dimension() {
            anyhow::bail!(
                "Vector for {} has {} values, expected {}",
                id,
                row.len(),
                self.dimension()
            );
        }
        self.ids.push(id);
        self.rows.push(row);
        Ok(())
    }
}

/// Parses one embedding line into ID and values.
pub fn parse_embedding_line(line: &str) -> Result<Option<(String, Vec<f64>)>> {
    let line = line.trim_end();
    if line.is_empty() {
        return Ok(None);
    }
    let mut parts = line.split('\t');
    let id = parts.next().unwrap_or("").to_string();
    let rest: Vec<&str> = parts.collect();

    let tokens: Vec<&str> = if rest.len() == 1 {
        rest[0].split_whitespace().collect()
    } else {
        rest.iter().map(|s| s.trim()).collect()
    };

    let values = tokens
        .iter()
        .map(|t| t.parse::<f64>().with_context(|| format!("Invalid value '{}' for {}", t, id)))
        .collect::<Result<Vec<f64>>>()?;
    Ok(Some((id, values)))
}

/// Loads and concatenates vectors from several TSV files, keeping only IDs
/// in `keep` when given. An ID present in several files yields one row per file.
pub fn load_embeddings<P: AsRef<Path>>(
    paths: &[P],
    keep: Option<&FxHashSet<String>>,
) -> Result<EmbeddingMatrix> {
    let mut matrix = EmbeddingMatrix::default();
    for path in paths {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open embeddings: {}", path.display()))?;
        let mut loaded = 0usize;
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let Some((id, values)) = parse_embedding_line(&line)
                .with_context(|| format!("{} line {}", path.display(), i + 1))?
            else {
                continue;
            };
            if keep.is_some_and(|k| !k.contains(&id)) {
                continue;
            }
            matrix.push(id, values)?;
            loaded += 1;
        }
        log::info!("Loaded {} vectors from {}", loaded, path.display());
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn seq(id: &str, len: usize) -> PreparedSequence {
        PreparedSequence { id: id.to_string(), seq: "A".repeat(len) }
    }

    /// Fails with out-of-memory above a residue budget.
    struct BudgetEmbedder {
        budget: usize,
        calls: AtomicUsize,
    }

    impl Embedder for BudgetEmbedder {
        fn name(&self) -> &str {
            "budget"
        }
        fn dimension(&self) -> usize {
            1
        }
        fn embed_batch(&self, batch: &[PreparedSequence]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let residues: usize = batch.iter().map(|s| s.len()).sum();
            if residues > self.budget {
                return Err(EmbedError::OutOfMemory { sequences: batch.len(), residues });
            }
            Ok(batch.iter().map(|s| vec![s.len() as f32]).collect())
        }
    }

    #[test]
    fn test_normalize_protein() {
        assert_eq!(normalize_protein("mk-uZo*"), "MKXXX*");
    }

    #[test]
    fn test_prepare_filters_and_sanitizes() {
        let records = vec![
            FastaRecord::new("a.1", "mkv"),
            FastaRecord::new("b", "MAA"),
            FastaRecord::new("c", "--"),
        ];
        let keep: FxHashSet<String> = ["a.1".to_string(), "c".to_string()].into_iter().collect();
        let prepared = prepare(records, &keep).unwrap();
        assert_eq!(prepared, vec![PreparedSequence { id: "a_1".into(), seq: "MKV".into() }]);

        assert!(prepare(vec![FastaRecord::new("x", "")], &FxHashSet::default()).is_err());
    }

    #[test]
    fn test_plan_batches_flush_rules() {
        let mut seqs = vec![seq("s1", 10), seq("s2", 1200), seq("s3", 10), seq("s4", 10), seq("s5", 10)];
        sort_for_batching(&mut seqs);
        assert_eq!(seqs[0].id, "s2");

        let config = BatchConfig { max_batch: 2, ..Default::default() };
        let batches = plan_batches(&seqs, &config);
        // s2 exceeds max_seq_len and flushes alone, then pairs, then the tail
        assert_eq!(batches, vec![0..1, 1..3, 3..5]);
    }

    #[test]
    fn test_plan_batches_residue_limit() {
        let seqs = vec![seq("a", 300), seq("b", 300), seq("c", 300)];
        let config = BatchConfig { max_residues: 600, ..Default::default() };
        assert_eq!(plan_batches(&seqs, &config), vec![0..2, 2..3]);
        assert!(plan_batches(&[], &config).is_empty());
    }

    #[test]
    fn test_auto_shrink_splits_batches() {
        let embedder = BudgetEmbedder { budget: 20, calls: AtomicUsize::new(0) };
        let batch = vec![seq("a", 10), seq("b", 10), seq("c", 10), seq("d", 10)];
        let mut store = EmbeddingStore::new();
        safe_embed(&embedder, None, &batch, true, &mut store, 0).unwrap();
        assert_eq!(store.len(), 4);
        // 4 -> (2, 2)
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_oom_without_shrink_fails() {
        let embedder = BudgetEmbedder { budget: 5, calls: AtomicUsize::new(0) };
        let mut store = EmbeddingStore::new();
        let err = safe_embed(&embedder, None, &[seq("a", 3), seq("b", 3)], false, &mut store, 0);
        assert!(err.is_err());
    }

    #[test]
    fn test_single_sequence_falls_back() {
        let embedder = BudgetEmbedder { budget: 5, calls: AtomicUsize::new(0) };
        let fallback = CompositionEmbedder;
        let mut store = EmbeddingStore::new();
        safe_embed(&embedder, Some(&fallback), &[seq("big", 50)], true, &mut store, 0).unwrap();
        assert_eq!(store["big"].len(), CompositionEmbedder::DIMENSION);
    }

    #[test]
    fn test_composition_vector() {
        let v = CompositionEmbedder::embed_one("AAC");
        let a = residue_index(b'A').unwrap();
        let c = residue_index(b'C').unwrap();
        assert!((v[a] - 2.0 / 3.0).abs() < 1e-6);
        assert!((v[c] - 1.0 / 3.0).abs() < 1e-6);
        assert!((v[20 + a * 20 + a] - 0.5).abs() < 1e-6);
        assert!((v[20 + a * 20 + c] - 0.5).abs() < 1e-6);

        let empty = CompositionEmbedder::embed_one("XX");
        assert!(empty.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_embed_sequences_writes_sorted_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("embeddings.tsv");
        let seqs = vec![
            PreparedSequence { id: "b".into(), seq: "MK".into() },
            PreparedSequence { id: "a".into(), seq: "MKV".into() },
        ];
        let store = embed_sequences(seqs, &CompositionEmbedder, None, &BatchConfig::default(), Some(&out)).unwrap();
        assert_eq!(store.len(), 2);

        let text = std::fs::read_to_string(&out).unwrap();
        let ids: Vec<&str> = text.lines().map(|l| l.split('\t').next().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let matrix = load_embeddings(&[&out], None).unwrap();
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.dimension(), CompositionEmbedder::DIMENSION);
    }

    #[test]
    fn test_write_embeddings_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out").join("new").join("e.tsv");
        let seqs = vec![PreparedSequence { id: "p1".into(), seq: "MKV".into() }];
        embed_sequences(seqs, &CompositionEmbedder, None, &BatchConfig::default(), Some(&out)).unwrap();
        assert_eq!(load_embeddings(&[&out], None).unwrap().ids, vec!["p1"]);
    }

    #[test]
    fn test_load_embeddings_formats_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let spaced = dir.path().join("spaced.tsv");
        let columns = dir.path().join("columns.tsv");
        std::fs::write(&spaced, "p1\t0.1 0.2\np2\t0.3 0.4\n").unwrap();
        std::fs::write(&columns, "p1\t1\t2\n\np3\t5\t6\n").unwrap();

        let keep: FxHashSet<String> = ["p1".to_string(), "p3".to_string()].into_iter().collect();
        let matrix = load_embeddings(&[&spaced, &columns], Some(&keep)).unwrap();
        assert_eq!(matrix.ids, vec!["p1", "p1", "p3"]);
        assert_eq!(matrix.rows[1], vec![1.0, 2.0]);
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tsv");
        std::fs::write(&path, "p1\t1 2\np2\t1 2 3\n").unwrap();
        assert!(load_embeddings(&[&path], None).is_err());
    }
}
