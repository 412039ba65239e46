//! Pipeline Driver
//!
//! Chains the annotation stages for one dataset:
//!
//! ```text
//! genomes ─(easy-cluster)─► cluster.tsv ─────────────┐
//! orfs × proteins ─(easy-search)─► links m8 ─► links ─┤
//! allseqs × allseqs ─(easy-search)─► conservation ────┼─► annotate ─► [mogs] ─► extract
//! ```
//!
//! Every similarity file can be supplied precomputed; MMseqs2 is only looked
//! up when one is missing. Intermediates go to a fresh `<outdir>/phagemap_*`
//! directory that is removed when the run ends, unless `keep_temp` is set.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use crate::annotate::{self, AnnotationSources};
use crate::cluster::ClusterMap;
use crate::conservation;
use crate::extract::{self, ExtractionSummary, SelectionCriteria};
use crate::links::{LinkTable, DEFAULT_LINK_IDENTITY};
use crate::mog;
use crate::search::Mmseqs;
use crate::seqio;

pub const LINKS_FILE: &str = "liens_orf_prot.tsv";
pub const MATCH_ALL_FILE: &str = "match_vs_all.tsv";
pub const MATCH_NEAR_FILE: &str = "match_vs_near.tsv";
pub const ANNOTATIONS_FILE: &str = "annotations.tsv";
pub const CANDIDATES_FILE: &str = "candidates.faa";
pub const CANDIDATE_IDS_FILE: &str = "candidate_ids.txt";
pub const MANIFEST_FILE: &str = "run_manifest.json";

/// Inputs and parameters of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// All ORFs and proteins (the annotated set).
    pub all_seqs: PathBuf,
    /// Genome marker FASTA clustered with `easy-cluster` when no cluster table is given.
    pub genomes: Option<PathBuf>,
    pub cluster_tsv: Option<PathBuf>,
    /// ORFs searched against `proteins` when no links m8 is given.
    pub orfs: Option<PathBuf>,
    pub proteins: Option<PathBuf>,
    pub links_m8: Option<PathBuf>,
    /// All-vs-all hits of `all_seqs`; searched when absent.
    pub self_m8: Option<PathBuf>,
    /// MOG protein FASTA (definitions in headers).
    pub mog_fasta: Option<PathBuf>,
    /// Hits of `all_seqs` against the MOG proteins; searched when absent.
    pub mog_m8: Option<PathBuf>,
    pub outdir: PathBuf,
    pub keep_temp: bool,
    pub threads: usize,
    pub link_identity: f64,
    pub cluster_min_seq_id: f64,
    pub cluster_coverage: f64,
    pub selection: SelectionCriteria,
    pub mmseqs: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            all_seqs: PathBuf::from("allseqs.faa"),
            genomes: None,
            cluster_tsv: None,
            orfs: None,
            proteins: None,
            links_m8: None,
            self_m8: None,
            mog_fasta: None,
            mog_m8: None,
            outdir: PathBuf::from("."),
            keep_temp: false,
            threads: 1,
            link_identity: DEFAULT_LINK_IDENTITY,
            cluster_min_seq_id: 0.95,
            cluster_coverage: 0.8,
            selection: SelectionCriteria::default(),
            mmseqs: "mmseqs".to_string(),
        }
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSummary {
    pub sequences: usize,
    pub genomes_clustered: usize,
    pub clusters: usize,
    pub orfs_with_hits: usize,
    pub orfs_linked: usize,
    pub sequences_with_hits: usize,
    pub mog_enriched: usize,
    pub candidates_selected: usize,
    pub candidates_written: usize,
    pub candidates_missing: usize,
}

#[derive(Serialize)]
struct RunManifest<'a> {
    version: &'static str,
    timestamp: String,
    elapsed_secs: f64,
    inputs: BTreeMap<&'static str, String>,
    parameters: BTreeMap<&'static str, serde_json::Value>,
    outputs: BTreeMap<&'static str, String>,
    summary: &'a PipelineSummary,
}

/// Lazily located MMseqs2.
struct Tools<'a> {
    name: &'a str,
    mmseqs: Option<Mmseqs>,
}

impl<'a> Tools<'a> {
    fn mmseqs(&mut self) -> Result<&Mmseqs> {
        if self.mmseqs.is_none() {
            let found = Mmseqs::locate(self.name)?;
            log::info!("Found mmseqs: {}", found.program().display());
            self.mmseqs = Some(found);
        }
        self.mmseqs.as_ref().context("mmseqs is not available")
    }
}

fn display_opt(path: &Option<PathBuf>) -> String {
    path.as_ref().map(|p| p.display().to_string()).unwrap_or_default()
}

/// Runs clustering, searches, links, conservation, annotation, optional MOG
/// enrichment and candidate extraction.
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineSummary> {
    let start = Instant::now();
    let outdir = &config.outdir;
    fs::create_dir_all(outdir)
        .with_context(|| format!("Failed to create {}", outdir.display()))?;
    let run_tmp = tempfile::Builder::new()
        .prefix("phagemap_")
        .keep(config.keep_temp)
        .tempdir_in(outdir)
        .with_context(|| format!("Failed to create a temporary directory in {}", outdir.display()))?;
    let tmp_dir = run_tmp.path();
    log::debug!("Intermediates in {}", tmp_dir.display());

    let mut tools = Tools { name: &config.mmseqs, mmseqs: None };
    let mut summary = PipelineSummary::default();

    // 1. Genome clusters
    let cluster_tsv = match (&config.cluster_tsv, &config.genomes) {
        (Some(tsv), _) => tsv.clone(),
        (None, Some(genomes)) => tools.mmseqs()?.easy_cluster(
            genomes,
            &tmp_dir.join("genomes"),
            &tmp_dir.join("mmseqs_cluster"),
            config.cluster_min_seq_id,
            config.cluster_coverage,
            config.threads,
        )?,
        (None, None) => anyhow::bail!("Either a cluster table or a genome FASTA is required"),
    };
    let clusters = ClusterMap::load(&cluster_tsv)?;
    summary.genomes_clustered = clusters.genome_count();
    summary.clusters = clusters.cluster_count();
    log::info!(
        "{} genomes in {} clusters",
        summary.genomes_clustered,
        summary.clusters
    );

    // 2. ORF ↔ protein links
    let links_m8 = match (&config.links_m8, &config.orfs, &config.proteins) {
        (Some(m8), _, _) => m8.clone(),
        (None, Some(orfs), Some(proteins)) => tools.mmseqs()?.easy_search(
            orfs,
            proteins,
            &tmp_dir.join("orfs_vs_proteins.m8"),
            &tmp_dir.join("mmseqs_links"),
            config.threads,
        )?,
        _ => anyhow::bail!("Either a links m8 file or both ORF and protein FASTA files are required"),
    };
    let links = LinkTable::from_m8(&links_m8, config.link_identity)?;
    links.write_tsv(outdir.join(LINKS_FILE))?;
    summary.orfs_with_hits = links.len();
    summary.orfs_linked = links.linked_count();
    log::info!(
        "{} ORFs with protein hits, {} linked to a same-genome protein",
        summary.orfs_with_hits,
        summary.orfs_linked
    );

    // 3. Conservation
    let self_m8 = match &config.self_m8 {
        Some(m8) => m8.clone(),
        None => tools.mmseqs()?.easy_search(
            &config.all_seqs,
            &config.all_seqs,
            &tmp_dir.join("allseqs_vs_self.m8"),
            &tmp_dir.join("mmseqs_self"),
            config.threads,
        )?,
    };
    let counts = conservation::count_from_m8(&self_m8, &clusters)?;
    conservation::write_counts(outdir.join(MATCH_ALL_FILE), &counts.all)?;
    conservation::write_counts(outdir.join(MATCH_NEAR_FILE), &counts.near)?;
    summary.sequences_with_hits = counts.all.len();

    // 4. Annotation table
    let records = seqio::read_fasta_records(&config.all_seqs)?;
    summary.sequences = records.len();
    let sources = AnnotationSources { clusters: &clusters, counts: &counts, links: &links };
    let mut table = annotate::build_annotations(&records, &sources);

    // 5. MOG enrichment
    if let Some(mog_fasta) = &config.mog_fasta {
        let defs = mog::load_definitions(mog_fasta)?;
        let mog_m8 = match &config.mog_m8 {
            Some(m8) => m8.clone(),
            None => tools.mmseqs()?.easy_search(
                &config.all_seqs,
                mog_fasta,
                &tmp_dir.join("allseqs_vs_mogs.m8"),
                &tmp_dir.join("mmseqs_mogs"),
                config.threads,
            )?,
        };
        let hits = mog::load_best_hits(&mog_m8)?;
        summary.mog_enriched = mog::enrich(&mut table, &defs, &hits);
        log::info!("{} sequences assigned to a MOG", summary.mog_enriched);
    }

    let annotations_path = outdir.join(ANNOTATIONS_FILE);
    table.write(&annotations_path)?;
    log::info!("Wrote {} annotation rows to {}", table.len(), annotations_path.display());

    // 6. Candidates
    let ExtractionSummary { selected, written, missing, .. } = extract::extract_candidates(
        &table,
        &config.all_seqs,
        &config.selection,
        &outdir.join(CANDIDATES_FILE),
        Some(&outdir.join(CANDIDATE_IDS_FILE)),
    )?;
    summary.candidates_selected = selected;
    summary.candidates_written = written;
    summary.candidates_missing = missing;
    log::info!("{} candidates written ({} selected)", written, selected);

    write_manifest(config, &summary, start.elapsed().as_secs_f64())?;

    if config.keep_temp {
        log::info!("Intermediates kept in {}", tmp_dir.display());
    } else if let Err(e) = run_tmp.close() {
        log::warn!("Failed to remove temporary directory: {}", e);
    }

    Ok(summary)
}

fn write_manifest(config: &PipelineConfig, summary: &PipelineSummary, elapsed_secs: f64) -> Result<()> {
    let mut inputs = BTreeMap::new();
    inputs.insert("all_seqs", config.all_seqs.display().to_string());
    inputs.insert("genomes", display_opt(&config.genomes));
    inputs.insert("cluster_tsv", display_opt(&config.cluster_tsv));
    inputs.insert("orfs", display_opt(&config.orfs));
    inputs.insert("proteins", display_opt(&config.proteins));
    inputs.insert("links_m8", display_opt(&config.links_m8));
    inputs.insert("self_m8", display_opt(&config.self_m8));
    inputs.insert("mog_fasta", display_opt(&config.mog_fasta));
    inputs.insert("mog_m8", display_opt(&config.mog_m8));

    let mut parameters = BTreeMap::new();
    parameters.insert("threads", serde_json::json!(config.threads));
    parameters.insert("link_identity", serde_json::json!(config.link_identity));
    parameters.insert("cluster_min_seq_id", serde_json::json!(config.cluster_min_seq_id));
    parameters.insert("cluster_coverage", serde_json::json!(config.cluster_coverage));
    parameters.insert("min_relatives", serde_json::json!(config.selection.min_relatives));
    parameters.insert(
        "exclude_same_genome_protein",
        serde_json::json!(config.selection.exclude_same_genome_protein),
    );
    parameters.insert("allow_reference", serde_json::json!(config.selection.allow_reference));

    let outputs: BTreeMap<&'static str, String> = [
        ("links", LINKS_FILE),
        ("match_all", MATCH_ALL_FILE),
        ("match_near", MATCH_NEAR_FILE),
        ("annotations", ANNOTATIONS_FILE),
        ("candidates", CANDIDATES_FILE),
        ("candidate_ids", CANDIDATE_IDS_FILE),
    ]
    .into_iter()
    .map(|(k, f)| (k, config.outdir.join(f).display().to_string()))
    .collect();

    let manifest = RunManifest {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Local::now().to_rfc3339(),
        elapsed_secs,
        inputs,
        parameters,
        outputs,
        summary,
    };

    let path = config.outdir.join(MANIFEST_FILE);
    let file = fs::File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), &manifest)?;
    Ok(())
}
