use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use phagemap::annotate::{self, AnnotationSources, AnnotationTable};
use phagemap::cluster::ClusterMap;
use phagemap::conservation::{self, ConservationCounts};
use phagemap::embedding::{self, BatchConfig, CompositionEmbedder};
use phagemap::extract::{self, SelectionCriteria};
use phagemap::links::LinkTable;
use phagemap::mog;
use phagemap::pipeline::{self, PipelineConfig};
use phagemap::plot::{self, PlotOptions};
use phagemap::projection::{self, Metric, PcaProjector, Projector};
use phagemap::seqid::sanitize_id;
use phagemap::seqio;

fn parse_fraction(s: &str) -> Result<f64, String> {
    let val: f64 = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if !(0.0..=1.0).contains(&val) {
        Err(format!("Value must be between 0.0 and 1.0, got {}", val))
    } else {
        Ok(val)
    }
}

fn parse_opacity(s: &str) -> Result<f64, String> {
    let val: f64 = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if !(0.2..=1.0).contains(&val) {
        Err(format!("Opacity must be between 0.2 and 1.0, got {}", val))
    } else {
        Ok(val)
    }
}

fn parse_marker_size(s: &str) -> Result<u32, String> {
    let val: u32 = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if !(4..=20).contains(&val) {
        Err(format!("Marker size must be between 4 and 20, got {}", val))
    } else {
        Ok(val)
    }
}

#[derive(Parser)]
#[command(name = "phagemap")]
#[command(version)]
#[command(about = "Coding vs. non-coding ORF annotation and embedding maps for phage genomes")]
#[command(long_about = r#"
phagemap - Coding vs. non-coding ORF maps for phage genomes

Annotates predicted ORFs and proteins with clustering, conservation and
protein-link evidence, selects candidate non-coding ORFs, embeds them and
renders an interactive 2D map.

WORKFLOW:
  ORFs/proteins → MMseqs2 search/cluster → links + conservation → annotation table
  → candidate extraction → embedding → 2D projection → interactive HTML

SEQUENCE IDS:
  <genomeID>_<index>_<Suffix>   e.g. NC_001422_12_RefProdPosi
  Suffix tokens: source (Ref, ...), tool (Prod, Geto), strand (Posi, Nega)

OUTPUT FILES (run):
  liens_orf_prot.tsv     ORF → same-genome protein links
  match_vs_all.tsv       Matches against all genomes
  match_vs_near.tsv      Matches against genomes of the same cluster
  annotations.tsv        Per-sequence annotation table
  candidates.faa         Selected candidate sequences
  candidate_ids.txt      IDs of the written candidates
  run_manifest.json      Inputs, parameters and counts of the run

EXAMPLES:
  # Full annotation run with precomputed MMseqs2 results
  phagemap run -f allseqs.faa --clusters cluster.tsv --links-m8 orfs_vs_prots.m8 \
      --self-m8 allseqs_vs_self.m8 -o results/

  # Embed candidates, project and plot
  phagemap embed -f results/candidates.faa -o results/embeddings.tsv
  phagemap project -e results/embeddings.tsv -o results/coords.tsv
  phagemap plot -c results/coords.tsv -a results/annotations.tsv -o results/map.html
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short = 't', long, value_name = "NUM", default_value = "0", global = true, help_heading = "Runtime")]
    threads: usize,

    #[arg(short = 'v', long, global = true, help_heading = "Runtime")]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Link ORFs to proteins of the same genome
    Links(LinksArgs),
    /// Count matches against all and related genomes
    Conservation(ConservationArgs),
    /// Build the per-sequence annotation table
    Annotate(AnnotateArgs),
    /// Add MOG families to an annotation table
    Mogs(MogsArgs),
    /// Extract candidate sequences from an annotation table
    Extract(ExtractArgs),
    /// Embed protein sequences
    Embed(EmbedArgs),
    /// Project embeddings to 2D
    Project(ProjectArgs),
    /// Render the interactive HTML map
    Plot(PlotArgs),
    /// Run clustering, searches, annotation and extraction
    Run(RunArgs),
}

#[derive(Args)]
struct LinksArgs {
    #[arg(short = 'm', long, value_name = "FILE", help_heading = "Input")]
    m8: PathBuf,

    #[arg(short = 'o', long, value_name = "FILE", default_value = "liens_orf_prot.tsv", help_heading = "Output")]
    out: PathBuf,

    #[arg(short = 'i', long, value_name = "FLOAT", default_value = "0.95",
          value_parser = parse_fraction, help_heading = "Filtering")]
    identity: f64,
}

#[derive(Args)]
struct ConservationArgs {
    #[arg(short = 'm', long, value_name = "FILE", help_heading = "Input")]
    m8: PathBuf,

    #[arg(short = 'c', long, value_name = "FILE", help_heading = "Input")]
    clusters: PathBuf,

    #[arg(long = "out-all", value_name = "FILE", default_value = "match_vs_all.tsv", help_heading = "Output")]
    out_all: PathBuf,

    #[arg(long = "out-near", value_name = "FILE", default_value = "match_vs_near.tsv", help_heading = "Output")]
    out_near: PathBuf,
}

#[derive(Args)]
struct AnnotateArgs {
    #[arg(short = 'f', long, value_name = "FILE", help_heading = "Input")]
    fasta: PathBuf,

    #[arg(short = 'c', long, value_name = "FILE", help_heading = "Input")]
    clusters: PathBuf,

    #[arg(short = 'l', long, value_name = "FILE", help_heading = "Input")]
    links: PathBuf,

    #[arg(long = "match-all", value_name = "FILE", help_heading = "Input")]
    match_all: PathBuf,

    #[arg(long = "match-near", value_name = "FILE", help_heading = "Input")]
    match_near: PathBuf,

    #[arg(short = 'o', long, value_name = "FILE", default_value = "annotations.tsv", help_heading = "Output")]
    out: PathBuf,
}

#[derive(Args)]
struct MogsArgs {
    #[arg(short = 'a', long, value_name = "FILE", help_heading = "Input")]
    annotations: PathBuf,

    /// MOG protein FASTA (`>MOG_ID NUMBER DESCRIPTION`)
    #[arg(short = 'd', long, value_name = "FILE", help_heading = "Input")]
    definitions: PathBuf,

    /// Hits of the annotated sequences against the MOG proteins
    #[arg(short = 'm', long, value_name = "FILE", help_heading = "Input")]
    m8: PathBuf,

    /// Defaults to overwriting the input table
    #[arg(short = 'o', long, value_name = "FILE", help_heading = "Output")]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct ExtractArgs {
    #[arg(short = 'a', long, value_name = "FILE", help_heading = "Input")]
    annotations: PathBuf,

    #[arg(short = 'f', long, value_name = "FILE", help_heading = "Input")]
    fasta: PathBuf,

    #[arg(short = 'o', long, value_name = "FILE", default_value = "candidates.faa", help_heading = "Output")]
    out: PathBuf,

    #[arg(long = "ids-out", value_name = "FILE", help_heading = "Output")]
    ids_out: Option<PathBuf>,

    #[arg(short = 'r', long = "min-relatives", value_name = "NUM", default_value = "0", help_heading = "Selection")]
    min_relatives: usize,

    #[arg(long = "keep-linked", help_heading = "Selection")]
    keep_linked: bool,

    #[arg(long = "no-reference", help_heading = "Selection")]
    no_reference: bool,
}

#[derive(Args)]
struct EmbedArgs {
    #[arg(short = 'f', long, value_name = "FILE", help_heading = "Input")]
    fasta: PathBuf,

    /// Only embed the listed IDs
    #[arg(short = 'i', long, value_name = "FILE", help_heading = "Input")]
    ids: Option<PathBuf>,

    #[arg(short = 'o', long, value_name = "FILE", default_value = "embeddings.tsv", help_heading = "Output")]
    out: PathBuf,

    #[arg(long = "max-residues", value_name = "NUM", default_value = "4000", help_heading = "Batching")]
    max_residues: usize,

    #[arg(long = "max-seq-len", value_name = "NUM", default_value = "1000", help_heading = "Batching")]
    max_seq_len: usize,

    #[arg(long = "max-batch", value_name = "NUM", default_value = "256", help_heading = "Batching")]
    max_batch: usize,

    #[arg(long = "save-every", value_name = "NUM", default_value = "10000", help_heading = "Batching")]
    save_every: usize,

    /// Halve batches that run out of memory instead of failing
    #[arg(long = "auto-shrink", help_heading = "Batching")]
    auto_shrink: bool,
}

#[derive(Args)]
struct ProjectArgs {
    #[arg(short = 'e', long, value_name = "FILE", num_args = 1.., required = true, help_heading = "Input")]
    embeddings: Vec<PathBuf>,

    /// Only project the listed IDs
    #[arg(short = 'i', long, value_name = "FILE", help_heading = "Input")]
    ids: Option<PathBuf>,

    #[arg(short = 'o', long, value_name = "FILE", default_value = "coords.tsv", help_heading = "Output")]
    out: PathBuf,

    #[arg(short = 'm', long, value_name = "METRIC", default_value = "cosine", help_heading = "Projection")]
    metric: Metric,

    #[arg(long, value_name = "NUM", default_value = "200", help_heading = "Projection")]
    iterations: usize,

    #[arg(long, value_name = "NUM", default_value = "42", help_heading = "Projection")]
    seed: u64,
}

#[derive(Args)]
struct PlotArgs {
    /// `ID x y` TSV from `project` or an external UMAP run
    #[arg(short = 'c', long, value_name = "FILE", help_heading = "Input")]
    coords: PathBuf,

    #[arg(short = 'a', long, value_name = "FILE", help_heading = "Input")]
    annotations: PathBuf,

    #[arg(short = 'o', long, value_name = "FILE", default_value = "map.html", help_heading = "Output")]
    out: PathBuf,

    #[arg(long, value_name = "TEXT", default_value = "Embedding map", help_heading = "Appearance")]
    title: String,

    #[arg(long = "marker-size", value_name = "NUM", default_value = "14",
          value_parser = parse_marker_size, help_heading = "Appearance")]
    marker_size: u32,

    #[arg(long, value_name = "FLOAT", default_value = "0.8",
          value_parser = parse_opacity, help_heading = "Appearance")]
    opacity: f64,

    #[arg(long, value_name = "NUM", default_value = "50", help_heading = "Appearance")]
    bins: usize,

    #[arg(long = "plotly-src", value_name = "URL", help_heading = "Appearance")]
    plotly_src: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    #[arg(short = 'f', long = "fasta", value_name = "FILE", help_heading = "Input")]
    all_seqs: PathBuf,

    /// Genome marker FASTA to cluster when --clusters is not given
    #[arg(short = 'g', long, value_name = "FILE", help_heading = "Input")]
    genomes: Option<PathBuf>,

    #[arg(short = 'c', long, value_name = "FILE", help_heading = "Input")]
    clusters: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help_heading = "Input")]
    orfs: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help_heading = "Input")]
    proteins: Option<PathBuf>,

    #[arg(long = "links-m8", value_name = "FILE", help_heading = "Input")]
    links_m8: Option<PathBuf>,

    #[arg(long = "self-m8", value_name = "FILE", help_heading = "Input")]
    self_m8: Option<PathBuf>,

    #[arg(long = "mog-fasta", value_name = "FILE", help_heading = "Input")]
    mog_fasta: Option<PathBuf>,

    #[arg(long = "mog-m8", value_name = "FILE", help_heading = "Input")]
    mog_m8: Option<PathBuf>,

    #[arg(short = 'o', long, value_name = "DIR", default_value = ".", help_heading = "Output")]
    outdir: PathBuf,

    #[arg(short = 'u', long = "keep-temp", help_heading = "Output")]
    keep_temp: bool,

    #[arg(short = 'i', long = "link-identity", value_name = "FLOAT", default_value = "0.95",
          value_parser = parse_fraction, help_heading = "Filtering")]
    link_identity: f64,

    #[arg(long = "cluster-identity", value_name = "FLOAT", default_value = "0.95",
          value_parser = parse_fraction, help_heading = "Clustering")]
    cluster_identity: f64,

    #[arg(long = "cluster-coverage", value_name = "FLOAT", default_value = "0.8",
          value_parser = parse_fraction, help_heading = "Clustering")]
    cluster_coverage: f64,

    #[arg(short = 'r', long = "min-relatives", value_name = "NUM", default_value = "0", help_heading = "Selection")]
    min_relatives: usize,

    #[arg(long = "keep-linked", help_heading = "Selection")]
    keep_linked: bool,

    #[arg(long = "no-reference", help_heading = "Selection")]
    no_reference: bool,

    #[arg(long, value_name = "PATH", default_value = "mmseqs", help_heading = "Runtime")]
    mmseqs: String,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn selection(min_relatives: usize, keep_linked: bool, no_reference: bool) -> SelectionCriteria {
    SelectionCriteria {
        min_relatives,
        exclude_same_genome_protein: !keep_linked,
        allow_reference: !no_reference,
    }
}

/// ID list as written in the FASTA headers.
fn load_id_filter(path: Option<&Path>) -> Result<FxHashSet<String>> {
    match path {
        Some(p) => Ok(seqio::read_id_list(p)?.into_iter().collect()),
        None => Ok(FxHashSet::default()),
    }
}

/// ID list in the sanitized form used by embedding and coordinate files.
fn load_sanitized_id_filter(path: Option<&Path>) -> Result<FxHashSet<String>> {
    Ok(load_id_filter(path)?.iter().map(|id| sanitize_id(id)).collect())
}

fn main() -> Result<()> {
    let mut cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.threads == 0 {
        cli.threads = num_cpus::get();
    }

    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.threads)
        .build_global()
        .ok();

    match cli.command {
        Commands::Links(args) => run_links(args),
        Commands::Conservation(args) => run_conservation(args),
        Commands::Annotate(args) => run_annotate(args),
        Commands::Mogs(args) => run_mogs(args),
        Commands::Extract(args) => run_extract(args),
        Commands::Embed(args) => run_embed(args),
        Commands::Project(args) => run_project(args),
        Commands::Plot(args) => run_plot(args),
        Commands::Run(args) => run_all(args, cli.threads),
    }
}

fn run_links(args: LinksArgs) -> Result<()> {
    let links = LinkTable::from_m8(&args.m8, args.identity)?;
    links.write_tsv(&args.out)?;
    log::info!(
        "{} ORFs with hits, {} linked; written to {}",
        links.len(),
        links.linked_count(),
        args.out.display()
    );
    Ok(())
}

fn run_conservation(args: ConservationArgs) -> Result<()> {
    let clusters = ClusterMap::load(&args.clusters)?;
    let counts = conservation::count_from_m8(&args.m8, &clusters)?;
    conservation::write_counts(&args.out_all, &counts.all)?;
    conservation::write_counts(&args.out_near, &counts.near)?;
    log::info!(
        "{} sequences with matches, {} with matches on related genomes",
        counts.all.len(),
        counts.near.len()
    );
    Ok(())
}

fn run_annotate(args: AnnotateArgs) -> Result<()> {
    let clusters = ClusterMap::load(&args.clusters)?;
    let links = LinkTable::load_tsv(&args.links)?;
    let counts = ConservationCounts {
        all: conservation::load_counts(&args.match_all)?,
        near: conservation::load_counts(&args.match_near)?,
    };
    let records = seqio::read_fasta_records(&args.fasta)?;

    let sources = AnnotationSources { clusters: &clusters, counts: &counts, links: &links };
    let table = annotate::build_annotations(&records, &sources);
    table.write(&args.out)?;
    log::info!("Wrote {} annotation rows to {}", table.len(), args.out.display());
    Ok(())
}

fn run_mogs(args: MogsArgs) -> Result<()> {
    let mut table = AnnotationTable::load(&args.annotations)?;
    let defs = mog::load_definitions(&args.definitions)?;
    let hits = mog::load_best_hits(&args.m8)?;
    let enriched = mog::enrich(&mut table, &defs, &hits);

    let out = args.out.as_ref().unwrap_or(&args.annotations);
    table.write(out)?;
    log::info!(
        "{} of {} rows assigned to a MOG ({} definitions); written to {}",
        enriched,
        table.len(),
        defs.len(),
        out.display()
    );
    Ok(())
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    let table = AnnotationTable::load(&args.annotations)?;
    let criteria = selection(args.min_relatives, args.keep_linked, args.no_reference);
    let summary = extract::extract_candidates(
        &table,
        &args.fasta,
        &criteria,
        &args.out,
        args.ids_out.as_deref(),
    )?;
    log::info!(
        "{} of {} rows selected, {} sequences written to {}",
        summary.selected,
        table.len(),
        summary.written,
        args.out.display()
    );
    Ok(())
}

fn run_embed(args: EmbedArgs) -> Result<()> {
    let keep = load_id_filter(args.ids.as_deref())?;
    let records = seqio::read_fasta_records(&args.fasta)?;
    let seqs = embedding::prepare(records, &keep)?;

    let config = BatchConfig {
        max_residues: args.max_residues,
        max_seq_len: args.max_seq_len,
        max_batch: args.max_batch,
        save_every: args.save_every,
        auto_shrink: args.auto_shrink,
    };
    let embedder = CompositionEmbedder;
    let store = embedding::embed_sequences(seqs, &embedder, None, &config, Some(args.out.as_path()))?;
    log::info!("{} embeddings written to {}", store.len(), args.out.display());
    Ok(())
}

fn run_project(args: ProjectArgs) -> Result<()> {
    let keep = load_sanitized_id_filter(args.ids.as_deref())?;
    let matrix = embedding::load_embeddings(&args.embeddings, (!keep.is_empty()).then_some(&keep))?;
    log::info!("Projecting {} vectors of dimension {}", matrix.len(), matrix.dimension());

    let projector = PcaProjector {
        metric: args.metric,
        iterations: args.iterations,
        seed: args.seed,
    };
    let points = projector.project(&matrix)?;
    let coords = projection::to_coordinates(&matrix.ids, &points);
    projection::write_coordinates(&args.out, &coords)?;
    log::info!("Coordinates written to {}", args.out.display());
    Ok(())
}

fn run_plot(args: PlotArgs) -> Result<()> {
    let coords = projection::read_coordinates(&args.coords)?;
    let table = AnnotationTable::load(&args.annotations)?;

    let mut options = PlotOptions {
        title: args.title,
        marker_size: args.marker_size,
        opacity: args.opacity,
        bins: args.bins,
        ..Default::default()
    };
    if let Some(src) = args.plotly_src {
        options.plotly_src = src;
    }

    let n = plot::write_plot(&args.out, &coords, &table, &options)
        .with_context(|| format!("Failed to render {}", args.out.display()))?;
    log::info!("Plotted {} points to {}", n, args.out.display());
    Ok(())
}

fn run_all(args: RunArgs, threads: usize) -> Result<()> {
    let start_time = Instant::now();

    eprintln!("============================================================");
    eprintln!(" phagemap - ORF Annotation Pipeline");
    eprintln!("============================================================");
    eprintln!();
    eprintln!("Sequences: {}", args.all_seqs.display());
    eprintln!("Output:    {}", args.outdir.display());
    eprintln!("Threads:   {}", threads);
    eprintln!();

    let config = PipelineConfig {
        all_seqs: args.all_seqs,
        genomes: args.genomes,
        cluster_tsv: args.clusters,
        orfs: args.orfs,
        proteins: args.proteins,
        links_m8: args.links_m8,
        self_m8: args.self_m8,
        mog_fasta: args.mog_fasta,
        mog_m8: args.mog_m8,
        outdir: args.outdir,
        keep_temp: args.keep_temp,
        threads,
        link_identity: args.link_identity,
        cluster_min_seq_id: args.cluster_identity,
        cluster_coverage: args.cluster_coverage,
        selection: selection(args.min_relatives, args.keep_linked, args.no_reference),
        mmseqs: args.mmseqs,
    };

    let summary = pipeline::run_pipeline(&config)?;

    eprintln!();
    eprintln!("Sequences annotated: {}", summary.sequences);
    eprintln!("ORFs linked:         {}", summary.orfs_linked);
    eprintln!("MOG assignments:     {}", summary.mog_enriched);
    eprintln!("Candidates written:  {}", summary.candidates_written);
    eprintln!("\nTotal time: {:.1}s", start_time.elapsed().as_secs_f64());

    Ok(())
}
