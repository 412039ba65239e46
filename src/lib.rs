//! phagemap - Coding vs. non-coding ORF maps for phage genomes
//!
//! Annotates predicted ORFs and proteins with clustering, conservation and
//! protein-link evidence, selects candidate non-coding ORFs, embeds them and
//! renders an interactive 2D map.
//!
//! # Modules
//! - `seqio`: FASTA I/O with gzip support, ID lists
//! - `seqid`: genome ID and origin suffix decoding
//! - `m8`: BLAST tabular (MMseqs2) hit parsing
//! - `cluster`: genome clusters from MMseqs2 cluster tables
//! - `links`: ORF ↔ same-genome protein links
//! - `conservation`: match counts against all / related genomes
//! - `annotate`: per-sequence annotation table
//! - `mog`: MOG family enrichment
//! - `extract`: candidate selection and FASTA extraction
//! - `embedding`: batched protein embedding behind the `Embedder` trait
//! - `projection`: 2D projection and coordinate TSV I/O
//! - `plot`: interactive Plotly HTML map
//! - `search`: MMseqs2 wrappers
//! - `pipeline`: end-to-end annotation run

pub mod seqio;
pub mod seqid;
pub mod m8;
pub mod cluster;
pub mod links;
pub mod conservation;
pub mod annotate;
pub mod mog;
pub mod extract;
pub mod embedding;
pub mod projection;
pub mod plot;
pub mod search;
pub mod pipeline;
