//! External tool wrappers.
//!
//! MMseqs2 produces every similarity file the annotation stages consume:
//! `easy-search` writes BLAST-tabular `.m8` hits and `easy-cluster` writes
//! the `<prefix>_cluster.tsv` representative/member table.

use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

/// Resolves a program name to a path, searching `PATH` when it is not an
/// existing absolute path.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    if path.is_absolute() && path.exists() {
        return Ok(path.to_path_buf());
    }

    if let Ok(paths) = env::var("PATH") {
        for dir in env::split_paths(&paths) {
            let full_path = dir.join(name);
            if full_path.exists() && full_path.is_file() {
                return Ok(full_path);
            }
        }
    }

    anyhow::bail!("{} not found in PATH. Please install it or add it to your PATH.", name)
}

/// Runs a prepared command, failing with the tool's stderr on non-zero exit.
fn run_tool(mut cmd: Command, label: &str) -> Result<()> {
    log::debug!("Running {:?}", cmd);
    let start = Instant::now();

    let output = cmd
        .output()
        .with_context(|| format!("Failed to run {}", label))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "{} failed (exit code: {:?}): {}",
            label,
            output.status.code(),
            stderr.trim()
        );
    }

    log::info!("{} finished in {:.1}s", label, start.elapsed().as_secs_f64());
    Ok(())
}

/// MMseqs2 binary handle.
#[derive(Debug, Clone)]
pub struct Mmseqs {
    program: PathBuf,
}

impl Mmseqs {
    /// Locates `mmseqs` (or the given program) on `PATH`.
    pub fn locate(name: &str) -> Result<Self> {
        Ok(Self {
            program: find_executable(name)?,
        })
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// `mmseqs easy-search query target out_m8 tmp_dir --threads N`.
    pub fn easy_search(
        &self,
        query: &Path,
        target: &Path,
        out_m8: &Path,
        tmp_dir: &Path,
        threads: usize,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(tmp_dir)
            .with_context(|| format!("Failed to create {}", tmp_dir.display()))?;
        log::info!(
            "Searching {} against {}",
            query.display(),
            target.display()
        );

        let mut cmd = Command::new(&self.program);
        cmd.arg("easy-search")
            .arg(query)
            .arg(target)
            .arg(out_m8)
            .arg(tmp_dir)
            .arg("--threads")
            .arg(threads.max(1).to_string());
        run_tool(cmd, "mmseqs easy-search")?;

        if !out_m8.exists() {
            anyhow::bail!("mmseqs easy-search produced no output at {}", out_m8.display());
        }
        Ok(out_m8.to_path_buf())
    }

    /// `mmseqs easy-cluster input out_prefix tmp_dir --min-seq-id S -c C --threads N`.
    ///
    /// Returns the `<out_prefix>_cluster.tsv` path.
    pub fn easy_cluster(
        &self,
        input: &Path,
        out_prefix: &Path,
        tmp_dir: &Path,
        min_seq_id: f64,
        coverage: f64,
        threads: usize,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(tmp_dir)
            .with_context(|| format!("Failed to create {}", tmp_dir.display()))?;
        log::info!(
            "Clustering {} (min identity {:.2}, coverage {:.2})",
            input.display(),
            min_seq_id,
            coverage
        );

        let mut cmd = Command::new(&self.program);
        cmd.arg("easy-cluster")
            .arg(input)
            .arg(out_prefix)
            .arg(tmp_dir)
            .arg("--min-seq-id")
            .arg(min_seq_id.to_string())
            .arg("-c")
            .arg(coverage.to_string())
            .arg("--threads")
            .arg(threads.max(1).to_string());
        run_tool(cmd, "mmseqs easy-cluster")?;

        let tsv = cluster_tsv_path(out_prefix);
        if !tsv.exists() {
            anyhow::bail!("mmseqs easy-cluster produced no cluster table at {}", tsv.display());
        }
        Ok(tsv)
    }
}

/// `<prefix>_cluster.tsv`
pub fn cluster_tsv_path(out_prefix: &Path) -> PathBuf {
    let mut name = out_prefix.as_os_str().to_os_string();
    name.push("_cluster.tsv");
    PathBuf::from(name)
}
