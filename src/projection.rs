//! Projection Module
//!
//! Projects embedding vectors to 2D for plotting. UMAP runs outside this
//! crate; its `ID x y` output is read with [`read_coordinates`]. The built-in
//! [`PcaProjector`] gives a deterministic linear projection of the same data.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::embedding::EmbeddingMatrix;

/// Distance the projection should respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Euclidean,
    /// Rows are L2-normalised before projecting.
    Cosine,
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" => Ok(Metric::Euclidean),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("Unknown metric '{}'. Use 'cosine' or 'euclidean'.", other)),
        }
    }
}

/// Maps each row of an embedding matrix to a 2D point.
pub trait Projector {
    fn project(&self, data: &EmbeddingMatrix) -> Result<Vec<[f64; 2]>>;
}

// ============================================================================
// PCA
// ============================================================================

/// Two-component PCA by power iteration with deflation.
#[derive(Debug, Clone)]
pub struct PcaProjector {
    pub metric: Metric,
    pub iterations: usize,
    pub seed: u64,
}

impl Default for PcaProjector {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            iterations: 200,
            seed: 42,
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(v: &mut [f64]) -> f64 {
    let norm = dot(v, v).sqrt();
    if norm > f64::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    norm
}

const GRAM_CHUNK: usize = 256;

/// Computes Xᵀ(X v) for centered rows X.
///
/// Partial sums are combined in chunk order so results do not depend on
/// thread scheduling.
fn gram_apply(rows: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    let dim = v.len();
    let partials: Vec<Vec<f64>> = rows
        .par_chunks(GRAM_CHUNK)
        .map(|chunk| {
            let mut acc = vec![0.0; dim];
            for row in chunk {
                let s = dot(row, v);
                for (a, x) in acc.iter_mut().zip(row) {
                    *a += s * x;
                }
            }
            acc
        })
        .collect();

    let mut total = vec![0.0; dim];
    for partial in partials {
        for (t, p) in total.iter_mut().zip(partial) {
            *t += p;
        }
    }
    total
}

impl PcaProjector {
    /// Centers the rows (after L2 normalisation for the cosine metric).
    fn centered_rows(&self, data: &EmbeddingMatrix) -> Vec<Vec<f64>> {
        let dim = data.dimension();
        let mut rows: Vec<Vec<f64>> = data.rows.clone();
        if self.metric == Metric::Cosine {
            rows.par_iter_mut().for_each(|r| {
                normalize(r);
            });
        }

        let mut mean = vec![0.0; dim];
        for row in &rows {
            for (m, x) in mean.iter_mut().zip(row) {
                *m += x;
            }
        }
        for m in &mut mean {
            *m /= rows.len() as f64;
        }
        rows.par_iter_mut().for_each(|r| {
            for (x, m) in r.iter_mut().zip(&mean) {
                *x -= m;
            }
        });
        rows
    }

    /// Leading eigenvector of XᵀX orthogonal to `previous`.
    fn component(&self, rows: &[Vec<f64>], previous: &[Vec<f64>], rng: &mut StdRng) -> Vec<f64> {
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut v: Vec<f64> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let orthogonalize = |v: &mut Vec<f64>| {
            for p in previous {
                let proj = dot(v, p);
                for (x, y) in v.iter_mut().zip(p) {
                    *x -= proj * y;
                }
            }
        };

        orthogonalize(&mut v);
        normalize(&mut v);
        for _ in 0..self.iterations {
            let mut next = gram_apply(rows, &v);
            orthogonalize(&mut next);
            if normalize(&mut next) <= f64::EPSILON {
                // No variance left in this direction
                return vec![0.0; dim];
            }
            v = next;
        }

        // Fix the sign so the largest loading is positive
        let pivot = v
            .iter()
            .copied()
            .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
        if pivot < 0.0 {
            for x in &mut v {
                *x = -*x;
            }
        }
        v
    }
}

impl Projector for PcaProjector {
    fn project(&self, data: &EmbeddingMatrix) -> Result<Vec<[f64; 2]>> {
        if data.is_empty() {
            anyhow::bail!("No vectors to project");
        }
        let rows = self.centered_rows(data);
        let mut rng = StdRng::seed_from_u64(self.seed);

        let pc1 = self.component(&rows, &[], &mut rng);
        let pc2 = self.component(&rows, &[pc1.clone()], &mut rng);

        Ok(rows.iter().map(|r| [dot(r, &pc1), dot(r, &pc2)]).collect())
    }
}

// ============================================================================
// Coordinates TSV
// ============================================================================

/// One projected point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    #[serde(rename = "ID")]
    pub id: String,
    pub x: f64,
    pub y: f64,
}

/// Pairs IDs with projected points.
pub fn to_coordinates(ids: &[String], points: &[[f64; 2]]) -> Vec<Coordinate> {
    ids.iter()
        .zip(points)
        .map(|(id, p)| Coordinate { id: id.clone(), x: p[0], y: p[1] })
        .collect()
}

/// Writes `ID\tx\ty` with a header row.
pub fn write_coordinates<P: AsRef<Path>>(path: P, coords: &[Coordinate]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for c in coords {
        writer.serialize(c)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a coordinates TSV (`ID`, `x`, `y` columns, extra columns ignored).
pub fn read_coordinates<P: AsRef<Path>>(path: P) -> Result<Vec<Coordinate>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("Failed to open coordinates: {}", path.display()))?;
    let mut coords = Vec::new();
    for (row_no, result) in reader.deserialize::<Coordinate>().enumerate() {
        coords.push(result.with_context(|| format!("Coordinate row {} in {}", row_no + 1, path.display()))?);
    }
    Ok(coords)
}
