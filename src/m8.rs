//! M8 (BLAST tabular) Parser Module
//!
//! Parses the default tabular output of MMseqs2 `easy-search`, which follows
//! the BLAST `-outfmt 6` (m8) column layout.
//!
//! # Columns
//! ```text
//! Col  Type    Description
//! 1    string  Query identifier
//! 2    string  Target identifier
//! 3    float   Fraction identity (0-1 for MMseqs2)
//! 4    int     Alignment length
//! 5    int     Mismatches
//! 6    int     Gap openings
//! 7    int     Query start
//! 8    int     Query end
//! 9    int     Target start
//! 10   int     Target end
//! 11   float   E-value
//! 12   float   Bit score
//! ```
//!
//! Only the first two columns are mandatory; trimmed hit files
//! (query/target only) parse fine.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

// ============================================================================
// M8 Record
// ============================================================================

/// A single alignment hit.
#[derive(Debug, Clone, PartialEq)]
pub struct M8Record {
    pub query: String,
    pub target: String,
    /// Identity as emitted by the search tool (fraction for MMseqs2).
    pub identity: Option<f64>,
    pub aln_len: Option<usize>,
    pub mismatches: Option<usize>,
    pub gap_opens: Option<usize>,
    pub query_start: Option<usize>,
    pub query_end: Option<usize>,
    pub target_start: Option<usize>,
    pub target_end: Option<usize>,
    pub evalue: Option<f64>,
    pub bits: Option<f64>,
}

fn parse_column<T: std::str::FromStr>(fields: &[&str], idx: usize, name: &str) -> Result<Option<T>> {
    match fields.get(idx) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("Invalid {} '{}'", name, raw)),
    }
}

impl M8Record {
    /// Parses one whitespace-separated m8 line.
    ///
    /// # Errors
    /// Returns an error if the line has fewer than 2 fields or a present
    /// numeric column does not parse.
    pub fn parse_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            anyhow::bail!("Invalid m8 line: fewer than 2 fields");
        }

        Ok(Self {
            query: fields[0].to_string(),
            target: fields[1].to_string(),
            identity: parse_column(&fields, 2, "identity")?,
            aln_len: parse_column(&fields, 3, "alignment length")?,
            mismatches: parse_column(&fields, 4, "mismatches")?,
            gap_opens: parse_column(&fields, 5, "gap openings")?,
            query_start: parse_column(&fields, 6, "query start")?,
            query_end: parse_column(&fields, 7, "query end")?,
            target_start: parse_column(&fields, 8, "target start")?,
            target_end: parse_column(&fields, 9, "target end")?,
            evalue: parse_column(&fields, 10, "e-value")?,
            bits: parse_column(&fields, 11, "bit score")?,
        })
    }

    /// True for a sequence aligned against itself.
    pub fn is_self_hit(&self) -> bool {
        self.query == self.target
    }
}

// ============================================================================
// M8 Reader
// ============================================================================

/// Sequential reader for m8 files.
pub struct M8Reader {
    reader: BufReader<File>,
    line_buf: String,
    line_no: usize,
}

impl M8Reader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open m8: {}", path.as_ref().display()))?;
        Ok(Self {
            reader: BufReader::with_capacity(1024 * 1024, file),
            line_buf: String::with_capacity(256),
            line_no: 0,
        })
    }

    /// Reads the next hit, skipping empty lines.
    pub fn read_next(&mut self) -> Result<Option<M8Record>> {
        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = self.line_buf.trim();
            if line.is_empty() {
                continue;
            }

            let record = M8Record::parse_line(line)
                .with_context(|| format!("m8 line {}", self.line_no))?;
            return Ok(Some(record));
        }
    }
}

impl Iterator for M8Reader {
    type Item = Result<M8Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
