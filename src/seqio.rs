//! Sequence I/O Module
//!
//! Reading and writing of protein/nucleotide FASTA files and plain ID lists.
//! FASTA files ending in `.gz` are decompressed on the fly.
//!
//! # Examples
//! ```no_run
//! use phagemap::seqio::FastaReader;
//!
//! let mut reader = FastaReader::open("allseqs.faa").unwrap();
//! while let Some(record) = reader.read_next().unwrap() {
//!     println!("{}: {} aa", record.name, record.seq.len());
//! }
//! ```

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

// ============================================================================
// FASTA Format
// ============================================================================

/// A FASTA record.
#[derive(Debug, Clone, PartialEq)]
pub struct FastaRecord {
    /// Sequence identifier (text after '>' up to the first whitespace).
    pub name: String,
    /// Remainder of the header line after the identifier, trimmed.
    pub description: String,
    /// Sequence, concatenated from all sequence lines.
    pub seq: String,
    /// Header line exactly as read (without '>' and line ending).
    pub raw_header: Option<String>,
}

impl FastaRecord {
    pub fn new(name: impl Into<String>, seq: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            seq: seq.into(),
            raw_header: None,
        }
    }

    /// Header line as it appeared in the file, including the leading '>'.
    /// Records built in memory get `>name description`.
    pub fn header(&self) -> String {
        if let Some(raw) = &self.raw_header {
            format!(">{}", raw)
        } else if self.description.is_empty() {
            format!(">{}", self.name)
        } else {
            format!(">{} {}", self.name, self.description)
        }
    }
}

/// Parsed header: identifier, description and the untouched line.
type Header = (String, String, String);

/// Splits a header line (without '>') into identifier and description.
fn split_header(line: &str) -> Header {
    let raw = line.trim_end_matches(['\n', '\r']);
    let mut parts = raw.trim_end().splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or("").to_string();
    let description = parts.next().unwrap_or("").trim().to_string();
    (name, description, raw.to_string())
}

/// Sequential reader for FASTA files, plain or gzip-compressed.
///
/// Reads records one at a time. Handles multi-line sequences and strips
/// line endings.
pub struct FastaReader {
    reader: BufReader<Box<dyn Read>>,
    line_buf: String,
    current_header: Option<Header>,
}

impl FastaReader {
    /// Opens a FASTA file. Files with a `.gz` extension are decompressed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open FASTA: {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let inner: Box<dyn Read> = if ext == "gz" {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Self::from_reader(inner)
    }

    /// Wraps any reader, e.g. an in-memory buffer.
    pub fn from_reader(inner: Box<dyn Read>) -> Result<Self> {
        let mut reader = Self {
            reader: BufReader::with_capacity(1024 * 1024, inner),
            line_buf: String::with_capacity(256),
            current_header: None,
        };

        // Skip anything before the first header
        loop {
            reader.line_buf.clear();
            if reader.reader.read_line(&mut reader.line_buf)? == 0 {
                break;
            }
            if let Some(rest) = reader.line_buf.strip_prefix('>') {
                reader.current_header = Some(split_header(rest));
                break;
            }
        }

        Ok(reader)
    }

    /// Reads the next FASTA record.
    ///
    /// # Returns
    /// - `Ok(Some(record))` - Successfully read a record
    /// - `Ok(None)` - End of file reached
    /// - `Err(e)` - I/O error occurred
    pub fn read_next(&mut self) -> Result<Option<FastaRecord>> {
        let (name, description, raw) = match self.current_header.take() {
            Some(h) => h,
            None => return Ok(None),
        };

        let mut seq = String::with_capacity(1024);

        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                break;
            }

            if let Some(rest) = self.line_buf.strip_prefix('>') {
                self.current_header = Some(split_header(rest));
                break;
            }
            seq.push_str(self.line_buf.trim());
        }

        Ok(Some(FastaRecord {
            name,
            description,
            seq,
            raw_header: Some(raw),
        }))
    }
}

impl Iterator for FastaReader {
    type Item = Result<FastaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Loads a whole FASTA file into an ID → sequence map.
///
/// Later records with a duplicate ID replace earlier ones.
pub fn read_fasta_map<P: AsRef<Path>>(path: P) -> Result<FxHashMap<String, String>> {
    let mut map = FxHashMap::default();
    for record in FastaReader::open(path)? {
        let record = record?;
        map.insert(record.name, record.seq);
    }
    Ok(map)
}

/// Loads every record of a FASTA file, keeping file order.
pub fn read_fasta_records<P: AsRef<Path>>(path: P) -> Result<Vec<FastaRecord>> {
    FastaReader::open(path)?.collect()
}

/// Writes records as two-line FASTA (header, sequence).
pub fn write_fasta<'a, P, I>(path: P, records: I) -> Result<usize>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = &'a FastaRecord>,
{
    let path = path.as_ref();
    let mut writer = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    let mut written = 0;
    for record in records {
        writeln!(writer, "{}", record.header())?;
        writeln!(writer, "{}", record.seq)?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

// ============================================================================
// ID Lists
// ============================================================================

/// Reads a one-ID-per-line file. Blank lines and `#` comments are skipped.
pub fn read_id_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open ID list: {}", path.display()))?;
    let mut ids = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let id = line.trim();
        if id.is_empty() || id.starts_with('#') {
            continue;
        }
        ids.push(id.to_string());
    }
    Ok(ids)
}

pub fn write_id_list<P: AsRef<Path>>(path: P, ids: &[String]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    for id in ids {
        writeln!(writer, "{}", id)?;
    }
    writer.flush()?;
    Ok(())
}
