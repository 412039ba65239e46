//! Annotation Table Module
//!
//! Builds the per-sequence annotation table (`annotations.tsv`) combining
//! cluster membership, conservation counts, ORF/protein links and the
//! origin encoded in each sequence ID.
//!
//! # Columns
//! ```text
//! (index)  fastaHeader  genomeID  clusterID  nRelatives  nMatchsToRelatives
//! nMatchsToAll  ratio  source  predictionTool  strand  matchedProtSameGenome
//! nMatchesOnProtOthersGenomes  protMatchedID  length  mogID  mogNumber  mogText
//! ```
//! The first column holds the sequence ID and has an empty header.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::path::Path;

use crate::cluster::ClusterMap;
use crate::conservation::ConservationCounts;
use crate::links::LinkTable;
use crate::seqid::{self, sanitize_id, REFERENCE_SOURCE};
use crate::seqio::FastaRecord;

/// Header row of `annotations.tsv`, in serialization order.
pub const COLUMNS: [&str; 18] = [
    "",
    "fastaHeader",
    "genomeID",
    "clusterID",
    "nRelatives",
    "nMatchsToRelatives",
    "nMatchsToAll",
    "ratio",
    "source",
    "predictionTool",
    "strand",
    "matchedProtSameGenome",
    "nMatchesOnProtOthersGenomes",
    "protMatchedID",
    "length",
    "mogID",
    "mogNumber",
    "mogText",
];

/// One row of the annotation table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRow {
    #[serde(rename = "")]
    pub id: String,
    #[serde(rename = "fastaHeader")]
    pub fasta_header: String,
    #[serde(rename = "genomeID")]
    pub genome_id: String,
    #[serde(rename = "clusterID", default)]
    pub cluster_id: Option<String>,
    #[serde(rename = "nRelatives", deserialize_with = "de_count")]
    pub n_relatives: usize,
    #[serde(rename = "nMatchsToRelatives", deserialize_with = "de_count")]
    pub n_matchs_to_relatives: usize,
    #[serde(rename = "nMatchsToAll", deserialize_with = "de_count")]
    pub n_matchs_to_all: usize,
    pub ratio: f64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(rename = "predictionTool", default)]
    pub prediction_tool: Option<String>,
    #[serde(default)]
    pub strand: Option<String>,
    /// `1` when linked to a same-genome protein, `0` when the ORF only has
    /// other hits, empty when the ORF had no hit at all.
    #[serde(rename = "matchedProtSameGenome", default, deserialize_with = "de_flag")]
    pub matched_prot_same_genome: Option<u8>,
    #[serde(rename = "nMatchesOnProtOthersGenomes", default, deserialize_with = "de_count")]
    pub n_matches_on_prot_others_genomes: usize,
    #[serde(rename = "protMatchedID", default)]
    pub prot_matched_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_count")]
    pub length: Option<usize>,
    #[serde(rename = "mogID", default)]
    pub mog_id: Option<String>,
    #[serde(rename = "mogNumber", default)]
    pub mog_number: Option<String>,
    #[serde(rename = "mogText", default)]
    pub mog_text: Option<String>,
}

// ============================================================================
// Lenient numeric fields
// ============================================================================
// Tables written by pandas carry float-formatted integers (`1.0`) and empty
// cells for NaN.

fn whole_number<E: de::Error>(field: &str) -> std::result::Result<Option<u64>, E> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(None);
    }
    let value: f64 = field
        .parse()
        .map_err(|_| E::custom(format!("invalid number: {:?}", field)))?;
    if value.is_nan() {
        return Ok(None);
    }
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(E::custom(format!("expected a whole non-negative number, got {:?}", field)));
    }
    Ok(Some(value as u64))
}

fn de_opt_count<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<usize>, D::Error> {
    match Option::<String>::deserialize(d)? {
        Some(field) => Ok(whole_number::<D::Error>(&field)?.map(|v| v as usize)),
        None => Ok(None),
    }
}

/// Empty cells count as zero.
fn de_count<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<usize, D::Error> {
    Ok(de_opt_count(d)?.unwrap_or(0))
}

fn de_flag<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u8>, D::Error> {
    match de_opt_count(d)? {
        None => Ok(None),
        Some(v @ (0 | 1)) => Ok(Some(v as u8)),
        Some(v) => Err(de::Error::custom(format!("matchedProtSameGenome must be 0 or 1, got {}", v))),
    }
}

impl AnnotationRow {
    /// True when the ORF is linked to a protein predicted on the same genome.
    pub fn has_same_genome_protein(&self) -> bool {
        self.matched_prot_same_genome == Some(1)
    }

    /// True when the genome is its cluster's representative.
    pub fn is_cluster_representative(&self) -> bool {
        self.cluster_id.as_deref() == Some(self.genome_id.as_str())
    }

    pub fn is_reference(&self) -> bool {
        self.source.as_deref() == Some(REFERENCE_SOURCE)
    }
}

/// Ordered annotation rows with an ID index.
#[derive(Debug, Clone, Default)]
pub struct AnnotationTable {
    rows: Vec<AnnotationRow>,
    index: FxHashMap<String, usize>,
    /// Sanitized ID → row, for IDs that differ from their sanitized form.
    sanitized: FxHashMap<String, usize>,
}

impl AnnotationTable {
    /// Inserts a row; a row with an existing ID replaces the old one in place.
    pub fn insert(&mut self, row: AnnotationRow) {
        match self.index.get(&row.id) {
            Some(&i) => self.rows[i] = row,
            None => {
                let i = self.rows.len();
                let clean = sanitize_id(&row.id);
                if clean != row.id {
                    self.sanitized.entry(clean).or_insert(i);
                }
                self.index.insert(row.id.clone(), i);
                self.rows.push(row);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&AnnotationRow> {
        self.index.get(id).map(|&i| &self.rows[i])
    }

    /// Looks up an ID as written, then as the sanitized form found in
    /// embedding and coordinate files (`a_1` for `a.1`).
    pub fn resolve(&self, id: &str) -> Option<&AnnotationRow> {
        self.get(id)
            .or_else(|| self.sanitized.get(id).map(|&i| &self.rows[i]))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut AnnotationRow> {
        match self.index.get(id) {
            Some(&i) => Some(&mut self.rows[i]),
            None => None,
        }
    }

    pub fn rows(&self) -> &[AnnotationRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Reads an annotation TSV. Tables lacking the length or MOG columns load
    /// with those fields empty.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("Failed to open annotation table: {}", path.display()))?;

        let mut table = Self::default();
        for (row_no, result) in reader.deserialize::<AnnotationRow>().enumerate() {
            let row = result
                .with_context(|| format!("Annotation row {} in {}", row_no + 1, path.display()))?;
            table.insert(row);
        }
        Ok(table)
    }

    /// Writes the table as TSV with the [`COLUMNS`] header.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        writer.write_record(COLUMNS)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Inputs joined into the annotation table.
pub struct AnnotationSources<'a> {
    pub clusters: &'a ClusterMap,
    pub counts: &'a ConservationCounts,
    pub links: &'a LinkTable,
}

/// Builds one annotation row for a sequence.
pub fn annotate_record(record: &FastaRecord, sources: &AnnotationSources<'_>) -> AnnotationRow {
    let id = record.name.clone();
    let genome_id = seqid::genome_id(&id).to_string();
    let cluster_id = sources.clusters.cluster_of(&genome_id).map(|c| c.to_string());
    let n_relatives = cluster_id
        .as_deref()
        .map(|c| sources.clusters.size_of(c))
        .unwrap_or(0);

    let n_matchs_to_relatives = sources.counts.near.get(&id).map(|c| c.n_genomes).unwrap_or(0);
    let n_matchs_to_all = sources.counts.all.get(&id).map(|c| c.n_matches).unwrap_or(0);
    let ratio = if n_relatives > 0 {
        n_matchs_to_relatives as f64 / n_relatives as f64
    } else {
        0.0
    };

    let origin = seqid::decode_suffix(&id);

    let (matched_prot_same_genome, n_matches_on_prot_others_genomes, prot_matched_id) =
        match sources.links.get(&id) {
            Some(link) => (
                Some(u8::from(link.same_genome)),
                link.n_matches,
                link.prot_id.clone(),
            ),
            None => (None, 0, None),
        };

    AnnotationRow {
        fasta_header: record.header(),
        genome_id,
        cluster_id,
        n_relatives,
        n_matchs_to_relatives,
        n_matchs_to_all,
        ratio,
        source: origin.source,
        prediction_tool: origin.tool,
        strand: origin.strand,
        matched_prot_same_genome,
        n_matches_on_prot_others_genomes,
        prot_matched_id,
        length: Some(record.seq.len()),
        mog_id: None,
        mog_number: None,
        mog_text: None,
        id,
    }
}

/// Builds the annotation table for every record, keeping record order.
pub fn build_annotations<'r, I>(records: I, sources: &AnnotationSources<'_>) -> AnnotationTable
where
    I: IntoIterator<Item = &'r FastaRecord>,
{
    let mut table = AnnotationTable::default();
    for record in records {
        table.insert(annotate_record(record, sources));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conservation::ConservationCounter;
    use crate::links::DEFAULT_LINK_IDENTITY;

    struct Fixture {
        clusters: ClusterMap,
        counts: ConservationCounts,
        links: LinkTable,
    }

    fn fixture() -> Fixture {
        let clusters = ClusterMap::from_pairs(vec![
            ("gA_1_RefProdPosi", "gA_1_RefProdPosi"),
            ("gA_1_RefProdPosi", "gB_1_RefProdPosi"),
        ]);
        let mut counter = ConservationCounter::new(&clusters);
        counter.add_hit("gA_7_ExpeGetoNega", "gB_2_ExpeGetoNega");
        let counts = counter.finish();

        let mut links = LinkTable::default();
        links.add_hit("gA_7_ExpeGetoNega", "gA_3_RefProdNega", 0.99, DEFAULT_LINK_IDENTITY);

        Fixture { clusters, counts, links }
    }

    #[test]
    fn test_annotate_record_joins_all_sources() {
        let f = fixture();
        let sources = AnnotationSources { clusters: &f.clusters, counts: &f.counts, links: &f.links };
        let mut record = FastaRecord::new("gA_7_ExpeGetoNega", "MKVL");
        record.description = "# 10 # 21".to_string();

        let row = annotate_record(&record, &sources);
        assert_eq!(row.fasta_header, ">gA_7_ExpeGetoNega # 10 # 21");
        assert_eq!(row.genome_id, "gA");
        assert_eq!(row.cluster_id.as_deref(), Some("gA"));
        assert_eq!(row.n_relatives, 2);
        assert_eq!(row.n_matchs_to_relatives, 1);
        assert_eq!(row.n_matchs_to_all, 1);
        assert_eq!(row.ratio, 0.5);
        assert_eq!(row.source.as_deref(), Some("Expe"));
        assert_eq!(row.prediction_tool.as_deref(), Some("Getorf"));
        assert_eq!(row.strand.as_deref(), Some("-"));
        assert!(row.has_same_genome_protein());
        assert_eq!(row.prot_matched_id.as_deref(), Some("gA_3_RefProdNega"));
        assert_eq!(row.length, Some(4));
        assert!(row.is_cluster_representative());
    }

    #[test]
    fn test_unclustered_sequence_has_zero_ratio() {
        let f = fixture();
        let sources = AnnotationSources { clusters: &f.clusters, counts: &f.counts, links: &f.links };
        let row = annotate_record(&FastaRecord::new("zz_1_RefProdPosi", "M"), &sources);
        assert!(row.cluster_id.is_none());
        assert_eq!(row.n_relatives, 0);
        assert_eq!(row.ratio, 0.0);
        assert!(row.matched_prot_same_genome.is_none());
        assert!(row.is_reference());
        assert!(!row.is_cluster_representative());
    }

    #[test]
    fn test_table_write_and_load() {
        let f = fixture();
        let sources = AnnotationSources { clusters: &f.clusters, counts: &f.counts, links: &f.links };
        let records = vec![
            FastaRecord::new("gA_7_ExpeGetoNega", "MKVL"),
            FastaRecord::new("gB_2_ExpeGetoNega", "MKV"),
        ];
        let table = build_annotations(&records, &sources);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotations.tsv");
        table.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("\tfastaHeader\tgenomeID"));

        let loaded = AnnotationTable::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.rows()[0].id, "gA_7_ExpeGetoNega");
        assert_eq!(loaded.get("gA_7_ExpeGetoNega"), table.get("gA_7_ExpeGetoNega"));
        assert!(loaded.get("gB_2_ExpeGetoNega").unwrap().prot_matched_id.is_none());
    }

    #[test]
    fn test_load_table_without_optional_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotations.tsv");
        std::fs::write(
            &path,
            "\tfastaHeader\tgenomeID\tclusterID\tnRelatives\tnMatchsToRelatives\tnMatchsToAll\tratio\n\
             s_1_RefProdPosi\t>s_1_RefProdPosi\ts\ts\t3\t2\t5\t0.6666\n",
        )
        .unwrap();
        let table = AnnotationTable::load(&path).unwrap();
        let row = table.get("s_1_RefProdPosi").unwrap();
        assert_eq!(row.n_relatives, 3);
        assert!(row.length.is_none());
        assert!(row.mog_id.is_none());
    }

    #[test]
    fn test_load_pandas_formatted_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotations.tsv");
        std::fs::write(
            &path,
            "\tfastaHeader\tgenomeID\tclusterID\tnRelatives\tnMatchsToRelatives\tnMatchsToAll\tratio\t\
             source\tpredictionTool\tstrand\tmatchedProtSameGenome\tnMatchesOnProtOthersGenomes\tprotMatchedID\n\
             g_1_ExpeGetoPosi\t>g_1_ExpeGetoPosi\tg\tg\t4.0\t2.0\t7.0\t0.5\tExpe\tGetorf\t+\t1.0\t3.0\tg_2_RefProdPosi\n\
             g_3_ExpeGetoNega\t>g_3_ExpeGetoNega\tg\tg\t4\t0\t0\t0.0\tExpe\tGetorf\t-\t\t\t\n",
        )
        .unwrap();
        let table = AnnotationTable::load(&path).unwrap();

        let linked = table.get("g_1_ExpeGetoPosi").unwrap();
        assert_eq!(linked.n_relatives, 4);
        assert_eq!(linked.n_matchs_to_all, 7);
        assert!(linked.has_same_genome_protein());
        assert_eq!(linked.n_matches_on_prot_others_genomes, 3);

        let unlinked = table.get("g_3_ExpeGetoNega").unwrap();
        assert!(unlinked.matched_prot_same_genome.is_none());
        assert_eq!(unlinked.n_matches_on_prot_others_genomes, 0);
    }

    #[test]
    fn test_load_rejects_non_binary_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotations.tsv");
        std::fs::write(
            &path,
            "\tfastaHeader\tgenomeID\tclusterID\tnRelatives\tnMatchsToRelatives\tnMatchsToAll\tratio\tmatchedProtSameGenome\n\
             s_1_RefProdPosi\t>s_1_RefProdPosi\ts\ts\t1\t0\t0\t0.0\t2.0\n",
        )
        .unwrap();
        assert!(AnnotationTable::load(&path).is_err());
    }

    #[test]
    fn test_resolve_sanitized_id() {
        let mut table = AnnotationTable::default();
        table.insert(AnnotationRow { id: "NC_001422.1_12_RefProdPosi".into(), ..Default::default() });
        assert!(table.get("NC_001422_1_12_RefProdPosi").is_none());
        assert_eq!(
            table.resolve("NC_001422_1_12_RefProdPosi").unwrap().id,
            "NC_001422.1_12_RefProdPosi"
        );
        assert!(table.resolve("NC_001422.1_12_RefProdPosi").is_some());
    }
}
