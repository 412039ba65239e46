use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ALLSEQS: &str = "\
>gA_1_RefProdPosi
MKVLAAGTRW
>gA_2_ExpeGetoNega
MSTRNGPLKE
>gB_1_RefProdPosi
MKVLAAGTRW
>gB_2_ExpeGetoPosi
MPQRSTVWYA
>gC_1_ExpeGetoPosi
MWWCHHKKDE
";

const CLUSTERS: &str = "\
gA_1_RefProdPosi\tgA_1_RefProdPosi
gA_1_RefProdPosi\tgB_1_RefProdPosi
gC_1_ExpeGetoPosi\tgC_1_ExpeGetoPosi
";

const LINKS_M8: &str = "\
gB_2_ExpeGetoPosi\tgB_1_RefProdPosi\t0.990\t10\t0\t0\t1\t10\t1\t10\t1e-5\t20
gA_2_ExpeGetoNega\tgB_1_RefProdPosi\t0.400\t10\t6\t0\t1\t10\t1\t10\t1e-1\t5
";

const SELF_M8: &str = "\
gA_1_RefProdPosi\tgB_1_RefProdPosi\t1.000\t10\t0\t0\t1\t10\t1\t10\t1e-8\t30
gA_2_ExpeGetoNega\tgC_1_ExpeGetoPosi\t0.500\t10\t5\t0\t1\t10\t1\t10\t1e-2\t8
";

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let fixture = Self { dir: tempfile::tempdir().unwrap() };
        fixture.write("allseqs.faa", ALLSEQS);
        fixture.write("cluster.tsv", CLUSTERS);
        fixture.write("links.m8", LINKS_M8);
        fixture.write("self.m8", SELF_M8);
        fixture
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn read(&self, name: &str) -> String {
        fs::read_to_string(self.path(name)).unwrap()
    }

    fn phagemap(&self) -> Command {
        let mut cmd = Command::cargo_bin("phagemap").unwrap();
        cmd.current_dir(self.dir.path()).arg("--threads").arg("1");
        cmd
    }

    /// links → conservation → annotate
    fn annotate(&self) {
        self.phagemap()
            .args(["links", "-m", "links.m8", "-o", "links.tsv"])
            .assert()
            .success();
        self.phagemap()
            .args(["conservation", "-m", "self.m8", "-c", "cluster.tsv"])
            .args(["--out-all", "all.tsv", "--out-near", "near.tsv"])
            .assert()
            .success();
        self.phagemap()
            .args(["annotate", "-f", "allseqs.faa", "-c", "cluster.tsv", "-l", "links.tsv"])
            .args(["--match-all", "all.tsv", "--match-near", "near.tsv", "-o", "annotations.tsv"])
            .assert()
            .success();
    }
}

fn data_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .map(|l| l.to_string())
        .collect()
}

#[test]
fn annotate_then_extract() {
    let f = Fixture::new();
    f.annotate();

    let links = f.read("links.tsv");
    assert!(links.starts_with("\tprotID\tmatchedProtSameGenome\tnMatchesOnProtOthersGenomes\n"));
    assert!(links.contains("gB_2_ExpeGetoPosi\tgB_1_RefProdPosi\t1\t1"));

    let rows = data_lines(&f.path("annotations.tsv"));
    assert_eq!(rows.len(), 5);
    assert!(rows[0].starts_with("gA_1_RefProdPosi\t>gA_1_RefProdPosi\tgA\tgA\t2\t1\t1\t0.5\tRef\tProdigal\t+"));

    f.phagemap()
        .args(["extract", "-a", "annotations.tsv", "-f", "allseqs.faa"])
        .args(["-o", "candidates.faa", "--ids-out", "ids.txt"])
        .assert()
        .success();

    // gA_2 has a link row (no same-genome protein) and gB_2 is linked, so both are excluded
    assert_eq!(f.read("ids.txt"), "gA_1_RefProdPosi\ngB_1_RefProdPosi\ngC_1_ExpeGetoPosi\n");
    assert!(f.read("candidates.faa").starts_with(">gA_1_RefProdPosi\nMKVLAAGTRW\n"));
}

#[test]
fn mogs_enrich_in_place() {
    let f = Fixture::new();
    f.annotate();
    f.write("mogs.faa", ">MOG0042 42 Portal protein\nMKV\n>MOGBAD\nMKV\n");
    f.write("mogs.m8", "gC_1_ExpeGetoPosi\tMOG0042\t0.5\t10\t5\t0\t1\t10\t1\t10\t1e-3\t10\n");

    f.phagemap()
        .args(["mogs", "-a", "annotations.tsv", "-d", "mogs.faa", "-m", "mogs.m8"])
        .assert()
        .success();

    let row = data_lines(&f.path("annotations.tsv"))
        .into_iter()
        .find(|l| l.starts_with("gC_1_ExpeGetoPosi"))
        .unwrap();
    assert!(row.ends_with("\tMOG0042\t42\tPortal protein"));
}

#[test]
fn embed_project_plot() {
    let f = Fixture::new();
    f.annotate();
    f.write("ids.txt", "gA_1_RefProdPosi\ngA_2_ExpeGetoNega\ngC_1_ExpeGetoPosi\n");

    f.phagemap()
        .args(["embed", "-f", "allseqs.faa", "-i", "ids.txt", "-o", "embeddings.tsv"])
        .assert()
        .success();
    let embeddings = f.read("embeddings.tsv");
    assert_eq!(embeddings.lines().count(), 3);
    assert!(embeddings
        .lines()
        .all(|l| l.split('\t').nth(1).unwrap().split(' ').count() == 420));

    f.phagemap()
        .args(["project", "-e", "embeddings.tsv", "-o", "coords.tsv"])
        .assert()
        .success();
    let coords = f.read("coords.tsv");
    assert!(coords.starts_with("ID\tx\ty\n"));
    assert_eq!(coords.lines().count(), 4);

    f.phagemap()
        .args(["plot", "-c", "coords.tsv", "-a", "annotations.tsv", "-o", "map.html"])
        .args(["--title", "Test map"])
        .assert()
        .success();
    let html = f.read("map.html");
    assert!(html.contains("<title>Test map</title>"));
    assert!(html.contains("Plotly.newPlot('plotly-graph'"));
    assert!(html.contains("gC_1_ExpeGetoPosi"));
}

#[test]
fn dotted_ids_survive_embed_project_plot() {
    let f = Fixture::new();
    f.annotate();
    f.write(
        "dotted.faa",
        ">NC_001422.1_12_RefProdPosi\nMKVLAAGTRW\n\
         >NC_001422.1_13_ExpeGetoNega\nMSTRNGPLKE\n\
         >gC_1_ExpeGetoPosi\nMWWCHHKKDE\n",
    );
    f.phagemap()
        .args(["annotate", "-f", "dotted.faa", "-c", "cluster.tsv", "-l", "links.tsv"])
        .args(["--match-all", "all.tsv", "--match-near", "near.tsv", "-o", "dotted.tsv"])
        .assert()
        .success();
    f.write("ids.txt", "NC_001422.1_12_RefProdPosi\nNC_001422.1_13_ExpeGetoNega\ngC_1_ExpeGetoPosi\n");

    f.phagemap()
        .args(["embed", "-f", "dotted.faa", "-i", "ids.txt", "-o", "out/new/embeddings.tsv"])
        .arg("--auto-shrink")
        .assert()
        .success();
    let ids: Vec<String> = f
        .read("out/new/embeddings.tsv")
        .lines()
        .map(|l| l.split('\t').next().unwrap().to_string())
        .collect();
    assert_eq!(
        ids,
        vec!["NC_001422_1_12_RefProdPosi", "NC_001422_1_13_ExpeGetoNega", "gC_1_ExpeGetoPosi"]
    );

    f.phagemap()
        .args(["project", "-e", "out/new/embeddings.tsv", "-i", "ids.txt", "-o", "coords.tsv"])
        .assert()
        .success();
    assert_eq!(f.read("coords.tsv").lines().count(), 4);

    f.phagemap()
        .args(["plot", "-c", "coords.tsv", "-a", "dotted.tsv", "-o", "map.html"])
        .assert()
        .success();
    let html = f.read("map.html");
    assert!(html.contains("Strand + (2)"));
    assert!(html.contains("Strand - (1)"));
    assert!(!html.contains("Strand NA"));
}

#[test]
fn run_with_precomputed_inputs() {
    let f = Fixture::new();
    f.phagemap()
        .args(["run", "-f", "allseqs.faa", "-c", "cluster.tsv"])
        .args(["--links-m8", "links.m8", "--self-m8", "self.m8", "-o", "results"])
        .assert()
        .success();

    for name in [
        "liens_orf_prot.tsv",
        "match_vs_all.tsv",
        "match_vs_near.tsv",
        "annotations.tsv",
        "candidates.faa",
        "candidate_ids.txt",
        "run_manifest.json",
    ] {
        assert!(f.path("results").join(name).exists(), "missing {}", name);
    }
    let leftovers: Vec<_> = fs::read_dir(f.path("results"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("phagemap_"))
        .collect();
    assert!(leftovers.is_empty(), "scratch dirs left: {:?}", leftovers);
}

#[test]
fn run_keeps_existing_tmp_dir() {
    let f = Fixture::new();
    fs::create_dir_all(f.path("results/tmp")).unwrap();
    f.write("results/tmp/precious.txt", "keep me");
    f.write("results/tmp/cluster.tsv", CLUSTERS);

    f.phagemap()
        .args(["run", "-f", "allseqs.faa", "-c", "cluster.tsv"])
        .args(["--links-m8", "links.m8", "--self-m8", "self.m8", "-o", "results"])
        .assert()
        .success();

    assert_eq!(f.read("results/tmp/precious.txt"), "keep me");
    assert_eq!(f.read("results/tmp/cluster.tsv"), CLUSTERS);
}

#[test]
fn rejects_out_of_range_arguments() {
    let f = Fixture::new();
    f.phagemap()
        .args(["links", "-m", "links.m8", "-i", "1.5"])
        .assert()
        .failure();
    f.phagemap()
        .args(["plot", "-c", "coords.tsv", "-a", "annotations.tsv", "--opacity", "0.1"])
        .assert()
        .failure();
}

#[test]
fn missing_input_fails() {
    let f = Fixture::new();
    f.phagemap()
        .args(["conservation", "-m", "absent.m8", "-c", "cluster.tsv"])
        .assert()
        .failure();
}
