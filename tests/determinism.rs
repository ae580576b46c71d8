#[path = "common/mod.rs"]
mod common;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use blake3::Hasher;
use sewerscan::OutputLayout;

fn fingerprint_outputs(root: &Path) -> blake3::Hash {
    let layout = OutputLayout::new(root);
    let mut hasher = Hasher::new();
    let mut files = vec![layout.monitored_mutations(), layout.surveillance_table()];
    for sample in ["s1", "s2"] {
        files.push(layout.full_pileup(sample));
        files.push(layout.mutations_pileup(sample));
    }
    for file in files {
        hasher.update(file.strip_prefix(root).unwrap().to_string_lossy().as_bytes());
        hasher.update(&fs::read(&file).expect("output exists"));
    }
    hasher.finalize()
}

#[test]
fn parallel_runs_produce_identical_outputs() {
    let mut fingerprints = HashSet::new();
    let mut catalogs = HashSet::new();
    for threads in [1, 2, 4, 4, 8] {
        let dir = tempfile::tempdir().unwrap();
        let report = common::run_fixture(common::config().with_threads(threads), dir.path());
        fingerprints.insert(fingerprint_outputs(dir.path()));
        catalogs.insert(report.catalog_fingerprint);
    }

    assert_eq!(fingerprints.len(), 1, "outputs diverged across runs");
    assert_eq!(catalogs.len(), 1, "catalog fingerprint diverged across runs");
}

#[test]
fn row_sorting_changes_the_catalog_fingerprint() {
    let sorted = common::pipeline(common::config());
    let unsorted = common::pipeline(common::config().with_sorted_mutation_rows(false));
    assert_ne!(
        sorted.mutations().fingerprint(),
        unsorted.mutations().fingerprint()
    );
}
