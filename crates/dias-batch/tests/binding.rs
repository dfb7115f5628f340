use std::collections::BTreeSet;

use dias_batch::bind::missing_category;
use dias_batch::{parse_manifest, ManifestFileBinder, RoleSpec};
use dias_core::{ContainerId, DiasError, Location, MemoryStore, StorageState};
use proptest::prelude::*;

const PROJECT: &str = "project-run";

fn root() -> Location {
    Location::new(ContainerId::new(PROJECT), "/output/single")
}

fn role(name: &str, pattern: &str, required: bool) -> RoleSpec {
    RoleSpec {
        role: name.to_string(),
        location: root(),
        subdir: None,
        pattern: pattern.to_string(),
        required,
    }
}

fn add(store: &MemoryStore, folder: &str, name: &str) {
    store.add_file(PROJECT, folder, name, StorageState::Live, b"");
}

#[test]
fn sample_without_required_file_is_dropped_and_recorded() {
    let store = MemoryStore::new();
    add(&store, "/output/single/vcf", "A_markdup.vcf.gz");
    add(&store, "/output/single/bam", "A_markdup.bam");
    add(&store, "/output/single/bam", "B_markdup.bam");
    let manifest = parse_manifest("A\tR1.1\nB\tR1.1\n").expect("manifest");

    let bound = ManifestFileBinder::new(&store)
        .bind(
            &manifest,
            &[role("vcf", r"\.vcf\.gz$", true), role("bam", r"\.bam$", true)],
            &BTreeSet::new(),
        )
        .expect("bind");
    assert_eq!(bound.samples(), BTreeSet::from(["A".to_string()]));
    assert_eq!(bound.errors[&missing_category("vcf")], vec!["B"]);
    assert!(!bound.errors.contains_key(&missing_category("bam")));
    assert_eq!(bound.files("A", "vcf").len(), 1);
    assert!(bound.files("B", "bam").is_empty());
}

#[test]
fn optional_roles_are_reported_but_keep_the_sample() {
    let store = MemoryStore::new();
    add(&store, "/output/single/vcf", "A.vcf.gz");
    add(&store, "/output/single/vcf", "B.vcf.gz");
    add(&store, "/output/single/cnv", "A_segments.vcf");
    let manifest = parse_manifest("A\tR1.1\nB\tR1.1\n").expect("manifest");

    let bound = ManifestFileBinder::new(&store)
        .bind(
            &manifest,
            &[role("vcf", r"\.vcf\.gz$", true), role("cnv", r"_segments\.vcf$", false)],
            &BTreeSet::new(),
        )
        .expect("bind");
    assert_eq!(bound.entries.len(), 2);
    assert_eq!(bound.errors[&missing_category("cnv")], vec!["B"]);
}

#[test]
fn excluded_samples_are_listed_not_errored() {
    let store = MemoryStore::new();
    add(&store, "/output/single", "A.vcf.gz");
    let manifest = parse_manifest("A\tR1.1\nB\tR1.1\n").expect("manifest");
    let bound = ManifestFileBinder::new(&store)
        .bind(
            &manifest,
            &[role("vcf", r"\.vcf\.gz$", true)],
            &BTreeSet::from(["B".to_string()]),
        )
        .expect("bind");
    assert_eq!(bound.excluded, vec!["B"]);
    assert!(bound.errors.is_empty());
}

#[test]
fn prefix_samples_do_not_steal_files() {
    let store = MemoryStore::new();
    add(&store, "/output/single", "X12_markdup.bam");
    let manifest = parse_manifest("X1\tR1.1\nX12\tR1.1\n").expect("manifest");
    let bound = ManifestFileBinder::new(&store)
        .bind(&manifest, &[role("bam", r"\.bam$", false)], &BTreeSet::new())
        .expect("bind");
    assert!(bound.files("X1", "bam").is_empty());
    assert_eq!(bound.files("X12", "bam").len(), 1);
}

#[test]
fn subdir_filter_limits_the_search() {
    let store = MemoryStore::new();
    add(&store, "/output/single/old_vcf", "A.vcf.gz");
    let manifest = parse_manifest("A\tR1.1\n").expect("manifest");
    let mut vcf = role("vcf", r"\.vcf\.gz$", true);
    vcf.subdir = Some("vcf".to_string());
    let err = ManifestFileBinder::new(&store)
        .bind(&manifest, &[vcf], &BTreeSet::new())
        .expect_err("nothing bound");
    assert!(matches!(err, DiasError::EmptyManifestAfterFiltering(_)));
}

proptest! {
    #[test]
    fn dispatch_set_is_samples_minus_those_missing_a_required_role(
        has_vcf in prop::collection::vec(any::<bool>(), 1..12),
        has_bam in prop::collection::vec(any::<bool>(), 12),
    ) {
        let store = MemoryStore::new();
        let mut lines = String::new();
        let mut expected = 0;
        for (index, vcf) in has_vcf.iter().enumerate() {
            let sample = format!("S{index}");
            lines.push_str(&format!("{sample}\tR1.1\n"));
            if *vcf {
                add(&store, "/output/single", &format!("{sample}.vcf.gz"));
            }
            if has_bam[index] {
                add(&store, "/output/single", &format!("{sample}.bam"));
            }
            if *vcf {
                expected += 1;
            }
        }
        let manifest = parse_manifest(&lines).unwrap();
        let roles = [role("vcf", r"\.vcf\.gz$", true), role("bam", r"\.bam$", false)];
        match ManifestFileBinder::new(&store).bind(&manifest, &roles, &BTreeSet::new()) {
            Ok(bound) => {
                prop_assert_eq!(bound.entries.len(), expected);
                for entry in &bound.entries {
                    prop_assert!(!bound.files(&entry.sample_id, "vcf").is_empty());
                }
                let missing = bound.errors.get("missing vcf").map_or(0, Vec::len);
                prop_assert_eq!(missing + expected, has_vcf.len());
            }
            Err(err) => {
                prop_assert_eq!(expected, 0);
                prop_assert!(matches!(err, DiasError::EmptyManifestAfterFiltering(_)));
            }
        }
    }
}
