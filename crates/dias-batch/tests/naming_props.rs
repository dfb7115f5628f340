use dias_batch::naming::{next_suffix, resolve, stem};
use proptest::prelude::*;

#[test]
fn documented_examples() {
    assert_eq!(
        next_suffix("X1-S1_SNV", ["X1-S1_SNV_1.xlsx", "X1-S1_SNV_2.xlsx"]),
        3
    );
    assert_eq!(next_suffix("X1-S1_SNV", Vec::<&str>::new()), 1);
    assert_eq!(resolve("X1-S1_SNV", &["X1-S1_SNV_1.xlsx"]), "X1-S1_SNV_2");
}

#[test]
fn stem_of_single_gene_groups() {
    assert_eq!(stem("X1-S1", &["_HGNC:1100"]), "X1-S1__HGNC_1100");
    assert_eq!(stem::<&str>("X1-S1", &[]), "X1-S1");
}

proptest! {
    #[test]
    fn resolved_name_is_never_taken(
        suffixes in prop::collection::vec(0u64..500, 0..20),
        extensions in prop::collection::vec(prop_oneof![Just(""), Just(".xlsx"), Just(".html")], 20),
        noise in prop::collection::vec("[A-Za-z0-9_.]{1,12}", 0..10),
    ) {
        let base = "X1-S1_R207.1";
        let mut existing: Vec<String> = suffixes
            .iter()
            .zip(&extensions)
            .map(|(suffix, ext)| format!("{base}_{suffix}{ext}"))
            .collect();
        // Bare suffixed stems are what resolve itself produces.
        existing.extend(suffixes.iter().map(|suffix| format!("{base}_{suffix}")));
        existing.extend(noise);
        let name = resolve(base, &existing);
        prop_assert!(!existing.contains(&name));
        let expected = suffixes.iter().max().map_or(1, |max| max + 1);
        prop_assert_eq!(next_suffix(base, &existing), expected);
    }
}
