//! Collision-free output names.
//!
//! Reports for the same sample and tests accumulate across runs, so every
//! new output takes the next integer suffix after the ones already present.

use regex::Regex;

/// `<sample>_<codes joined by _>`, with `:` of single-gene codes replaced.
pub fn stem<S: AsRef<str>>(sample: &str, codes: &[S]) -> String {
    let mut parts = vec![sample.to_string()];
    parts.extend(codes.iter().map(|code| code.as_ref().replace(':', "_")));
    parts.join("_")
}

/// One more than the highest suffix among names `<stem>_<int>[.<ext>]`, or
/// `1` when none match.
pub fn next_suffix<I, S>(stem: &str, existing: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let pattern = format!(r"^{}_(\d+)(?:\..*)?$", regex::escape(stem));
    let Ok(suffixed) = Regex::new(&pattern) else {
        return 1;
    };
    existing
        .into_iter()
        .filter_map(|name| {
            suffixed
                .captures(name.as_ref())
                .and_then(|caps| caps.get(1))
                .and_then(|suffix| suffix.as_str().parse::<u64>().ok())
        })
        .max()
        .map_or(1, |highest| highest.saturating_add(1))
}

/// `<stem>_<next_suffix>`; never equal to any name in `existing`.
pub fn resolve<S: AsRef<str>>(stem: &str, existing: &[S]) -> String {
    format!("{stem}_{}", next_suffix(stem, existing))
}

/// Regex matching prior outputs of `stem`, for store searches.
pub fn prior_outputs_pattern(stem: &str) -> String {
    format!(r"^{}_\d+", regex::escape(stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_replaces_colons() {
        assert_eq!(stem("X1-S1", &["R207.1", "_HGNC:123"]), "X1-S1_R207.1__HGNC_123");
    }

    #[test]
    fn suffix_after_existing() {
        let existing = ["X1-S1_SNV_1.xlsx", "X1-S1_SNV_2.xlsx"];
        assert_eq!(next_suffix("X1-S1_SNV", existing), 3);
        assert_eq!(next_suffix("X1-S1_SNV", Vec::<String>::new()), 1);
    }

    #[test]
    fn other_stems_are_ignored() {
        let existing = ["X1-S1_SNV_extra_7.xlsx", "X1-S12_SNV_9.xlsx"];
        assert_eq!(next_suffix("X1-S1_SNV", existing), 1);
    }
}
