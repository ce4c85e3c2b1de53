//! Natural ("numeric-run aware") string ordering.

use std::cmp::Ordering;

/// Compares two names the way a file browser lists them: embedded digit runs
/// are compared as numbers, everything else case-insensitively. Names equal
/// under those rules fall back to a plain comparison so the ordering stays
/// total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natord::compare_ignore_case(a, b).then_with(|| a.cmp(b))
}

/// Sorts in place with [`natural_cmp`] applied to the key.
pub fn sort_natural_by_key<T>(items: &mut [T], key: impl Fn(&T) -> &str) {
    items.sort_by(|a, b| natural_cmp(key(a), key(b)));
}
