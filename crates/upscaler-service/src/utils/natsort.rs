//! Natural ("numeric-aware") string ordering.
//!
//! Runs of ASCII digits are compared by their numeric value, everything else character by
//! character. So `"page2"` sorts before `"page10"`, and `"2"` before `"10"`.

use std::cmp::Ordering;

/// Compares two strings in natural order.
///
/// [`natord`] considers some distinct strings equal, such as ones differing only in
/// whitespace. Those are ordered lexicographically, so this is a total order consistent with
/// `==`, as the scheduler's heap needs.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natord::compare(a, b).then_with(|| a.cmp(b))
}
