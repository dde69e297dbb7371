//! Topic matching for the dispatch engine.
//!
//! Topics and filters are dot-delimited paths. Two paths overlap when one is
//! a prefix of the other at segment granularity, so `"a.b"` overlaps `"a"`
//! and `"a.b.c"` but not `"ab"`.

use crate::event::FireEvent;
use crate::state::PATH_SEPARATOR;

use super::listener::Listener;

/// Quoting marker allowed in filter entries; ignored when matching.
pub const ESCAPE_MARKER: char = '`';

/// Removes escape markers from a filter entry.
#[must_use]
pub fn strip_escapes(path: &str) -> String {
    path.replace(ESCAPE_MARKER, "")
}

/// True if `prefix` equals `path` or names one of its ancestors.
#[must_use]
pub fn is_path_prefix(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with(PATH_SEPARATOR),
        None => false,
    }
}

/// True if either path is a segment-wise prefix of the other.
#[must_use]
pub fn paths_overlap(a: &str, b: &str) -> bool {
    is_path_prefix(a, b) || is_path_prefix(b, a)
}

/// Decides whether `listener` is interested in this fire.
///
/// Bubbled events only reach listeners that either name a nested path (which
/// is matched against the composed bubbling paths) or opt in through
/// `allow_bubbling`.
pub(crate) fn listener_matches(listener: &Listener, active: &[String], event: &FireEvent) -> bool {
    let opted_in = !event.is_bubbling() || listener.params().allow_bubbling;
    let paths = listener.filter().paths();
    if paths.is_empty() {
        return opted_in;
    }

    paths.iter().any(|raw| {
        let entry = strip_escapes(raw);
        let candidates: &[String] = match &event.bubbling {
            Some(bubbling) if entry.contains(PATH_SEPARATOR) => bubbling,
            _ if opted_in => active,
            _ => &[],
        };
        candidates.iter().any(|candidate| paths_overlap(&entry, candidate))
    })
}
