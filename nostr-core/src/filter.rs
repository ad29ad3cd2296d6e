//! Filter matching.
//!
//! Pure predicates over an [`Event`] and one or more [`Filter`]s. Used by the
//! relay for live broadcast fan-out and to re-check rows returned by storage.

use nostr_types::{Event, Filter};

/// Maximum length of an id or pubkey prefix (full 32-byte hex value).
const MAX_PREFIX_LEN: usize = 64;

/// Does `event` satisfy every constraint of `filter`?
///
/// Absent fields are satisfied. An unsatisfiable filter (one that carried
/// something uninterpretable) never matches.
pub fn matches_filter(filter: &Filter, event: &Event) -> bool {
    if filter.is_unsatisfiable() {
        return false;
    }

    if let Some(ids) = &filter.ids {
        if !ids.iter().any(|prefix| hex_prefix_matches(prefix, &event.id)) {
            return false;
        }
    }

    if let Some(authors) = &filter.authors {
        if !authors
            .iter()
            .any(|prefix| hex_prefix_matches(prefix, &event.pubkey))
        {
            return false;
        }
    }

    if let Some(kinds) = &filter.kinds {
        if !kinds.contains(&event.kind) {
            return false;
        }
    }

    if filter.since.is_some_and(|since| event.created_at < since) {
        return false;
    }

    if filter.until.is_some_and(|until| event.created_at > until) {
        return false;
    }

    filter.tags.iter().all(|(name, accepted)| {
        event
            .tag_values(name)
            .any(|value| accepted.contains(value))
    })
}

/// Does `event` satisfy at least one of `filters`?
///
/// An empty slice matches nothing.
pub fn matches_filters(filters: &[Filter], event: &Event) -> bool {
    filters.iter().any(|filter| matches_filter(filter, event))
}

fn hex_prefix_matches(prefix: &str, value: &str) -> bool {
    is_hex_prefix(prefix) && value.starts_with(prefix)
}

/// 1..=64 lowercase hex characters.
pub fn is_hex_prefix(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_PREFIX_LEN
        && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
