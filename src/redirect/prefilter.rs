//! An approximate wildcard-rule prediction index.
//!
//! Checking every wildcard rule against every queried name is wasteful when
//! most queries match nothing. This keeps a Bloom-filter-like bitset of
//! short substrings drawn from each wildcard rule's literal stem; a query is
//! only run through the full wildcard scan if at least one of its own
//! substrings is present in the filter. False positives are fine (the full
//! scan still runs and finds nothing); false negatives are not, so the
//! filter is rebuilt from scratch whenever a wildcard rule is removed
//! rather than trying to decrement bit counts.

use fnv::FnvHasher;
use std::hash::{Hash, Hasher};

const BITS: usize = 1 << 16;
const WINDOW: usize = 3;

#[derive(Debug, Clone)]
pub struct WildcardPrefilter {
    bits: Box<[u64]>,
    len: usize,
}

impl Default for WildcardPrefilter {
    fn default() -> Self {
        WildcardPrefilter {
            bits: vec![0u64; BITS / 64].into_boxed_slice(),
            len: 0,
        }
    }
}

impl WildcardPrefilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes the literal (non-`...`) stem of a wildcard rule.
    pub fn insert_stem(&mut self, stem: &str) {
        self.len += 1;
        for window in substring_windows(stem) {
            let idx = hash_index(window);
            self.bits[idx / 64] |= 1 << (idx % 64);
        }
    }

    /// `true` means "maybe matches some indexed stem"; `false` is a hard
    /// guarantee that no indexed stem can match `query`.
    pub fn might_match(&self, query: &str) -> bool {
        if self.len == 0 {
            return false;
        }
        // A query shorter than one window can't be ruled out cheaply; fall
        // through to the full scan rather than risk a false negative.
        if query.len() < WINDOW {
            return true;
        }
        substring_windows(query).any(|window| {
            let idx = hash_index(window);
            self.bits[idx / 64] & (1 << (idx % 64)) != 0
        })
    }

    pub fn rebuild<'a>(&mut self, stems: impl Iterator<Item = &'a str>) {
        *self = WildcardPrefilter::new();
        for stem in stems {
            self.insert_stem(stem);
        }
    }
}

fn hash_index(window: &[u8]) -> usize {
    let mut hasher = FnvHasher::default();
    window.hash(&mut hasher);
    (hasher.finish() as usize) % BITS
}

fn substring_windows(s: &str) -> impl Iterator<Item = &[u8]> {
    let bytes = s.as_bytes();
    (0..bytes.len().saturating_sub(WINDOW - 1)).map(move |i| &bytes[i..i + WINDOW])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexed_stem_might_match_its_own_substring() {
        let mut filter = WildcardPrefilter::new();
        filter.insert_stem("/Game/Foo");
        assert!(filter.might_match("/Game/FooBar"));
    }

    #[test]
    fn empty_filter_never_matches() {
        let filter = WildcardPrefilter::new();
        assert!(!filter.might_match("/Game/Foo"));
    }

    #[test]
    fn unrelated_query_usually_does_not_match() {
        let mut filter = WildcardPrefilter::new();
        filter.insert_stem("/Game/Foo");
        assert!(!filter.might_match("/Totally/Unrelated/Path/Zzz"));
    }

    #[test]
    fn rebuild_drops_removed_stems() {
        let mut filter = WildcardPrefilter::new();
        filter.insert_stem("/Game/Foo");
        filter.rebuild(std::iter::empty());
        assert!(!filter.might_match("/Game/FooBar"));
    }
}
