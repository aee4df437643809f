//! The redirect database: a queryable table of old-name-to-new-name rules
//! with wildcard matching, chained resolution, known-missing tracking, and
//! reverse lookup.

pub mod flags;
pub mod ini;
pub mod lock;
pub mod prefilter;
pub mod rule;

use std::cell::Cell;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::RedirectError;
use crate::name::QualifiedName;

pub use flags::RedirectFlags;
pub use rule::RedirectRule;

use lock::RecursiveRwLock;
use prefilter::WildcardPrefilter;

thread_local! {
    /// Points at the database currently being consulted by the calling
    /// thread, so that helper code deep in a call stack (e.g. the header
    /// patcher's per-field rewrite routines) can resolve a name without
    /// threading a `&RedirectDatabase` through every function signature.
    /// Swapped in via [`RedirectDatabase::with_as_current`] and always
    /// restored on scope exit, including on panic, by the guard's `Drop`.
    static CURRENT: Cell<*const RedirectDatabase> = Cell::new(std::ptr::null());
}

#[derive(Default)]
struct Tables {
    /// Exact-name rules, keyed by old name, for O(1) non-wildcard lookup.
    exact: BTreeMap<QualifiedName, Vec<RedirectRule>>,
    /// Wildcard rules, scanned linearly (behind the prefilter).
    wildcards: Vec<RedirectRule>,
    /// Names known not to resolve, keyed by type flags plus the
    /// `OPTION_MISSING_LOAD` "channel" bit they were recorded under.
    /// `is_known_missing` queries match on type-bit overlap alone, same as
    /// `matching_redirects`; only `remove_known_missing` also requires the
    /// `OPTION_MISSING_LOAD` bit to match, so a load-time miss and a
    /// statically configured miss can be removed independently of each
    /// other without disturbing a miss recorded under the other channel.
    known_missing: HashSet<(QualifiedName, RedirectFlags)>,
    prefilter: WildcardPrefilter,
}

/// A queryable, mutable table of redirect rules.
///
/// All public methods take `&self`; interior mutability is provided by a
/// [`RecursiveRwLock`] so that a caller already holding a lock (for example,
/// a bulk mutation validating the rules it's about to add) can still issue
/// read queries without deadlocking.
#[derive(Default)]
pub struct RedirectDatabase {
    tables: RecursiveRwLock<Tables>,
}

impl RedirectDatabase {
    pub fn new() -> Self {
        RedirectDatabase::default()
    }

    /// Runs `f` with `self` installed as the thread's current redirect
    /// context, restoring whatever was installed before on return (even if
    /// `f` panics).
    pub fn with_as_current<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = CurrentGuard::install(self);
        f()
    }

    /// The database installed via [`Self::with_as_current`] on this thread,
    /// if any.
    pub fn current() -> Option<&'static RedirectDatabase> {
        CURRENT.with(|cell| {
            let ptr = cell.get();
            if ptr.is_null() {
                None
            } else {
                Some(unsafe { &*ptr })
            }
        })
    }

    /// Adds every rule in `rules`, merging with any existing rule for the
    /// same old name. A later rule for the same old name overrides an
    /// earlier one; a conflict (two different new names for the same exact
    /// old name) is logged and the later rule wins, matching the original's
    /// "last one loaded wins, but warn" merge behavior.
    pub fn add_redirect_list(&self, rules: Vec<RedirectRule>) {
        let mut tables = self.tables.write();
        for rule in rules {
            if rule.flags.is_wildcard() {
                tables.wildcards.push(rule);
            } else {
                let bucket = tables.exact.entry(rule.old_name.clone()).or_default();
                if let Some(existing) = bucket.iter().find(|r| r.flags == rule.flags) {
                    if existing.new_name != rule.new_name {
                        tracing::warn!(
                            old = %rule.old_name,
                            existing_new = %existing.new_name,
                            incoming_new = %rule.new_name,
                            "conflicting redirect rules for the same old name; keeping the newest"
                        );
                    }
                }
                bucket.retain(|r| r.flags != rule.flags);
                bucket.push(rule);
            }
        }
        rebuild_prefilter(&mut tables);
    }

    /// Removes every rule matching `old_name` and `flags` exactly (no
    /// wildcard expansion on removal — the caller must name the literal
    /// rule it added). Wildcard rule removal triggers a prefilter rebuild.
    pub fn remove_redirect_list(&self, old_name: &QualifiedName, flags: RedirectFlags) {
        let mut tables = self.tables.write();
        let mut removed_wildcard = false;

        if let Some(bucket) = tables.exact.get_mut(old_name) {
            bucket.retain(|r| r.flags != flags);
        }
        let before = tables.wildcards.len();
        tables
            .wildcards
            .retain(|r| !(r.old_name == *old_name && r.flags == flags));
        if tables.wildcards.len() != before {
            removed_wildcard = true;
        }

        if removed_wildcard {
            rebuild_prefilter(&mut tables);
        }
    }

    /// Resolves `name` through the redirect chain until no further rule
    /// applies, returning the final name. Detects cycles by tracking every
    /// intermediate name visited; on a cycle, stops and returns the last
    /// name reached rather than looping forever.
    pub fn get_redirected_name(&self, name: &QualifiedName, flags: RedirectFlags) -> QualifiedName {
        match self.resolve_chain(name, flags) {
            Ok(resolved) => resolved,
            Err(_) => name.clone(),
        }
    }

    /// Like [`Self::get_redirected_name`], but surfaces a cycle as an error
    /// instead of silently returning the name unchanged.
    pub fn resolve_chain(
        &self,
        name: &QualifiedName,
        flags: RedirectFlags,
    ) -> Result<QualifiedName, RedirectError> {
        let tables = self.tables.read();
        let mut current = name.clone();
        let mut visited = HashSet::new();
        visited.insert(current.clone());

        loop {
            let next = first_match(&tables, &current, flags).map(|r| r.new_name.clone());
            match next {
                Some(n) if n == current => return Ok(current),
                Some(n) => {
                    if !visited.insert(n.clone()) {
                        tracing::warn!(start = %name, repeated = %n, "cyclic redirect chain detected");
                        return Err(RedirectError::CyclicRedirect {
                            start: name.to_string(),
                            repeated: n.to_string(),
                        });
                    }
                    current = n;
                }
                None => return Ok(current),
            }
        }
    }

    /// Returns the value-redirect payload (property renames, etc.)
    /// attached to the first rule matching `name`, if any.
    pub fn get_value_redirects(
        &self,
        name: &QualifiedName,
        flags: RedirectFlags,
    ) -> Option<BTreeMap<String, String>> {
        let tables = self.tables.read();
        first_match(&tables, name, flags).map(|r| r.value_changes.clone())
    }

    /// Every rule (exact or wildcard) matching `name` under `flags`,
    /// ordered most-specific first.
    pub fn matching_redirects(&self, name: &QualifiedName, flags: RedirectFlags) -> Vec<RedirectRule> {
        let tables = self.tables.read();
        let mut hits: Vec<(u32, RedirectRule)> = Vec::new();

        if let Some(bucket) = tables.exact.get(name) {
            for rule in bucket {
                if !rule.flags.has_any_type(flags) {
                    continue;
                }
                if let Some(score) = rule.old_name.match_score(name, rule.match_options()) {
                    hits.push((score, rule.clone()));
                }
            }
        }

        if tables.prefilter.might_match(name_key(name).as_str()) {
            for rule in &tables.wildcards {
                if !rule.flags.has_any_type(flags) {
                    continue;
                }
                if let Some(score) = rule.old_name.match_score(name, rule.match_options()) {
                    hits.push((score, rule.clone()));
                }
            }
        }

        hits.sort_by(|a, b| b.0.cmp(&a.0));
        hits.into_iter().map(|(_, rule)| rule).collect()
    }

    /// Every name that currently redirects to `name` (the inverse lookup),
    /// synthesized from the forward table rather than a maintained index.
    pub fn find_previous_names(&self, name: &QualifiedName, flags: RedirectFlags) -> Vec<QualifiedName> {
        let tables = self.tables.read();
        let mut out = Vec::new();
        for bucket in tables.exact.values() {
            for r in bucket {
                if r.flags.has_any_type(flags) && r.new_name == *name {
                    out.push(r.old_name.clone());
                }
            }
        }
        out.sort();
        out.dedup();
        out
    }

    /// Channel-agnostic: only the add/remove channel bit is tracked to
    /// control *removal*, per spec.md §4.B — a query here matches on type
    /// bits alone, the same as [`Self::matching_redirects`].
    pub fn is_known_missing(&self, name: &QualifiedName, flags: RedirectFlags) -> bool {
        let tables = self.tables.read();
        tables
            .known_missing
            .iter()
            .any(|(n, f)| n == name && f.has_any_type(flags))
    }

    pub fn add_known_missing(&self, name: QualifiedName, flags: RedirectFlags) {
        self.tables.write().known_missing.insert((name, flags));
    }

    pub fn remove_known_missing(&self, name: &QualifiedName, flags: RedirectFlags) {
        self.tables
            .write()
            .known_missing
            .retain(|(n, f)| !(n == name && f.has_any_type(flags) && same_channel(*f, flags)));
    }

    pub fn clear_known_missing(&self) {
        self.tables.write().known_missing.clear();
    }

    /// Loads rules from `.ini`-style text (the `[CoreRedirects]` block
    /// format) and adds them via [`Self::add_redirect_list`].
    pub fn read_redirects_from_ini(&self, path: &Path) -> Result<usize, RedirectError> {
        let text = std::fs::read_to_string(path).map_err(|e| RedirectError::ConfigIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        let rules = ini::parse_str(&text).map_err(|reason| RedirectError::MalformedRule {
            line: 0,
            reason,
        })?;
        let count = rules.len();
        self.add_redirect_list(rules);
        Ok(count)
    }

    /// Walks every non-asset redirect bucket, checking for vacuous identity
    /// rules and malformed wildcard placement without mutating anything.
    pub fn validate_all_redirects(&self) -> Vec<String> {
        let tables = self.tables.read();
        let mut problems = Vec::new();
        for bucket in tables.exact.values() {
            for rule in bucket {
                if !rule.is_well_formed() {
                    problems.push(format!(
                        "malformed or vacuous rule: {} -> {}",
                        rule.old_name, rule.new_name
                    ));
                }
            }
        }
        for rule in &tables.wildcards {
            if !rule.is_well_formed() {
                problems.push(format!(
                    "malformed wildcard rule: {} -> {}",
                    rule.old_name, rule.new_name
                ));
            }
        }
        problems
    }

    /// Like [`Self::validate_all_redirects`], restricted to `TYPE_ASSET`
    /// rules, catching package-vs-full-path cross-matches specifically.
    pub fn validate_asset_redirects(&self) -> Vec<String> {
        let tables = self.tables.read();
        let mut problems = Vec::new();
        for bucket in tables.exact.values() {
            for rule in bucket {
                if rule.flags.contains(RedirectFlags::TYPE_ASSET) && !rule.is_well_formed() {
                    problems.push(format!(
                        "malformed asset rule: {} -> {}",
                        rule.old_name, rule.new_name
                    ));
                }
            }
        }
        problems
    }

    pub fn add_asset_redirects(&self, rules: Vec<RedirectRule>) {
        self.add_redirect_list(
            rules
                .into_iter()
                .map(|mut r| {
                    r.flags |= RedirectFlags::TYPE_ASSET;
                    r
                })
                .collect(),
        );
    }

    pub fn remove_all_asset_redirects(&self) {
        let mut tables = self.tables.write();
        for bucket in tables.exact.values_mut() {
            bucket.retain(|r| !r.flags.contains(RedirectFlags::TYPE_ASSET));
        }
        let before = tables.wildcards.len();
        tables
            .wildcards
            .retain(|r| !r.flags.contains(RedirectFlags::TYPE_ASSET));
        if tables.wildcards.len() != before {
            rebuild_prefilter(&mut tables);
        }
    }
}

fn first_match<'a>(
    tables: &'a lock::ReadGuard<'a, Tables>,
    name: &QualifiedName,
    flags: RedirectFlags,
) -> Option<&'a RedirectRule> {
    if let Some(bucket) = tables.exact.get(name) {
        if let Some(r) = bucket.iter().find(|r| r.flags.has_any_type(flags)) {
            return Some(r);
        }
    }
    if tables.prefilter.might_match(name_key(name).as_str()) {
        tables
            .wildcards
            .iter()
            .filter(|r| r.flags.has_any_type(flags))
            .max_by_key(|r| r.old_name.match_score(name, r.match_options()).unwrap_or(0))
    } else {
        None
    }
}

fn name_key(name: &QualifiedName) -> String {
    name.to_string()
}

/// Two known-missing entries are in the same channel only if they agree on
/// `OPTION_MISSING_LOAD`; type bits are matched separately via
/// [`RedirectFlags::has_any_type`].
fn same_channel(a: RedirectFlags, b: RedirectFlags) -> bool {
    a.is_missing_load() == b.is_missing_load()
}

fn rebuild_prefilter(tables: &mut Tables) {
    let stems: Vec<String> = tables
        .wildcards
        .iter()
        .flat_map(|r| {
            vec![r.old_name.package(), r.old_name.outer(), r.old_name.object()]
                .into_iter()
                .map(|s| s.trim_matches('.').replace("...", ""))
        })
        .filter(|s| !s.is_empty())
        .collect();
    tables.prefilter.rebuild(stems.iter().map(|s| s.as_str()));
}

struct CurrentGuard {
    previous: *const RedirectDatabase,
}

impl CurrentGuard {
    fn install(db: &RedirectDatabase) -> Self {
        let previous = CURRENT.with(|cell| {
            let prev = cell.get();
            cell.set(db as *const RedirectDatabase);
            prev
        });
        CurrentGuard { previous }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|cell| cell.set(self.previous));
    }
}
