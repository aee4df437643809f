//! The qualified-name model: a package/outer/object triple used to identify
//! every redirectable thing (packages, classes, objects, functions).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Controls how [`QualifiedName::matches`] treats empty fields and partial
/// matches on either side of the comparison.
///
/// Mirrors the original `ECoreRedirectMatchFlags`/`EMatchFlags` split: a
/// caller query with empty `outer`/`object` fields is normally allowed to
/// match any value there ("partial match"), but `Type_Asset` redirects
/// disallow a partial match on the left-hand (rule) side specifically, so
/// that a package-level rule doesn't accidentally swallow a full-path one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    pub allow_partial_rhs_match: bool,
    pub disallow_partial_lhs_match: bool,
}

/// A package/outer/object triple, e.g. `/Game/Foo.Foo_C:Bar`.
///
/// `package` is always present for a fully qualified name; `outer` and
/// `object` may be empty, which is how package-level and class-level
/// redirects are represented with the same type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    package: SmolStr,
    outer: SmolStr,
    object: SmolStr,
}

impl QualifiedName {
    /// Builds a name directly from its three parts without validation.
    pub fn new(package: impl Into<SmolStr>, outer: impl Into<SmolStr>, object: impl Into<SmolStr>) -> Self {
        QualifiedName {
            package: package.into(),
            outer: outer.into(),
            object: object.into(),
        }
    }

    /// Parses `/Package/Path.Outer:Object`-shaped text.
    ///
    /// The grammar is: an optional `package` up to the first `.`, an
    /// optional `outer` between `.` and `:`, and an optional `object` after
    /// `:`. Any of the three may be absent, but the raw string must not be
    /// empty and must not contain whitespace.
    pub fn parse(raw: &str) -> Result<Self, &'static str> {
        if raw.is_empty() {
            return Err("name must not be empty");
        }
        if raw.chars().any(|c| c.is_whitespace()) {
            return Err("name must not contain whitespace");
        }

        let (head, object) = match raw.split_once(':') {
            Some((head, object)) => (head, object),
            None => (raw, ""),
        };
        let (package, outer) = match head.split_once('.') {
            Some((package, outer)) => (package, outer),
            None => (head, ""),
        };

        Ok(QualifiedName::new(package, outer, object))
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn outer(&self) -> &str {
        &self.outer
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn is_empty(&self) -> bool {
        self.package.is_empty() && self.outer.is_empty() && self.object.is_empty()
    }

    /// The name one level up: an object name's parent is its outer-qualified
    /// package name, an outer's parent is its bare package.
    pub fn parent(&self) -> QualifiedName {
        if !self.object.is_empty() {
            QualifiedName::new(self.package.clone(), self.outer.clone(), "")
        } else {
            QualifiedName::new(self.package.clone(), "", "")
        }
    }

    /// Returns a child name one level deeper than `self`: the dual of
    /// [`Self::parent`]. The child's outer accumulates `self`'s own
    /// `outer.object` (or just `object`, or nothing, depending on how deep
    /// `self` already is).
    pub fn append_child(&self, child: impl Into<SmolStr>) -> QualifiedName {
        let new_outer = if self.object.is_empty() {
            self.outer.clone()
        } else if self.outer.is_empty() {
            self.object.clone()
        } else {
            SmolStr::from(format!("{}.{}", self.outer, self.object))
        };
        QualifiedName::new(self.package.clone(), new_outer, child)
    }

    /// Returns a copy with `suffix` appended to the package path component.
    pub fn append_package_suffix(&self, suffix: &str) -> QualifiedName {
        let mut package = String::with_capacity(self.package.len() + suffix.len());
        package.push_str(&self.package);
        package.push_str(suffix);
        QualifiedName::new(package, self.outer.clone(), self.object.clone())
    }

    /// Returns a copy with the package component replaced.
    pub fn with_package(&self, package: impl Into<SmolStr>) -> QualifiedName {
        QualifiedName::new(package, self.outer.clone(), self.object.clone())
    }

    /// Matches `self` (the rule's old name) against `query`, honoring `...`
    /// wildcard markers at the start/end of each component and the partial
    /// match rules in `opts`.
    pub fn matches(&self, query: &QualifiedName, opts: MatchOptions) -> bool {
        self.match_score(query, opts).is_some()
    }

    /// Like [`Self::matches`], but returns a specificity score so that
    /// overlapping rules can be ranked (exact match scores highest, a
    /// substring wildcard scores lowest).
    pub fn match_score(&self, query: &QualifiedName, opts: MatchOptions) -> Option<u32> {
        let mut score = 0u32;

        score += component_score(&self.package, &query.package, opts)?;

        if self.outer.is_empty() {
            if !query.outer.is_empty() && opts.disallow_partial_lhs_match {
                return None;
            }
        } else {
            score += component_score(&self.outer, &query.outer, opts)?;
        }

        if self.object.is_empty() {
            if !query.object.is_empty() && opts.disallow_partial_lhs_match {
                return None;
            }
        } else {
            score += component_score(&self.object, &query.object, opts)?;
        }

        Some(score)
    }

    pub fn has_valid_characters(&self) -> bool {
        [&self.package, &self.outer, &self.object]
            .into_iter()
            .all(|s| s.chars().all(|c| !c.is_whitespace() && c != '\0'))
    }
}

/// Scores one component match: exact match scores highest, then prefix,
/// suffix, substring wildcards in decreasing order of specificity.
fn component_score(rule: &str, query: &str, opts: MatchOptions) -> Option<u32> {
    if rule.is_empty() {
        return if query.is_empty() || opts.allow_partial_rhs_match {
            Some(1)
        } else {
            None
        };
    }

    let has_prefix_wild = rule.starts_with("...");
    let has_suffix_wild = rule.ends_with("...");

    match (has_prefix_wild, has_suffix_wild) {
        (false, false) => (rule == query).then_some(100),
        (false, true) => {
            let stem = &rule[..rule.len() - 3];
            query.starts_with(stem).then_some(50)
        }
        (true, false) => {
            let stem = &rule[3..];
            query.ends_with(stem).then_some(50)
        }
        (true, true) if rule.len() > 6 => {
            let stem = &rule[3..rule.len() - 3];
            query.contains(stem).then_some(10)
        }
        (true, true) => Some(10),
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.package)?;
        if !self.outer.is_empty() {
            write!(f, ".{}", self.outer)?;
        }
        if !self.object.is_empty() {
            write!(f, ":{}", self.object)?;
        }
        Ok(())
    }
}

impl FromStr for QualifiedName {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QualifiedName::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_triple() {
        let n = QualifiedName::parse("/Game/Foo.Foo_C:Bar").unwrap();
        assert_eq!(n.package(), "/Game/Foo");
        assert_eq!(n.outer(), "Foo_C");
        assert_eq!(n.object(), "Bar");
    }

    #[test]
    fn parses_package_only() {
        let n = QualifiedName::parse("/Game/Foo").unwrap();
        assert_eq!(n.package(), "/Game/Foo");
        assert!(n.outer().is_empty());
        assert!(n.object().is_empty());
    }

    #[test]
    fn rejects_whitespace() {
        assert!(QualifiedName::parse("/Game/ Foo").is_err());
    }

    #[test]
    fn roundtrips_display() {
        let n = QualifiedName::parse("/Game/Foo.Foo_C:Bar").unwrap();
        assert_eq!(n.to_string(), "/Game/Foo.Foo_C:Bar");
    }

    #[test]
    fn exact_match_outscores_wildcard() {
        let exact = QualifiedName::new("/Game/Foo", "", "");
        let wild = QualifiedName::new("/Game/...", "", "");
        let query = QualifiedName::new("/Game/Foo", "", "");
        let opts = MatchOptions::default();

        let exact_score = exact.match_score(&query, opts).unwrap();
        let wild_score = wild.match_score(&query, opts).unwrap();
        assert!(exact_score > wild_score);
    }

    #[test]
    fn prefix_wildcard_matches_suffix_text() {
        let rule = QualifiedName::new("/Game/...", "", "");
        let query = QualifiedName::new("/Game/Sub/Foo", "", "");
        assert!(rule.matches(&query, MatchOptions::default()));
    }

    #[test]
    fn disallow_partial_lhs_match_rejects_extra_outer() {
        let rule = QualifiedName::new("/Game/Foo", "", "");
        let query = QualifiedName::new("/Game/Foo", "Foo_C", "");
        let opts = MatchOptions {
            disallow_partial_lhs_match: true,
            ..Default::default()
        };
        assert!(!rule.matches(&query, opts));
    }

    #[test]
    fn parent_strips_object_then_outer() {
        let n = QualifiedName::parse("/Game/Foo.Foo_C:Bar").unwrap();
        let p = n.parent();
        assert_eq!(p.object(), "");
        assert_eq!(p.outer(), "Foo_C");
        assert_eq!(p.parent().outer(), "");
    }
}
