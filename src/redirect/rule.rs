//! A single redirect entry.

use std::collections::BTreeMap;

use crate::name::{MatchOptions, QualifiedName};
use crate::redirect::flags::RedirectFlags;

/// One old-name-to-new-name mapping, optionally carrying a value-redirect
/// payload (a map of property-name substitutions applied when the redirect
/// fires on a property, e.g. renaming an enum value alongside the enum
/// itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRule {
    pub old_name: QualifiedName,
    pub new_name: QualifiedName,
    pub flags: RedirectFlags,
    pub value_changes: BTreeMap<String, String>,
}

impl RedirectRule {
    pub fn new(old_name: QualifiedName, new_name: QualifiedName, flags: RedirectFlags) -> Self {
        RedirectRule {
            old_name,
            new_name,
            flags,
            value_changes: BTreeMap::new(),
        }
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            allow_partial_rhs_match: true,
            disallow_partial_lhs_match: self.flags.contains(RedirectFlags::TYPE_ASSET),
        }
    }

    pub fn matches(&self, query: &QualifiedName) -> bool {
        self.old_name.matches(query, self.match_options())
    }

    /// `true` for rules that only record "this name is gone, don't bother
    /// looking it up again" rather than pointing somewhere new.
    pub fn is_identity_removal(&self) -> bool {
        self.flags.is_removed() && self.old_name == self.new_name
    }

    /// A redirect rule is well-formed if it isn't a same-name non-removal
    /// (a no-op that would only ever cause confusion) and any `...`
    /// wildcard markers are placed only at a component boundary.
    pub fn is_well_formed(&self) -> bool {
        if self.old_name == self.new_name && !self.flags.is_removed() {
            return false;
        }
        well_formed_wildcard(self.old_name.package())
            && well_formed_wildcard(self.old_name.outer())
            && well_formed_wildcard(self.old_name.object())
    }
}

fn well_formed_wildcard(s: &str) -> bool {
    match (s.find("..."), s.rfind("...")) {
        (None, None) => true,
        (Some(a), Some(b)) if a == 0 || b == s.len() - 3 => true,
        _ => false,
    }
}

/// Synthesizes the inverse of `rule`, used to answer "what used to be
/// called X" (`find_previous_names`) without maintaining a second index.
///
/// Returns `None` for wildcard rules, since a wildcard's reverse mapping is
/// not a single name.
pub fn invert(rule: &RedirectRule) -> Option<RedirectRule> {
    if rule.flags.is_wildcard() || rule.is_identity_removal() {
        return None;
    }
    Some(RedirectRule::new(
        rule.new_name.clone(),
        rule.old_name.clone(),
        rule.flags,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> QualifiedName {
        QualifiedName::parse(s).unwrap()
    }

    #[test]
    fn identity_non_removal_is_not_well_formed() {
        let rule = RedirectRule::new(name("/Game/Foo"), name("/Game/Foo"), RedirectFlags::TYPE_PACKAGE);
        assert!(!rule.is_well_formed());
    }

    #[test]
    fn identity_removal_is_well_formed() {
        let rule = RedirectRule::new(
            name("/Game/Foo"),
            name("/Game/Foo"),
            RedirectFlags::TYPE_PACKAGE | RedirectFlags::CATEGORY_REMOVED,
        );
        assert!(rule.is_well_formed());
        assert!(rule.is_identity_removal());
    }

    #[test]
    fn invert_swaps_names() {
        let rule = RedirectRule::new(name("/Game/Old"), name("/Game/New"), RedirectFlags::TYPE_PACKAGE);
        let inv = invert(&rule).unwrap();
        assert_eq!(inv.old_name, name("/Game/New"));
        assert_eq!(inv.new_name, name("/Game/Old"));
    }

    #[test]
    fn invert_skips_wildcards() {
        let rule = RedirectRule::new(
            name("/Game/Old..."),
            name("/Game/New"),
            RedirectFlags::TYPE_PACKAGE | RedirectFlags::OPTION_MATCH_PREFIX,
        );
        assert!(invert(&rule).is_none());
    }
}
