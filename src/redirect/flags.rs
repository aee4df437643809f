//! Bitflag sets mirroring `ECoreRedirectFlags`.

use bitflags::bitflags;

bitflags! {
    /// What kind of thing a redirect rule applies to, plus a couple of
    /// modifier bits controlling how matching is performed.
    ///
    /// Bit values are kept distinct per category (type bits, category bits,
    /// option bits) so a rule can combine one type with any number of
    /// options, matching the original engine's flag layout.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RedirectFlags: u32 {
        const TYPE_OBJECT   = 1 << 0;
        const TYPE_CLASS    = 1 << 1;
        const TYPE_STRUCT   = 1 << 2;
        const TYPE_ENUM     = 1 << 3;
        const TYPE_FUNCTION = 1 << 4;
        const TYPE_PROPERTY = 1 << 5;
        const TYPE_PACKAGE  = 1 << 6;
        const TYPE_ASSET    = 1 << 7;

        const CATEGORY_INSTANCE_ONLY = 1 << 16;
        const CATEGORY_REMOVED       = 1 << 17;

        const OPTION_MATCH_PREFIX    = 1 << 24;
        const OPTION_MATCH_SUFFIX    = 1 << 25;
        const OPTION_MATCH_SUBSTRING = 1 << 26;
        const OPTION_MISSING_LOAD    = 1 << 27;

        const TYPE_MASK = Self::TYPE_OBJECT.bits()
            | Self::TYPE_CLASS.bits()
            | Self::TYPE_STRUCT.bits()
            | Self::TYPE_ENUM.bits()
            | Self::TYPE_FUNCTION.bits()
            | Self::TYPE_PROPERTY.bits()
            | Self::TYPE_PACKAGE.bits()
            | Self::TYPE_ASSET.bits();
    }
}

impl RedirectFlags {
    pub fn has_any_type(self, mask: RedirectFlags) -> bool {
        !(self & mask & RedirectFlags::TYPE_MASK).is_empty()
    }

    pub fn is_wildcard(self) -> bool {
        self.intersects(
            RedirectFlags::OPTION_MATCH_PREFIX
                | RedirectFlags::OPTION_MATCH_SUFFIX
                | RedirectFlags::OPTION_MATCH_SUBSTRING,
        )
    }

    pub fn is_removed(self) -> bool {
        self.contains(RedirectFlags::CATEGORY_REMOVED)
    }

    pub fn is_missing_load(self) -> bool {
        self.contains(RedirectFlags::OPTION_MISSING_LOAD)
    }
}

/// Maps a CoreRedirects ini config key (e.g. `ObjectRedirects`,
/// `PackageRedirects`) to the base type flag it implies.
pub fn flag_for_config_key(key: &str) -> Option<RedirectFlags> {
    Some(match key {
        "ObjectRedirects" => RedirectFlags::TYPE_OBJECT,
        "ClassRedirects" => RedirectFlags::TYPE_CLASS,
        "StructRedirects" => RedirectFlags::TYPE_STRUCT,
        "EnumRedirects" => RedirectFlags::TYPE_ENUM,
        "FunctionRedirects" => RedirectFlags::TYPE_FUNCTION,
        "PropertyRedirects" => RedirectFlags::TYPE_PROPERTY,
        "PackageRedirects" => RedirectFlags::TYPE_PACKAGE,
        "AssetRedirects" => RedirectFlags::TYPE_ASSET,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_mask_covers_all_type_bits() {
        let all_types = RedirectFlags::TYPE_OBJECT
            | RedirectFlags::TYPE_CLASS
            | RedirectFlags::TYPE_STRUCT
            | RedirectFlags::TYPE_ENUM
            | RedirectFlags::TYPE_FUNCTION
            | RedirectFlags::TYPE_PROPERTY
            | RedirectFlags::TYPE_PACKAGE
            | RedirectFlags::TYPE_ASSET;
        assert_eq!(RedirectFlags::TYPE_MASK, all_types);
    }

    #[test]
    fn wildcard_detection() {
        assert!(RedirectFlags::OPTION_MATCH_PREFIX.is_wildcard());
        assert!(!RedirectFlags::TYPE_OBJECT.is_wildcard());
    }

    #[test]
    fn config_key_mapping() {
        assert_eq!(
            flag_for_config_key("ClassRedirects"),
            Some(RedirectFlags::TYPE_CLASS)
        );
        assert_eq!(flag_for_config_key("NotAKey"), None);
    }
}
