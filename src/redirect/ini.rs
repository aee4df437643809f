//! Parses `Engine.ini`-style `[CoreRedirects]` blocks into [`RedirectRule`]s.
//!
//! The grammar handled here is the structured single-line form:
//!
//! ```ini
//! +ClassRedirects=(OldName="/Script/Old.Foo",NewName="/Script/New.Foo")
//! +PackageRedirects=(OldName="/Game/Old...",NewName="/Game/New...",MatchSubstring=true)
//! ```
//!
//! Each line is a `Key=(Field="value",...)` tuple; fields are order-
//! independent and a subset may be omitted.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_until};
use nom::character::complete::{alpha1, char, multispace0};
use nom::combinator::{map, opt, recognize};
use nom::multi::separated_list0;
use nom::sequence::{delimited, preceded, separated_pair};
use nom::IResult;

use crate::name::QualifiedName;
use crate::redirect::flags::RedirectFlags;
use crate::redirect::rule::RedirectRule;

struct RawField<'a> {
    key: &'a str,
    value: &'a str,
}

fn quoted_string(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_until("\""), char('"'))(input)
}

fn bareword(input: &str) -> IResult<&str, &str> {
    recognize(nom::character::complete::alphanumeric1)(input)
}

fn field_value(input: &str) -> IResult<&str, &str> {
    alt((quoted_string, bareword))(input)
}

fn field(input: &str) -> IResult<&str, RawField<'_>> {
    map(
        separated_pair(alpha1, char('='), field_value),
        |(key, value)| RawField { key, value },
    )(input)
}

fn field_list(input: &str) -> IResult<&str, Vec<RawField<'_>>> {
    delimited(
        char('('),
        separated_list0(delimited(multispace0, char(','), multispace0), field),
        char(')'),
    )(input)
}

fn line_key(input: &str) -> IResult<&str, &str> {
    preceded(opt(char('+')), recognize(nom::multi::many1(alt((alpha1, tag("_"))))))(input)
}

fn redirect_line(input: &str) -> IResult<&str, (&str, Vec<RawField<'_>>)> {
    separated_pair(line_key, char('='), field_list)(input)
}

/// Parses a single non-blank, non-comment ini line into a [`RedirectRule`].
///
/// Returns `Ok(None)` for lines that parse but don't look like a redirect
/// directive (section headers, blank lines); `Err` for a line that looks
/// like a redirect directive but is malformed.
pub fn parse_line(line: &str) -> Result<Option<RedirectRule>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(';') || trimmed.starts_with('[') {
        return Ok(None);
    }

    let (_, (key, fields)) = redirect_line(trimmed).map_err(|e| e.to_string())?;

    let base_flags = match crate::redirect::flags::flag_for_config_key(key) {
        Some(f) => f,
        None => return Ok(None),
    };

    let mut old_name = None;
    let mut new_name = None;
    let mut flags = base_flags;
    let mut value_changes = std::collections::BTreeMap::new();

    for f in fields {
        match f.key {
            "OldName" => {
                old_name = Some(QualifiedName::parse(f.value).map_err(|e| e.to_string())?)
            }
            "NewName" => {
                new_name = Some(QualifiedName::parse(f.value).map_err(|e| e.to_string())?)
            }
            "MatchPrefix" if f.value == "true" => flags |= RedirectFlags::OPTION_MATCH_PREFIX,
            "MatchSuffix" if f.value == "true" => flags |= RedirectFlags::OPTION_MATCH_SUFFIX,
            "MatchSubstring" if f.value == "true" => flags |= RedirectFlags::OPTION_MATCH_SUBSTRING,
            "InstanceOnly" if f.value == "true" => flags |= RedirectFlags::CATEGORY_INSTANCE_ONLY,
            "Removed" if f.value == "true" => flags |= RedirectFlags::CATEGORY_REMOVED,
            "OverrideClassName" => {
                value_changes.insert("OverrideClassName".to_string(), f.value.to_string());
            }
            _ => {}
        }
    }

    let old_name = old_name.ok_or_else(|| "redirect rule is missing OldName".to_string())?;
    let new_name = new_name.unwrap_or_else(|| old_name.clone());

    let mut rule = RedirectRule::new(old_name, new_name, flags);
    rule.value_changes = value_changes;
    Ok(Some(rule))
}

/// Parses every redirect-shaped line in `text`, skipping anything that
/// isn't a recognized redirect key.
pub fn parse_str(text: &str) -> Result<Vec<RedirectRule>, String> {
    let mut rules = Vec::new();
    for (i, line) in text.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(rule)) => rules.push(rule),
            Ok(None) => {}
            Err(reason) => return Err(format!("line {}: {}", i + 1, reason)),
        }
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_class_redirect() {
        let rule = parse_line(r#"+ClassRedirects=(OldName="/Script/Old.Foo",NewName="/Script/New.Foo")"#)
            .unwrap()
            .unwrap();
        assert_eq!(rule.old_name.to_string(), "/Script/Old.Foo");
        assert_eq!(rule.new_name.to_string(), "/Script/New.Foo");
        assert!(rule.flags.contains(RedirectFlags::TYPE_CLASS));
    }

    #[test]
    fn parses_wildcard_package_redirect() {
        let rule = parse_line(
            r#"+PackageRedirects=(OldName="/Game/Old...",NewName="/Game/New...",MatchPrefix=true)"#,
        )
        .unwrap()
        .unwrap();
        assert!(rule.flags.contains(RedirectFlags::OPTION_MATCH_PREFIX));
    }

    #[test]
    fn skips_section_headers_and_blank_lines() {
        assert_eq!(parse_line("[CoreRedirects]").unwrap(), None);
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("; a comment").unwrap(), None);
    }

    #[test]
    fn missing_old_name_is_an_error() {
        let result = parse_line(r#"+ClassRedirects=(NewName="/Script/New.Foo")"#);
        assert!(result.is_err());
    }

    #[test]
    fn parses_multiple_lines() {
        let text = "[CoreRedirects]\n\
                     +ClassRedirects=(OldName=\"/Script/A.Foo\",NewName=\"/Script/B.Foo\")\n\
                     +ClassRedirects=(OldName=\"/Script/C.Bar\",NewName=\"/Script/D.Bar\")\n";
        let rules = parse_str(text).unwrap();
        assert_eq!(rules.len(), 2);
    }
}
