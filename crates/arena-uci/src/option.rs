//! Engine option declarations.
//!
//! Engines announce their tunables during the handshake with lines such as
//! `option name Hash type spin default 16 min 1 max 33554432`. This module
//! turns one such line into a validated [`EngineOption`] and keeps the
//! declarations of one engine in an [`EngineOptionSet`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UciError;

// ── Option Kind ──────────────────────────────────────────────

/// The declared type of an engine option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    /// Boolean flag (`true` / `false`).
    Check,
    /// Integer within `[min, max]`.
    Spin,
    /// One of a fixed list of values.
    Combo,
    /// Action without a value.
    Button,
    /// Free text.
    String,
}

impl OptionKind {
    /// Returns the protocol keyword for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Spin => "spin",
            Self::Combo => "combo",
            Self::Button => "button",
            Self::String => "string",
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "check" => Ok(Self::Check),
            "spin" => Ok(Self::Spin),
            "combo" => Ok(Self::Combo),
            "button" => Ok(Self::Button),
            "string" => Ok(Self::String),
            _ => Err(()),
        }
    }
}

// ── Engine Option ────────────────────────────────────────────

/// A validated option declaration.
///
/// Instances only come out of [`EngineOption::parse`], so `min`/`max` are
/// always both set for [`OptionKind::Spin`] and absent otherwise, and `vars`
/// is non-empty exactly for [`OptionKind::Combo`].
///
/// # Examples
///
/// ```
/// use arena_uci::{EngineOption, OptionKind};
///
/// let option = EngineOption::parse("option name Hash type spin default 16 min 1 max 1024")
///     .expect("valid declaration");
/// assert_eq!(option.name, "Hash");
/// assert_eq!(option.kind, OptionKind::Spin);
/// assert_eq!(option.min, Some(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineOption {
    /// Option name, may contain spaces.
    pub name: String,
    /// Declared type.
    pub kind: OptionKind,
    /// Raw default value, empty when none was declared.
    pub default: String,
    /// Lower bound for spin options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    /// Upper bound for spin options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    /// Allowed values for combo options, in declaration order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Name,
    Type,
    Default,
    Min,
    Max,
    Var,
}

impl Keyword {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "name" => Some(Self::Name),
            "type" => Some(Self::Type),
            "default" => Some(Self::Default),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "var" => Some(Self::Var),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Type => "type",
            Self::Default => "default",
            Self::Min => "min",
            Self::Max => "max",
            Self::Var => "var",
        }
    }
}

/// Raw keyword values collected before validation.
#[derive(Debug, Default)]
struct RawFields {
    name: Option<String>,
    kind: Option<String>,
    default: Option<String>,
    min: Option<String>,
    max: Option<String>,
    vars: Vec<String>,
}

impl RawFields {
    fn store(&mut self, keyword: Keyword, value: String, line: &str) -> Result<(), UciError> {
        let slot = match keyword {
            Keyword::Var => {
                self.vars.push(value);
                return Ok(());
            }
            Keyword::Name => &mut self.name,
            Keyword::Type => &mut self.kind,
            Keyword::Default => &mut self.default,
            Keyword::Min => &mut self.min,
            Keyword::Max => &mut self.max,
        };
        if slot.is_some() {
            return Err(UciError::DuplicateField {
                field: keyword.as_str(),
                line: line.to_owned(),
            });
        }
        *slot = Some(value);
        Ok(())
    }
}

impl EngineOption {
    /// Parse one option declaration line.
    ///
    /// The leading `option` token is optional. Every token that equals one of
    /// `name`, `type`, `default`, `min`, `max` or `var` starts a new field;
    /// the tokens up to the next keyword are joined with single spaces.
    ///
    /// # Errors
    ///
    /// Returns a [`UciError`] naming the offending field and carrying the
    /// original line when the declaration is structurally invalid.
    pub fn parse(line: &str) -> Result<Self, UciError> {
        let fields = tokenize(line)?;
        Self::validate(fields, line)
    }

    fn validate(fields: RawFields, line: &str) -> Result<Self, UciError> {
        let name = fields.name.ok_or_else(|| UciError::MissingField {
            field: "name",
            line: line.to_owned(),
        })?;
        if name.is_empty() {
            return Err(UciError::EmptyField {
                field: "name",
                line: line.to_owned(),
            });
        }

        let raw_kind = fields.kind.ok_or_else(|| UciError::MissingField {
            field: "type",
            line: line.to_owned(),
        })?;
        let kind = raw_kind
            .parse::<OptionKind>()
            .map_err(|()| UciError::UnknownKind {
                kind: raw_kind.clone(),
                line: line.to_owned(),
            })?;

        let (min, max) = if kind == OptionKind::Spin {
            let min = required_number("min", fields.min, line)?;
            let max = required_number("max", fields.max, line)?;
            (Some(min), Some(max))
        } else {
            reject_present("min", fields.min.is_some(), kind, line)?;
            reject_present("max", fields.max.is_some(), kind, line)?;
            (None, None)
        };

        if kind == OptionKind::Combo {
            if fields.vars.is_empty() {
                return Err(UciError::MissingField {
                    field: "var",
                    line: line.to_owned(),
                });
            }
        } else {
            reject_present("var", !fields.vars.is_empty(), kind, line)?;
        }

        Ok(Self {
            name,
            kind,
            default: fields.default.unwrap_or_default(),
            min,
            max,
            vars: fields.vars,
        })
    }

    /// Check a candidate value against this declaration.
    ///
    /// Buttons take no value; check, spin and combo options require one.
    /// Combo values are compared case-insensitively, as engines do.
    ///
    /// # Errors
    ///
    /// Returns `UciError::InvalidValue` describing why the value is rejected.
    pub fn validate_value(&self, value: Option<&str>) -> Result<(), UciError> {
        let invalid = |reason: String| UciError::InvalidValue {
            name: self.name.clone(),
            reason,
        };

        match (self.kind, value) {
            (OptionKind::Button, None) | (OptionKind::String, _) => Ok(()),
            (OptionKind::Button, Some(v)) => Err(invalid(format!("button takes no value, got `{v}`"))),
            (_, None) => Err(invalid(format!("{} option requires a value", self.kind))),
            (OptionKind::Check, Some(v)) => {
                if v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("false") {
                    Ok(())
                } else {
                    Err(invalid(format!("`{v}` is not true or false")))
                }
            }
            (OptionKind::Spin, Some(v)) => {
                let n: i64 = v
                    .parse()
                    .map_err(|_| invalid(format!("`{v}` is not an integer")))?;
                let (min, max) = (self.min.unwrap_or(i64::MIN), self.max.unwrap_or(i64::MAX));
                if (min..=max).contains(&n) {
                    Ok(())
                } else {
                    Err(invalid(format!("{n} is outside [{min}, {max}]")))
                }
            }
            (OptionKind::Combo, Some(v)) => {
                if self.vars.iter().any(|var| var.eq_ignore_ascii_case(v)) {
                    Ok(())
                } else {
                    Err(invalid(format!("`{v}` is not one of {:?}", self.vars)))
                }
            }
        }
    }
}

/// Renders the canonical declaration line, which parses back to an equal
/// record.
impl fmt::Display for EngineOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "option name {} type {}", self.name, self.kind)?;
        if !self.default.is_empty() {
            write!(f, " default {}", self.default)?;
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            write!(f, " min {min} max {max}")?;
        }
        for var in &self.vars {
            write!(f, " var {var}")?;
        }
        Ok(())
    }
}

fn tokenize(line: &str) -> Result<RawFields, UciError> {
    let mut tokens = line.split_whitespace().peekable();
    if tokens.peek() == Some(&"option") {
        tokens.next();
    }

    let mut fields = RawFields::default();
    let mut current: Option<Keyword> = None;
    let mut value: Vec<&str> = Vec::new();

    for token in tokens {
        if let Some(keyword) = Keyword::from_token(token) {
            if let Some(open) = current.replace(keyword) {
                fields.store(open, value.join(" "), line)?;
                value.clear();
            }
            continue;
        }
        if current.is_none() {
            return Err(UciError::UnexpectedToken {
                token: token.to_owned(),
                line: line.to_owned(),
            });
        }
        value.push(token);
    }
    if let Some(open) = current {
        fields.store(open, value.join(" "), line)?;
    }

    Ok(fields)
}

fn required_number(field: &'static str, raw: Option<String>, line: &str) -> Result<i64, UciError> {
    let raw = raw.ok_or_else(|| UciError::MissingField {
        field,
        line: line.to_owned(),
    })?;
    raw.parse().map_err(|_| UciError::InvalidNumber {
        field,
        value: raw.clone(),
        line: line.to_owned(),
    })
}

fn reject_present(
    field: &'static str,
    present: bool,
    kind: OptionKind,
    line: &str,
) -> Result<(), UciError> {
    if present {
        return Err(UciError::UnexpectedField {
            field,
            kind,
            line: line.to_owned(),
        });
    }
    Ok(())
}

// ── Option Set ───────────────────────────────────────────────

/// The options one engine declared, in declaration order.
///
/// A later declaration with an already known name replaces the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineOptionSet {
    options: Vec<EngineOption>,
}

impl EngineOptionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration, replacing any previous one with the same name.
    pub fn insert(&mut self, option: EngineOption) {
        match self.options.iter_mut().find(|o| o.name == option.name) {
            Some(existing) => *existing = option,
            None => self.options.push(option),
        }
    }

    /// Look up an option by its exact name.
    pub fn get(&self, name: &str) -> Option<&EngineOption> {
        self.options.iter().find(|o| o.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineOption> {
        self.options.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_spin_option() {
        let option = EngineOption::parse("option name Hash type spin default 1 min 1 max 2")
            .expect("should parse");

        assert_eq!(option.name, "Hash");
        assert_eq!(option.kind, OptionKind::Spin);
        assert_eq!(option.default, "1");
        assert_eq!(option.min, Some(1));
        assert_eq!(option.max, Some(2));
        assert!(option.vars.is_empty());
    }

    #[test]
    fn test_should_join_multi_word_names_and_vars() {
        let option = EngineOption::parse(
            "option name Analysis Contempt type combo default Both var Off var White var Both Sides",
        )
        .expect("should parse");

        assert_eq!(option.name, "Analysis Contempt");
        assert_eq!(option.kind, OptionKind::Combo);
        assert_eq!(option.vars, vec!["Off", "White", "Both Sides"]);
    }

    #[test]
    fn test_should_accept_line_without_option_prefix() {
        let option = EngineOption::parse("name Ponder type check default false").expect("should parse");
        assert_eq!(option.kind, OptionKind::Check);
        assert_eq!(option.default, "false");
    }

    #[test]
    fn test_should_parse_button_without_default() {
        let option = EngineOption::parse("option name Clear Hash type button").expect("should parse");
        assert_eq!(option.kind, OptionKind::Button);
        assert!(option.default.is_empty());
    }

    #[test]
    fn test_should_require_min_and_max_for_spin() {
        let missing_max = EngineOption::parse("option name Hash type spin default 1 min 1");
        assert!(matches!(
            missing_max,
            Err(UciError::MissingField { field: "max", .. })
        ));

        let missing_min = EngineOption::parse("option name Hash type spin default 1 max 8");
        assert!(matches!(
            missing_min,
            Err(UciError::MissingField { field: "min", .. })
        ));
    }

    #[test]
    fn test_should_require_var_for_combo() {
        let result = EngineOption::parse("option name Style type combo default Normal");
        assert!(matches!(
            result,
            Err(UciError::MissingField { field: "var", .. })
        ));
    }

    #[test]
    fn test_should_reject_bounds_on_non_spin_kinds() {
        for kind in ["check", "button", "string", "combo var a"] {
            let line = format!("option name X type {kind} min 1 max 2");
            let result = EngineOption::parse(&line);
            assert!(
                matches!(result, Err(UciError::UnexpectedField { field: "min", .. })),
                "{line} should be rejected, got {result:?}"
            );
        }
    }

    #[test]
    fn test_should_reject_var_on_non_combo_kind() {
        let result = EngineOption::parse("option name X type string default a var b");
        assert!(matches!(
            result,
            Err(UciError::UnexpectedField { field: "var", .. })
        ));
    }

    #[test]
    fn test_should_reject_unknown_kind() {
        let result = EngineOption::parse("option name X type slider default 1");
        match result {
            Err(UciError::UnknownKind { kind, line }) => {
                assert_eq!(kind, "slider");
                assert!(line.contains("slider"));
            }
            other => panic!("expected unknown kind, got {other:?}"),
        }
    }

    #[test]
    fn test_should_reject_missing_or_empty_name() {
        assert!(matches!(
            EngineOption::parse("option type check default true"),
            Err(UciError::MissingField { field: "name", .. })
        ));
        // `type` right after `name` starts a new field, leaving the name empty.
        assert!(matches!(
            EngineOption::parse("option name type check"),
            Err(UciError::EmptyField { field: "name", .. })
        ));
    }

    #[test]
    fn test_should_reject_non_numeric_bounds() {
        let result = EngineOption::parse("option name Hash type spin default 1 min one max 2");
        assert!(matches!(
            result,
            Err(UciError::InvalidNumber { field: "min", .. })
        ));
    }

    #[test]
    fn test_should_reject_stray_tokens_and_duplicates() {
        assert!(matches!(
            EngineOption::parse("option foo name X type check"),
            Err(UciError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            EngineOption::parse("option name X type check type spin"),
            Err(UciError::DuplicateField { field: "type", .. })
        ));
    }

    #[test]
    fn test_should_include_original_line_in_error_message() {
        let line = "option name Threads type spin default 1";
        let err = EngineOption::parse(line).expect_err("should fail");
        assert!(err.to_string().contains(line));
        assert!(err.to_string().contains("min"));
    }

    #[test]
    fn test_should_reparse_canonical_form_to_equal_record() {
        let lines = [
            "option name Hash type spin default 16 min 1 max 1024",
            "option name UCI_Chess960 type check default false",
            "option name Style type combo default Normal var Solid var Normal var Risky Play",
            "option name Clear Hash type button",
            "option name SyzygyPath type string default <empty>",
        ];
        for line in lines {
            let option = EngineOption::parse(line).expect("should parse");
            let reparsed = EngineOption::parse(&option.to_string()).expect("should reparse");
            assert_eq!(option, reparsed, "round trip failed for {line}");
        }
    }

    #[test]
    fn test_should_validate_values_against_declaration() {
        let spin = EngineOption::parse("option name Hash type spin default 16 min 1 max 64")
            .expect("should parse");
        assert!(spin.validate_value(Some("32")).is_ok());
        assert!(spin.validate_value(Some("65")).is_err());
        assert!(spin.validate_value(Some("big")).is_err());
        assert!(spin.validate_value(None).is_err());

        let check = EngineOption::parse("option name Ponder type check default false")
            .expect("should parse");
        assert!(check.validate_value(Some("TRUE")).is_ok());
        assert!(check.validate_value(Some("yes")).is_err());

        let combo = EngineOption::parse("option name Style type combo default a var a var b")
            .expect("should parse");
        assert!(combo.validate_value(Some("B")).is_ok());
        assert!(combo.validate_value(Some("c")).is_err());

        let button = EngineOption::parse("option name Clear Hash type button").expect("should parse");
        assert!(button.validate_value(None).is_ok());
        assert!(button.validate_value(Some("x")).is_err());
    }

    #[test]
    fn test_should_replace_redeclared_option_in_set() {
        let mut set = EngineOptionSet::new();
        set.insert(EngineOption::parse("option name A type check default true").expect("parse"));
        set.insert(EngineOption::parse("option name B type button").expect("parse"));
        set.insert(EngineOption::parse("option name A type check default false").expect("parse"));

        assert_eq!(set.len(), 2);
        assert_eq!(set.get("A").map(|o| o.default.as_str()), Some("false"));
        let names: Vec<_> = set.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_should_serialize_option_kind_lowercase() {
        let value = serde_json::to_value(OptionKind::Combo).expect("should serialize");
        assert_eq!(value, "combo");
    }
}
