//! Built-in conversion rules
//!
//! Single source of truth for the scalar types every registry understands.
//! [`ConversionRegistry::with_builtin_rules`](super::ConversionRegistry::with_builtin_rules)
//! registers one rule per entry.

use super::{ConversionRule, ScalarRule};
use chrono::{DateTime, NaiveDate, Utc};
use std::any::Any;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Describes one built-in rule
///
/// # Example
///
/// ```rust
/// # use trellis_engine::convert::rules;
/// let meta = rules::metadata()
///     .iter()
///     .find(|m| m.type_name == "bool")
///     .unwrap();
///
/// let rule = (meta.build)();
/// assert!(rule.convert(&["on".to_string()]).is_ok());
/// assert!(rule.convert(&["maybe".to_string()]).is_err());
/// ```
pub struct RuleMetadata {
    pub type_name: &'static str,
    pub build: fn() -> Arc<dyn ConversionRule>,
}

/// Metadata for every built-in rule
pub fn metadata() -> &'static [RuleMetadata] {
    &BUILTIN_RULES
}

static BUILTIN_RULES: [RuleMetadata; 20] = [
    RuleMetadata {
        type_name: "String",
        build: text_rule,
    },
    RuleMetadata {
        type_name: "bool",
        build: bool_rule,
    },
    RuleMetadata {
        type_name: "char",
        build: char_rule,
    },
    RuleMetadata {
        type_name: "i8",
        build: number_rule::<i8>,
    },
    RuleMetadata {
        type_name: "i16",
        build: number_rule::<i16>,
    },
    RuleMetadata {
        type_name: "i32",
        build: number_rule::<i32>,
    },
    RuleMetadata {
        type_name: "i64",
        build: number_rule::<i64>,
    },
    RuleMetadata {
        type_name: "i128",
        build: number_rule::<i128>,
    },
    RuleMetadata {
        type_name: "isize",
        build: number_rule::<isize>,
    },
    RuleMetadata {
        type_name: "u8",
        build: number_rule::<u8>,
    },
    RuleMetadata {
        type_name: "u16",
        build: number_rule::<u16>,
    },
    RuleMetadata {
        type_name: "u32",
        build: number_rule::<u32>,
    },
    RuleMetadata {
        type_name: "u64",
        build: number_rule::<u64>,
    },
    RuleMetadata {
        type_name: "u128",
        build: number_rule::<u128>,
    },
    RuleMetadata {
        type_name: "usize",
        build: number_rule::<usize>,
    },
    RuleMetadata {
        type_name: "f32",
        build: number_rule::<f32>,
    },
    RuleMetadata {
        type_name: "f64",
        build: number_rule::<f64>,
    },
    RuleMetadata {
        type_name: "Uuid",
        build: uuid_rule,
    },
    RuleMetadata {
        type_name: "NaiveDate",
        build: date_rule,
    },
    RuleMetadata {
        type_name: "DateTime<Utc>",
        build: timestamp_rule,
    },
];

fn text_rule() -> Arc<dyn ConversionRule> {
    ScalarRule::<String>::shared(|s| Ok(s.to_string()))
}

fn bool_rule() -> Arc<dyn ConversionRule> {
    ScalarRule::<bool>::shared(|s| match s.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        other => Err(format!("'{}' is not a boolean", other)),
    })
}

fn char_rule() -> Arc<dyn ConversionRule> {
    ScalarRule::<char>::shared(|s| {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            (None, _) => Err("blank input".to_string()),
            _ => Err(format!("'{}' is more than one character", s)),
        }
    })
}

fn number_rule<T>() -> Arc<dyn ConversionRule>
where
    T: FromStr + Any + Send,
    T::Err: Display,
{
    ScalarRule::<T>::shared(|s| {
        let trimmed = non_blank(s)?;
        trimmed
            .parse::<T>()
            .map_err(|e| format!("'{}': {}", trimmed, e))
    })
}

fn uuid_rule() -> Arc<dyn ConversionRule> {
    ScalarRule::<Uuid>::shared(|s| {
        Uuid::parse_str(non_blank(s)?).map_err(|e| e.to_string())
    })
}

fn date_rule() -> Arc<dyn ConversionRule> {
    ScalarRule::<NaiveDate>::shared(|s| {
        NaiveDate::parse_from_str(non_blank(s)?, "%Y-%m-%d").map_err(|e| e.to_string())
    })
}

fn timestamp_rule() -> Arc<dyn ConversionRule> {
    ScalarRule::<DateTime<Utc>>::shared(|s| {
        DateTime::parse_from_rfc3339(non_blank(s)?)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| e.to_string())
    })
}

/// Blank input is never a number, date or identifier
fn non_blank(s: &str) -> Result<&str, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        Err("blank input".to_string())
    } else {
        Ok(trimmed)
    }
}
