//! Locale projection
//!
//! Stored content is multilingual: a map from language code to text, with
//! entries allowed to be missing. Display projection reads only the caller's
//! primary language; a missing entry projects to null rather than cascading
//! to other accepted languages. That non-fallback behavior is a pinned
//! contract of the platform, not an accident of this module.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content language. `ru` is the platform default.
#[derive(
    async_graphql::Enum, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ru,
    En,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Ru, Language::En];

    pub fn code(&self) -> &'static str {
        match self {
            Language::Ru => "ru",
            Language::En => "en",
        }
    }

    /// Exact code lookup, no region-tag leniency.
    pub fn from_code(code: &str) -> Option<Language> {
        Self::ALL.into_iter().find(|language| language.code() == code)
    }
}

impl FromStr for Language {
    type Err = ();

    /// Parses plain codes and region-tagged forms (`en-US`, `ru-RU`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let primary = s.split(['-', '_']).next().unwrap_or(s);
        match primary.to_ascii_lowercase().as_str() {
            "ru" => Ok(Language::Ru),
            "en" => Ok(Language::En),
            _ => Err(()),
        }
    }
}

/// A language-keyed text value. Entries may be missing for some languages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultilingualValue(BTreeMap<Language, String>);

impl MultilingualValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, language: Language, text: impl Into<String>) -> Self {
        self.0.insert(language, text.into());
        self
    }

    pub fn get(&self, language: Language) -> Option<&str> {
        self.0.get(&language).map(String::as_str)
    }
}

/// Project a multilingual value to the caller's primary language.
///
/// Only `languages[0]` is consulted; a missing entry yields `None`.
pub fn project<'a>(value: &'a MultilingualValue, languages: &[Language]) -> Option<&'a str> {
    languages.first().and_then(|language| value.get(*language))
}

/// Project each element of a multilingual collection. Positional: elements
/// with no entry for the primary language stay in place as `None`.
pub fn project_all<'a>(
    values: &'a [MultilingualValue],
    languages: &[Language],
) -> Vec<Option<&'a str>> {
    values.iter().map(|value| project(value, languages)).collect()
}

/// Apply the projection rule to a raw record value of any shape.
///
/// Objects keyed entirely by language codes collapse to the
/// primary-language entry or null; any other object is a record and gets
/// projected field by field with non-multilingual fields left intact;
/// arrays are projected element-wise; scalars pass through untouched. The
/// input is never mutated.
pub fn project_json(value: &Value, language: Language) -> Value {
    match value {
        Value::Object(map) => {
            if is_language_map(map) {
                map.get(language.code()).cloned().unwrap_or(Value::Null)
            } else {
                Value::Object(
                    map.iter()
                        .map(|(key, field)| (key.clone(), project_json(field, language)))
                        .collect(),
                )
            }
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| project_json(item, language)).collect())
        }
        other => other.clone(),
    }
}

fn is_language_map(map: &serde_json::Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|key| Language::from_code(key).is_some())
}
