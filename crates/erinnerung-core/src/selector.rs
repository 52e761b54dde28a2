//! Label selectors.
//!
//! A [`LabelSelector`] is the serialized form stored on resources. It is
//! compiled into a [`Selector`] before use; compilation is where malformed
//! selectors are rejected, so a compiled selector never fails to evaluate.
//!
//! ```
//! use std::collections::BTreeMap;
//! use erinnerung_core::selector::LabelSelector;
//!
//! let selector = LabelSelector::from_labels([("adviser-id", "abc123")]);
//! let compiled = selector.compile().unwrap();
//!
//! let labels = BTreeMap::from([("adviser-id".to_string(), "abc123".to_string())]);
//! assert!(compiled.matches(&labels));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum length of a label name segment and of a label value.
const MAX_LABEL_SEGMENT: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("invalid label key {0:?}")]
    InvalidKey(String),

    #[error("invalid label value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },

    #[error("unknown operator {operator:?} for key {key:?}")]
    UnknownOperator { key: String, operator: String },

    #[error("operator {operator} for key {key:?} requires at least one value")]
    EmptyValues { key: String, operator: String },

    #[error("operator {operator} for key {key:?} does not take values")]
    UnexpectedValues { key: String, operator: String },
}

/// Serialized selector: exact `matchLabels` plus set-based `matchExpressions`.
/// All requirements are ANDed; an empty selector matches every object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelSelector {
    pub fn from_labels<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            match_labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            match_expressions: Vec::new(),
        }
    }

    pub fn with_expression(
        mut self,
        key: impl Into<String>,
        operator: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.match_expressions.push(LabelSelectorRequirement {
            key: key.into(),
            operator: operator.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Validates every requirement and produces an evaluable selector.
    pub fn compile(&self) -> Result<Selector, SelectorError> {
        let mut requirements =
            Vec::with_capacity(self.match_labels.len() + self.match_expressions.len());

        for (key, value) in &self.match_labels {
            validate_key(key)?;
            validate_value(key, value)?;
            requirements.push(Requirement::Equals {
                key: key.clone(),
                value: value.clone(),
            });
        }

        for expr in &self.match_expressions {
            validate_key(&expr.key)?;
            let requirement = match expr.operator.as_str() {
                "In" | "NotIn" => {
                    if expr.values.is_empty() {
                        return Err(SelectorError::EmptyValues {
                            key: expr.key.clone(),
                            operator: expr.operator.clone(),
                        });
                    }
                    for value in &expr.values {
                        validate_value(&expr.key, value)?;
                    }
                    if expr.operator == "In" {
                        Requirement::In {
                            key: expr.key.clone(),
                            values: expr.values.clone(),
                        }
                    } else {
                        Requirement::NotIn {
                            key: expr.key.clone(),
                            values: expr.values.clone(),
                        }
                    }
                }
                "Exists" | "DoesNotExist" => {
                    if !expr.values.is_empty() {
                        return Err(SelectorError::UnexpectedValues {
                            key: expr.key.clone(),
                            operator: expr.operator.clone(),
                        });
                    }
                    if expr.operator == "Exists" {
                        Requirement::Exists(expr.key.clone())
                    } else {
                        Requirement::DoesNotExist(expr.key.clone())
                    }
                }
                other => {
                    return Err(SelectorError::UnknownOperator {
                        key: expr.key.clone(),
                        operator: other.to_string(),
                    });
                }
            };
            requirements.push(requirement);
        }

        Ok(Selector { requirements })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals { key: String, value: String },
    In { key: String, values: Vec<String> },
    NotIn { key: String, values: Vec<String> },
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals { key, value } => labels.get(key) == Some(value),
            Requirement::In { key, values } => labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn { key, values } => {
                labels.get(key).is_none_or(|v| !values.contains(v))
            }
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

/// A validated selector.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Selector with no requirements; matches everything.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn is_everything(&self) -> bool {
        self.requirements.is_empty()
    }
}

/// Convenience for one-shot evaluation of a serialized selector.
pub fn matches(
    labels: &BTreeMap<String, String>,
    selector: &LabelSelector,
) -> Result<bool, SelectorError> {
    Ok(selector.compile()?.matches(labels))
}

fn is_name_segment(s: &str) -> bool {
    let alnum = |c: char| c.is_ascii_alphanumeric();
    !s.is_empty()
        && s.len() <= MAX_LABEL_SEGMENT
        && s.chars().next().is_some_and(alnum)
        && s.chars().last().is_some_and(alnum)
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn is_dns_subdomain(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 253
        && s.split('.').all(|part| {
            !part.is_empty()
                && part.len() <= MAX_LABEL_SEGMENT
                && part.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
                && part.ends_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        })
}

fn validate_key(key: &str) -> Result<(), SelectorError> {
    let valid = match key.split_once('/') {
        Some((prefix, name)) => is_dns_subdomain(prefix) && is_name_segment(name),
        None => is_name_segment(key),
    };
    if valid {
        Ok(())
    } else {
        Err(SelectorError::InvalidKey(key.to_string()))
    }
}

fn validate_value(key: &str, value: &str) -> Result<(), SelectorError> {
    if value.is_empty() || is_name_segment(value) {
        Ok(())
    } else {
        Err(SelectorError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_match_labels_conjunction() {
        let sel = LabelSelector::from_labels([("a", "1"), ("b", "2")])
            .compile()
            .unwrap();
        assert!(sel.matches(&labels(&[("a", "1"), ("b", "2"), ("c", "3")])));
        assert!(!sel.matches(&labels(&[("a", "1")])));
        assert!(!sel.matches(&labels(&[("a", "1"), ("b", "3")])));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let sel = LabelSelector::default().compile().unwrap();
        assert!(sel.is_everything());
        assert!(sel.matches(&labels(&[])));
        assert!(sel.matches(&labels(&[("x", "y")])));
    }

    #[test]
    fn test_expressions() {
        let sel = LabelSelector::default()
            .with_expression("tier", "In", ["gold", "silver"])
            .with_expression("env", "NotIn", ["dev"])
            .with_expression("team", "Exists", Vec::<String>::new())
            .with_expression("legacy", "DoesNotExist", Vec::<String>::new())
            .compile()
            .unwrap();

        assert!(sel.matches(&labels(&[("tier", "gold"), ("team", "x")])));
        assert!(sel.matches(&labels(&[("tier", "silver"), ("team", "x"), ("env", "prod")])));
        assert!(!sel.matches(&labels(&[("tier", "bronze"), ("team", "x")])));
        assert!(!sel.matches(&labels(&[("tier", "gold"), ("team", "x"), ("env", "dev")])));
        assert!(!sel.matches(&labels(&[("tier", "gold")])));
        assert!(!sel.matches(&labels(&[("tier", "gold"), ("team", "x"), ("legacy", "1")])));
    }

    #[test]
    fn test_qualified_keys() {
        let sel =
            LabelSelector::from_labels([("adviser.thoth-station.ninja/adviser-id", "abc123")]);
        assert!(sel.compile().is_ok());
    }

    #[test]
    fn test_malformed_selectors() {
        let empty_in = LabelSelector::default().with_expression("k", "In", Vec::<String>::new());
        assert!(matches!(
            empty_in.compile(),
            Err(SelectorError::EmptyValues { .. })
        ));

        let exists_with_values = LabelSelector::default().with_expression("k", "Exists", ["v"]);
        assert!(matches!(
            exists_with_values.compile(),
            Err(SelectorError::UnexpectedValues { .. })
        ));

        let unknown = LabelSelector::default().with_expression("k", "Near", ["v"]);
        assert!(matches!(
            unknown.compile(),
            Err(SelectorError::UnknownOperator { .. })
        ));

        let bad_key = LabelSelector::from_labels([("bad key", "v")]);
        assert!(matches!(bad_key.compile(), Err(SelectorError::InvalidKey(_))));

        let bad_prefix = LabelSelector::from_labels([("Bad_Prefix/key", "v")]);
        assert!(matches!(bad_prefix.compile(), Err(SelectorError::InvalidKey(_))));

        let bad_value = LabelSelector::from_labels([("k", "-v")]);
        assert!(matches!(
            bad_value.compile(),
            Err(SelectorError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_matches_helper() {
        let sel = LabelSelector::from_labels([("a", "1")]);
        assert_eq!(matches(&labels(&[("a", "1")]), &sel), Ok(true));
        assert_eq!(matches(&labels(&[]), &sel), Ok(false));
    }

    #[test]
    fn test_serde_shape() {
        let sel: LabelSelector = serde_json::from_value(serde_json::json!({
            "matchLabels": {"a": "1"},
            "matchExpressions": [{"key": "b", "operator": "Exists"}]
        }))
        .unwrap();
        assert_eq!(sel.match_labels.get("a").map(String::as_str), Some("1"));
        assert_eq!(sel.match_expressions[0].operator, "Exists");
    }
}
