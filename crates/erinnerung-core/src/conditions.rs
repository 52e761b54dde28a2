//! Condition ledger: ordered, type-keyed status assertions.
//!
//! Each resource status carries a list of [`Condition`]s, at most one per
//! condition type. The ledger keeps insertion order so that it reads like a
//! short event log, while [`Conditions::set`] preserves the transition time of
//! an entry whose status did not change.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Tri-state status of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_transition_time: OffsetDateTime,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// The condition ledger of a single resource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts the entry for `type_`, stamping the transition time with the
    /// current wall clock.
    ///
    /// Returns `true` if the ledger changed in any way.
    pub fn set(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> bool {
        self.set_at(type_, status, reason, message, OffsetDateTime::now_utc())
    }

    /// Like [`Conditions::set`] with an explicit clock reading.
    ///
    /// `last_transition_time` only moves when there was no entry for
    /// `type_` or its status differs from `status`.
    pub fn set_at(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: OffsetDateTime,
    ) -> bool {
        let reason = reason.into();
        let message = message.into();

        match self.0.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                let mut changed = false;
                if existing.status != status {
                    existing.status = status;
                    existing.last_transition_time = now;
                    changed = true;
                }
                if existing.reason != reason {
                    existing.reason = reason;
                    changed = true;
                }
                if existing.message != message {
                    existing.message = message;
                    changed = true;
                }
                changed
            }
            None => {
                self.0.push(Condition {
                    type_: type_.to_string(),
                    status,
                    reason,
                    message,
                    last_transition_time: now,
                });
                true
            }
        }
    }

    /// Removes the entry for `type_`. Returns `true` if one was present.
    pub fn remove(&mut self, type_: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|c| c.type_ != type_);
        self.0.len() != before
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    pub fn is_true(&self, type_: &str) -> bool {
        self.get(type_).is_some_and(Condition::is_true)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a Conditions {
    type Item = &'a Condition;
    type IntoIter = std::slice::Iter<'a, Condition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Condition> for Conditions {
    fn from_iter<I: IntoIterator<Item = Condition>>(iter: I) -> Self {
        let mut ledger = Conditions::new();
        for c in iter {
            ledger.set_at(&c.type_, c.status, c.reason, c.message, c.last_transition_time);
        }
        ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn t0() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[test]
    fn test_set_inserts_with_transition_time() {
        let mut ledger = Conditions::new();
        assert!(ledger.set_at("URL", ConditionStatus::False, "EmptyUrl", "empty", t0()));

        let c = ledger.get("URL").unwrap();
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.reason, "EmptyUrl");
        assert_eq!(c.last_transition_time, t0());
    }

    #[test]
    fn test_unchanged_status_preserves_transition_time() {
        let mut ledger = Conditions::new();
        ledger.set_at("Ready", ConditionStatus::True, "A", "first", t0());

        let later = t0() + Duration::minutes(5);
        let changed = ledger.set_at("Ready", ConditionStatus::True, "B", "second", later);

        assert!(changed);
        let c = ledger.get("Ready").unwrap();
        assert_eq!(c.last_transition_time, t0());
        assert_eq!(c.reason, "B");
        assert_eq!(c.message, "second");
    }

    #[test]
    fn test_changed_status_moves_transition_time() {
        let mut ledger = Conditions::new();
        ledger.set_at("Ready", ConditionStatus::True, "A", "", t0());

        let later = t0() + Duration::minutes(5);
        ledger.set_at("Ready", ConditionStatus::False, "A", "", later);

        assert_eq!(ledger.get("Ready").unwrap().last_transition_time, later);
    }

    #[test]
    fn test_identical_set_reports_no_change() {
        let mut ledger = Conditions::new();
        ledger.set_at("Ready", ConditionStatus::True, "A", "m", t0());
        let later = t0() + Duration::hours(1);
        assert!(!ledger.set_at("Ready", ConditionStatus::True, "A", "m", later));
    }

    #[test]
    fn test_one_entry_per_type() {
        let mut ledger = Conditions::new();
        ledger.set("A", ConditionStatus::True, "", "");
        ledger.set("B", ConditionStatus::True, "", "");
        ledger.set("A", ConditionStatus::False, "", "");
        assert_eq!(ledger.len(), 2);
        let order: Vec<_> = ledger.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(order, vec!["A", "B"]);
    }

    #[test]
    fn test_remove_is_noop_when_missing() {
        let mut ledger = Conditions::new();
        assert!(!ledger.remove("Missing"));
        ledger.set("A", ConditionStatus::True, "", "");
        assert!(ledger.remove("A"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_is_true() {
        let mut ledger = Conditions::new();
        assert!(!ledger.is_true("A"));
        ledger.set("A", ConditionStatus::Unknown, "", "");
        assert!(!ledger.is_true("A"));
        ledger.set("A", ConditionStatus::True, "", "");
        assert!(ledger.is_true("A"));
    }

    #[test]
    fn test_serde_shape() {
        let mut ledger = Conditions::new();
        ledger.set_at("URL", ConditionStatus::True, "GoodUrl", "ok", t0());
        let json = serde_json::to_value(&ledger).unwrap();
        assert_eq!(json[0]["type"], "URL");
        assert_eq!(json[0]["status"], "True");
        assert!(json[0]["lastTransitionTime"].is_string());
    }
}
