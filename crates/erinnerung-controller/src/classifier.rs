//! Partitions matched payloads by delivery state.

use erinnerung_core::resources::payload_conditions::{COMPLETE, FAILED, SENDING};
use erinnerung_core::resources::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadClass {
    /// No terminal condition and nothing in flight.
    NeedsDelivery,
    /// No terminal condition, `Sending` is true.
    InFlight,
    Delivered,
    Failed,
}

impl PayloadClass {
    pub fn of(payload: &Payload) -> Self {
        let conditions = &payload.status.conditions;
        if conditions.is_true(COMPLETE) {
            Self::Delivered
        } else if conditions.is_true(FAILED) {
            Self::Failed
        } else if conditions.is_true(SENDING) {
            Self::InFlight
        } else {
            Self::NeedsDelivery
        }
    }

    /// No terminal outcome has been recorded yet.
    pub fn is_unsent(self) -> bool {
        matches!(self, Self::NeedsDelivery | Self::InFlight)
    }
}

#[derive(Debug, Default)]
pub struct Classification<'a> {
    pub needs_delivery: Vec<&'a Payload>,
    pub in_flight: Vec<&'a Payload>,
    pub delivered: Vec<&'a Payload>,
    pub failed: Vec<&'a Payload>,
}

impl<'a> Classification<'a> {
    /// Payloads without a terminal condition, in flight or not.
    pub fn unsent(&self) -> impl Iterator<Item = &'a Payload> + '_ {
        self.needs_delivery.iter().chain(self.in_flight.iter()).copied()
    }
}

pub fn classify(payloads: &[Payload]) -> Classification<'_> {
    let mut out = Classification::default();
    for payload in payloads {
        match PayloadClass::of(payload) {
            PayloadClass::NeedsDelivery => out.needs_delivery.push(payload),
            PayloadClass::InFlight => out.in_flight.push(payload),
            PayloadClass::Delivered => out.delivered.push(payload),
            PayloadClass::Failed => out.failed.push(payload),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use erinnerung_core::resources::PayloadSpec;
    use erinnerung_core::{ConditionStatus, ObjectMeta};

    fn payload(name: &str, conditions: &[(&str, ConditionStatus)]) -> Payload {
        let mut p = Payload::new(ObjectMeta::new("default", name), PayloadSpec::default());
        for (type_, status) in conditions {
            p.status.conditions.set(type_, *status, "test", "");
        }
        p
    }

    #[test]
    fn test_partition() {
        let payloads = vec![
            payload("fresh", &[]),
            payload("sending", &[(SENDING, ConditionStatus::True)]),
            payload(
                "done",
                &[(SENDING, ConditionStatus::False), (COMPLETE, ConditionStatus::True)],
            ),
            payload("broken", &[(FAILED, ConditionStatus::True)]),
            payload("not-yet", &[(COMPLETE, ConditionStatus::False)]),
        ];

        let c = classify(&payloads);
        let names = |v: &[&Payload]| v.iter().map(|p| p.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names(&c.needs_delivery), vec!["fresh", "not-yet"]);
        assert_eq!(names(&c.in_flight), vec!["sending"]);
        assert_eq!(names(&c.delivered), vec!["done"]);
        assert_eq!(names(&c.failed), vec!["broken"]);
        assert_eq!(c.unsent().count(), 3);
    }

    #[test]
    fn test_complete_wins_over_sending() {
        let p = payload(
            "p",
            &[(SENDING, ConditionStatus::True), (COMPLETE, ConditionStatus::True)],
        );
        assert_eq!(PayloadClass::of(&p), PayloadClass::Delivered);
        assert!(!PayloadClass::of(&p).is_unsent());
    }
}
