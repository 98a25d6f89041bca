use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;

/// Envelope carrying an event together with its stream metadata.
///
/// `aggregate_id` is the raw id of the record the event is about (an
/// obligation, or a death for generation notices); `sequence_number` is that
/// record's version after the event was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    event_type: String,

    aggregate_id: Uuid,
    aggregate_type: String,

    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        event_type: impl Into<String>,
        aggregate_id: Uuid,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate_id(&self) -> Uuid {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap an event, taking its type name from the payload and minting a fresh event id.
    pub fn wrap(
        aggregate_id: Uuid,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self::new(
            Uuid::now_v7(),
            payload.event_type(),
            aggregate_id,
            aggregate_type,
            sequence_number,
            payload,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Ping {
        at: DateTime<Utc>,
    }

    impl Event for Ping {
        fn event_type(&self) -> &'static str {
            "test.ping"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn wrap_copies_event_type_from_payload() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let aggregate = Uuid::now_v7();
        let env = EventEnvelope::wrap(aggregate, "obligation", 3, Ping { at });

        assert_eq!(env.event_type(), "test.ping");
        assert_eq!(env.aggregate_id(), aggregate);
        assert_eq!(env.aggregate_type(), "obligation");
        assert_eq!(env.sequence_number(), 3);
        assert_eq!(env.payload().at, at);
    }

    #[test]
    fn envelope_serializes_with_payload() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let env = EventEnvelope::wrap(Uuid::now_v7(), "obligation", 1, Ping { at });
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["event_type"], "test.ping");
        assert!(json["payload"]["at"].is_string());
    }
}
