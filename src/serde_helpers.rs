use serde::Serializer;
use std::time::Duration;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Serialize timestamps as RFC 3339 (e.g. `2025-01-02T03:04:05Z`).
pub mod rfc3339 {
    use super::*;

    pub fn serialize<S>(dt: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.format(&Rfc3339).map_err(serde::ser::Error::custom)?)
    }
}

/// Durations are represented as an integer followed by a unit suffix.
/// We choose the largest whole unit when serializing to avoid fractional values.
pub mod duration {
    use super::*;

    const MINUTE_NS: u128 = 60 * 1_000_000_000;
    const SECOND_NS: u128 = 1_000_000_000;
    const MILLI_NS: u128 = 1_000_000;
    const MICRO_NS: u128 = 1_000;

    pub fn format(duration: &Duration) -> String {
        let ns = duration.as_nanos();
        if ns == 0 {
            return "0s".to_string();
        }

        let (value, unit) = if ns % MINUTE_NS == 0 {
            (ns / MINUTE_NS, "m")
        } else if ns % SECOND_NS == 0 {
            (ns / SECOND_NS, "s")
        } else if ns % MILLI_NS == 0 {
            (ns / MILLI_NS, "ms")
        } else if ns % MICRO_NS == 0 {
            (ns / MICRO_NS, "us")
        } else {
            (ns, "ns")
        };

        format!("{value}{unit}")
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use time::macros::datetime;

    #[test]
    fn timestamps_use_rfc3339() {
        #[derive(Serialize)]
        struct Wrapper {
            #[serde(with = "crate::serde_helpers::rfc3339")]
            ts: OffsetDateTime,
        }

        let value = Wrapper {
            ts: datetime!(2024-12-31 23:59:59 UTC),
        };
        let serialized = serde_json::to_string(&value).unwrap();
        assert_eq!(serialized, "{\"ts\":\"2024-12-31T23:59:59Z\"}");
    }

    #[test]
    fn duration_selects_largest_integer_unit() {
        assert_eq!(duration::format(&Duration::from_micros(120)), "120us");
        assert_eq!(duration::format(&Duration::from_secs(180)), "3m");
        assert_eq!(duration::format(&Duration::from_secs(1)), "1s");
        assert_eq!(duration::format(&Duration::from_millis(1500)), "1500ms");
        assert_eq!(duration::format(&Duration::ZERO), "0s");
    }
}
