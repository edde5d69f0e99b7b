//! Field adapters for values that configs and reports carry as plain text.

/// `tracing::Level` as the lowercase names used by `RUST_LOG` filters.
pub mod level {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use tracing::Level;

    fn parse<E: Error>(text: &str) -> Result<Level, E> {
        text.parse().map_err(|_| {
            E::custom(format!(
                "unknown log level '{text}', expected trace, debug, info, warn or error"
            ))
        })
    }

    fn name(level: &Level) -> String {
        level.as_str().to_ascii_lowercase()
    }

    pub fn serialize<S: Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&name(level))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
        parse(&String::deserialize(deserializer)?)
    }

    /// Same encoding for a level the command line may leave unset.
    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            level: &Option<Level>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match level {
                Some(level) => serializer.serialize_some(&name(level)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Level>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .as_deref()
                .map(parse)
                .transpose()
        }
    }
}

/// Durations written the human way: `"10s"`, `"2m"`, `"1h 30m"`.
pub mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text)
            .map_err(|e| D::Error::custom(format!("invalid duration '{text}': {e}")))
    }
}
