//! De-/Serialization with alternative formats.
//!
//! The various modules in here are intended to be used with `serde`'s [`with` annotation] to de-/serialize as something other than the default format.
//!
//! [`with` annotation]: https://serde.rs/attributes.html#field-attributes

/// De-/serializes a [`Duration`](std::time::Duration) as a whole number of
/// seconds, the unit the scan window is configured in.
pub mod duration_secs {
    use serde_cr::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
