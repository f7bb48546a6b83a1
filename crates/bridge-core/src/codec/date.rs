//! Serde helper that keeps `DateTime<Utc>` fields typed as dates.
//!
//! With `#[serde(with = "bridge_core::codec::date")]` a field serializes as [`Value::Date`]
//! through [`Value::from_serialize`], and as a plain RFC 3339 string through any other
//! serializer (e.g. `serde_json`).
//!
//! [`Value::Date`]: super::Value::Date
//! [`Value::from_serialize`]: super::Value::from_serialize

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Newtype name recognised by the value serializer.
pub(crate) const DATE_TOKEN: &str = "$bridge::Date";

pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    let text = date.to_rfc3339_opts(SecondsFormat::Millis, true);
    serializer.serialize_newtype_struct(DATE_TOKEN, &text)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    DateTime::<Utc>::deserialize(deserializer)
}
