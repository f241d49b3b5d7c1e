//! Serde helpers for flexible envelope and payload decoding.
//!
//! When the `tracing` feature is enabled, typed payload decoding also logs every field
//! the target type does not capture, so server-side schema drift shows up in the logs.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// A `serde_as` type that deserializes strings or integers as `String`.
///
/// Envelope ids and sources are strings on most feeds but plain counters on some.
pub struct StringFromAny;

impl<'de> serde_with::DeserializeAs<'de, String> for StringFromAny {
    fn deserialize_as<D>(deserializer: D) -> std::result::Result<String, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use std::fmt;

        use serde::de::{self, Visitor};

        struct StringOrNumberVisitor;

        impl Visitor<'_> for StringOrNumberVisitor {
            type Value = String;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("string or integer")
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_owned())
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_string())
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_string())
            }
        }

        deserializer.deserialize_any(StringOrNumberVisitor)
    }
}

impl serde_with::SerializeAs<String> for StringFromAny {
    fn serialize_as<S>(source: &String, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(source)
    }
}

/// Decode a feed payload into `T`, logging fields `T` does not know about.
///
/// Unknown fields never fail decoding. On failure the offending path and value are
/// logged before the error is returned.
#[cfg(feature = "tracing")]
pub fn deserialize_payload<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    let original = value.clone();
    let mut unknown_paths: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        unknown_paths.push(path.to_string());
    })
    .inspect_err(|_| {
        let path_result: Result<T, _> = serde_path_to_error::deserialize(original.clone());
        if let Err(path_err) = path_result {
            let path = path_err.path().to_string();
            tracing::error!(
                type_name = %type_name::<T>(),
                path = %path,
                value = %format_value(lookup_value(&original, &path)),
                error = %path_err.inner(),
                "payload deserialization failed"
            );
        }
    })?;

    for path in unknown_paths {
        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            value = %format_value(lookup_value(&original, &path)),
            "unknown field in feed payload"
        );
    }

    Ok(result)
}

/// Pass-through payload decoding when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_payload<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Look up a value by a `serde_ignored` / `serde_path_to_error` path such as
/// `cameras[2].zone` or `cameras.2.zone`. `?` segments (Option wrappers) are skipped.
#[cfg(feature = "tracing")]
fn lookup_value<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    path.split(['.', '[', ']'])
        .filter(|segment| !segment.is_empty() && *segment != "?")
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
            _ => None,
        })
}

#[cfg(feature = "tracing")]
fn format_value(value: Option<&Value>) -> String {
    value.map_or_else(|| "<unable to retrieve>".to_owned(), Value::to_string)
}
