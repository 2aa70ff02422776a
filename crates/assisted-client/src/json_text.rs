//! Serde adapter for fields the backend stores as embedded JSON text.
//!
//! The backend keeps validations, inventory and connectivity reports as JSON
//! strings. These helpers parse them into typed values at the boundary so
//! nothing downstream handles raw text. An empty or missing string maps to
//! `T::default()`.

use serde::de::{DeserializeOwned, Error as _};
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Serialize,
    S: Serializer,
{
    let text = serde_json::to_string(value).map_err(S::Error::custom)?;
    serializer.serialize_str(&text)
}

pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: DeserializeOwned + Default,
    D: Deserializer<'de>,
{
    let text = Option::<String>::deserialize(deserializer)?;
    match text.as_deref().map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(raw) => serde_json::from_str(raw).map_err(D::Error::custom),
    }
}
