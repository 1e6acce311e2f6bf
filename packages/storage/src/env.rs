//! Environment-variable helpers for `from_env` constructors.

use std::str::FromStr;

use crate::StorageError;

pub fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// A set, non-blank variable.
pub fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(non_empty)
}

/// Parse a variable into `T`; unset or blank yields `None`.
pub fn parse<T>(name: &str) -> Result<Option<T>, StorageError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
            StorageError::InvalidConfig(format!("invalid value for {name}={raw}: {e}"))
        }),
    }
}
