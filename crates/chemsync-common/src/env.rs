//! Environment variable helpers used by configuration loaders

use crate::error::{ChemsyncError, Result};
use std::str::FromStr;

/// Read a variable that must be present and non-empty
pub fn required(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ChemsyncError::missing_env(name)),
    }
}

/// Read an optional variable, treating an empty value as unset
pub fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a variable, falling back to `default` when it is unset
///
/// A value that is set but does not parse is a configuration error rather
/// than a silent fallback.
pub fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ChemsyncError::Config(format!("{} has invalid value '{}': {}", name, raw, e))),
        None => Ok(default),
    }
}

/// Parse a variable that may be unset
pub fn parse_optional<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional(name)
        .map(|raw| {
            raw.trim().parse().map_err(|e| {
                ChemsyncError::Config(format!("{} has invalid value '{}': {}", name, raw, e))
            })
        })
        .transpose()
}
