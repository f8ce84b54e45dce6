//! Typed environment variable lookups
//!
//! Unset variables are `None`; set-but-unparsable variables are an error
//! rather than a silent fallback to the default.

use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Read a variable, treating an empty value as unset.
pub fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse a variable.
pub fn parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CommonError::InvalidEnv {
                var: name.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

/// Read a boolean flag. Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
pub fn flag(name: &str) -> Result<Option<bool>> {
    let Some(raw) = var(name) else {
        return Ok(None);
    };
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(CommonError::InvalidEnv {
            var: name.to_string(),
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}
