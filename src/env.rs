//! Interpolation for configuration values.
//!
//! Interpreter paths and environment values may reference host environment
//! variables with `${VAR}` and build-variant placeholders with `{name}`.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterpolateError {
    #[error("unclosed variable reference: ${{{0}")]
    Unclosed(String),
    #[error("environment variable '{0}' is not set")]
    Unset(String),
    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),
}

/// Interpolate `${VAR}` references in a string.
///
/// Looks in `env` first, then falls back to the process environment.
pub fn interpolate_env(s: &str, env: &HashMap<String, String>) -> Result<String, InterpolateError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let var_name = take_until_close(&mut chars).map_err(InterpolateError::Unclosed)?;
            let value = env
                .get(&var_name)
                .cloned()
                .or_else(|| std::env::var(&var_name).ok())
                .ok_or(InterpolateError::Unset(var_name))?;
            result.push_str(&value);
        } else {
            result.push(c);
        }
    }

    Ok(result)
}

/// Expand `{name}` placeholders from `values`.
///
/// `${VAR}` references are left alone so they can be interpolated afterwards.
pub fn expand_placeholders(s: &str, values: &[(&str, &str)]) -> Result<String, InterpolateError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut after_dollar = false;

    while let Some(c) = chars.next() {
        if c == '{' && !after_dollar {
            let name = take_until_close(&mut chars).map_err(InterpolateError::Unclosed)?;
            let value = values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| *value)
                .ok_or(InterpolateError::UnknownPlaceholder(name))?;
            result.push_str(value);
        } else {
            result.push(c);
        }
        after_dollar = c == '$';
    }

    Ok(result)
}

fn take_until_close(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<String, String> {
    let mut name = String::new();
    loop {
        match chars.next() {
            Some('}') => return Ok(name),
            Some(c) => name.push(c),
            None => return Err(name),
        }
    }
}
