//! Lambda naming convention. A bare `foo` selects the default namespace,
//! `/ns/foo` selects namespace `ns`; anything else is rejected.

use crate::error::EdgeError;

pub const DEFAULT_NAMESPACE: &str = "_";

/// Split a lambda name into `(namespace, function)`.
pub fn parse_name(name: &str) -> Result<(String, String), EdgeError> {
    let invalid = || EdgeError::InvalidName(name.to_string());

    if name.is_empty() {
        return Err(invalid());
    }

    if let Some(rest) = name.strip_prefix('/') {
        let mut parts = rest.split('/');
        let namespace = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let function = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        return Ok((namespace.to_string(), function.to_string()));
    }

    if name.contains('/') {
        return Err(invalid());
    }

    Ok((DEFAULT_NAMESPACE.to_string(), name.to_string()))
}
