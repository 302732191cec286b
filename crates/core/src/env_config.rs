//! Environment variable parsing with warn-level logging for invalid values.

/// Parse an environment variable with a default fallback.
///
/// - If the variable is not set: returns `default` silently (expected case).
/// - If the variable is set but cannot be parsed: logs a warning and returns `default`.
pub fn env_parse_with_default<T: std::str::FromStr + std::fmt::Display>(
    var: &str,
    default: T,
) -> T {
    match std::env::var(var) {
        Ok(v) => match v.parse() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(
                    var,
                    value = %v,
                    default = %default,
                    "invalid env var value, using default"
                );
                default
            },
        },
        Err(_) => default,
    }
}

/// Parse an optional environment variable.
///
/// Unset or empty yields `None`; an unparsable value logs a warning and yields `None`.
pub fn env_parse_optional<T: std::str::FromStr>(var: &str) -> Option<T> {
    let v = std::env::var(var).ok().filter(|v| !v.trim().is_empty())?;
    match v.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(var, value = %v, "invalid env var value, ignoring");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // SAFETY (edition 2024): tests use unique variable names, nothing else reads them.
    fn set(var: &str, value: &str) {
        unsafe { std::env::set_var(var, value) }
    }

    fn unset(var: &str) {
        unsafe { std::env::remove_var(var) }
    }

    #[test]
    fn test_env_parse_valid_value() {
        let var_name = "TEST_LOCALSTORE_ENV_VALID_98271";
        set(var_name, "42");
        let result: u32 = env_parse_with_default(var_name, 10);
        assert_eq!(result, 42);
        unset(var_name);
    }

    #[test]
    fn test_env_parse_invalid_value() {
        let var_name = "TEST_LOCALSTORE_ENV_INVALID_98272";
        set(var_name, "banana");
        let result: bool = env_parse_with_default(var_name, true);
        assert!(result);
        unset(var_name);
    }

    #[test]
    fn test_env_parse_missing_var() {
        let var_name = "TEST_LOCALSTORE_ENV_MISSING_98273";
        unset(var_name);
        let result: u32 = env_parse_with_default(var_name, 10);
        assert_eq!(result, 10);
    }

    #[test]
    fn test_env_parse_optional() {
        let var_name = "TEST_LOCALSTORE_ENV_OPTIONAL_98274";
        set(var_name, "");
        assert_eq!(env_parse_optional::<u64>(var_name), None);
        set(var_name, "1024");
        assert_eq!(env_parse_optional::<u64>(var_name), Some(1024));
        set(var_name, "lots");
        assert_eq!(env_parse_optional::<u64>(var_name), None);
        unset(var_name);
    }
}
