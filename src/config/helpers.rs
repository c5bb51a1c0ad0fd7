use std::str::FromStr;

use crate::error::ConfigError;

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Read an env var, treating empty values as unset.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid UTF-8".to_string(),
        }),
    }
}

/// Read a required env var, failing with `hint` when it is missing.
pub(crate) fn required_env(key: &str, hint: &str) -> Result<String, ConfigError> {
    optional_env(key)?.ok_or_else(|| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    })
}

/// Parse an env var with `FromStr`, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key)? {
        Some(val) => val.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Parse a boolean env var (`true/false`, `1/0`, `yes/no`, `on/off`).
pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key)? {
        Some(val) => match val.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got '{}'", other),
            }),
        },
        None => Ok(default),
    }
}

/// Read a string env var, falling back to `default` when unset.
pub(crate) fn parse_string_env(key: &str, default: &str) -> Result<String, ConfigError> {
    Ok(optional_env(key)?.unwrap_or_else(|| default.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_value_is_treated_as_unset() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::set_var("PVP_TEST_EMPTY", "   ");
        }
        assert_eq!(optional_env("PVP_TEST_EMPTY").unwrap(), None);
        assert_eq!(parse_string_env("PVP_TEST_EMPTY", "dflt").unwrap(), "dflt");
        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::remove_var("PVP_TEST_EMPTY");
        }
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        for (raw, expected) in [("yes", true), ("0", false), ("ON", true), ("False", false)] {
            // SAFETY: Under ENV_MUTEX.
            unsafe {
                std::env::set_var("PVP_TEST_BOOL", raw);
            }
            assert_eq!(parse_bool_env("PVP_TEST_BOOL", !expected).unwrap(), expected);
        }
        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::set_var("PVP_TEST_BOOL", "maybe");
        }
        assert!(parse_bool_env("PVP_TEST_BOOL", false).is_err());
        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::remove_var("PVP_TEST_BOOL");
        }
    }

    #[test]
    fn numeric_parse_error_names_the_key() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::set_var("PVP_TEST_NUM", "twelve");
        }
        let err = parse_optional_env::<u64>("PVP_TEST_NUM", 1).unwrap_err();
        assert!(err.to_string().contains("PVP_TEST_NUM"));
        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::remove_var("PVP_TEST_NUM");
        }
        assert_eq!(parse_optional_env::<u64>("PVP_TEST_NUM", 7).unwrap(), 7);
    }

    #[test]
    fn required_env_reports_hint() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        let err = required_env("PVP_TEST_SURELY_UNSET", "Set it in .env").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("PVP_TEST_SURELY_UNSET"));
        assert!(msg.contains("Set it in .env"));
    }
}
