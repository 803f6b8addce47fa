//! Environment variable naming for configuration values and secrets.
//!
//! Plain configuration values are overridden through the `config` crate
//! (`CLINIC__SCHEDULE__OPEN_HOUR`). Secrets are written as the marker
//! `"secret_from_env"` in the config file and resolved from
//! `CLINIC_SECRET_<PATH>` or, for older deployments, `<PATH>`.

use serde_json::Value;
use std::env;
use tracing::warn;

/// The default prefix for configuration environment variables
pub const DEFAULT_PREFIX: &str = "CLINIC";

/// The prefix for secret environment variables
pub const SECRET_PREFIX: &str = "CLINIC_SECRET";

/// The separator for configuration environment variables
pub const CONFIG_SEPARATOR: &str = "__";

/// The separator for secret environment variables
pub const SECRET_SEPARATOR: &str = "_";

/// Marker value replaced by an environment variable at load time.
pub const SECRET_MARKER: &str = "secret_from_env";

pub fn get_config_prefix() -> String {
    env::var("PREFIX").unwrap_or_else(|_| DEFAULT_PREFIX.to_string())
}

/// `server.host` -> `CLINIC__SERVER__HOST`
pub fn config_path_to_env_var(path: &str) -> String {
    let prefix = get_config_prefix();
    let path = path.replace('.', CONFIG_SEPARATOR);
    format!("{}{}{}", prefix, CONFIG_SEPARATOR, path).to_uppercase()
}

/// `gcal.client_secret` -> `CLINIC_SECRET_GCAL_CLIENT_SECRET`
pub fn secret_path_to_env_var(path: &str) -> String {
    let path = path.replace('.', SECRET_SEPARATOR);
    format!("{}{}{}", SECRET_PREFIX, SECRET_SEPARATOR, path).to_uppercase()
}

/// `gcal.client_secret` -> `GCAL_CLIENT_SECRET`
pub fn legacy_secret_path_to_env_var(path: &str) -> String {
    path.replace('.', SECRET_SEPARATOR).to_uppercase()
}

/// Looks up a secret under the prefixed name first, then the legacy name.
pub fn get_secret_env_var(path: &str) -> Option<String> {
    if let Ok(value) = env::var(secret_path_to_env_var(path)) {
        return Some(value);
    }
    env::var(legacy_secret_path_to_env_var(path)).ok()
}

/// Replaces every `"secret_from_env"` string in `value` with the matching
/// environment variable. Markers without a variable become `null`, so an
/// optional secret reads as "not configured" instead of the marker text.
///
/// Returns the number of markers that were resolved.
pub fn inject_env_vars(value: &mut Value) -> usize {
    inject_with(value, &get_secret_env_var)
}

pub(crate) fn inject_with(value: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) -> usize {
    fn walk(path: &mut Vec<String>, obj: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) -> usize {
        match obj {
            Value::Object(map) => {
                let mut replaced = 0;
                for (k, v) in map.iter_mut() {
                    path.push(k.to_string());
                    replaced += walk(path, v, lookup);
                    path.pop();
                }
                replaced
            }
            Value::Array(arr) => {
                let mut replaced = 0;
                for (i, v) in arr.iter_mut().enumerate() {
                    path.push(i.to_string());
                    replaced += walk(path, v, lookup);
                    path.pop();
                }
                replaced
            }
            Value::String(s) if s == SECRET_MARKER => {
                let path_str = path.join(".");
                match lookup(&path_str) {
                    Some(env_val) => {
                        *obj = Value::String(env_val);
                        1
                    }
                    None => {
                        warn!(
                            "No environment variable for secret '{}' ({} or {})",
                            path_str,
                            secret_path_to_env_var(&path_str),
                            legacy_secret_path_to_env_var(&path_str)
                        );
                        *obj = Value::Null;
                        0
                    }
                }
            }
            _ => 0,
        }
    }

    walk(&mut Vec::new(), value, lookup)
}
