use config::{Config, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use std::env;
use std::path::PathBuf;

pub mod env_vars;
pub mod models;

pub use models::*;

/// Loads the application configuration.
///
/// Sources, later ones winning: `{config_dir}/default`, `{config_dir}/{RUN_ENV}`,
/// then `CLINIC__*` environment variables. `secret_from_env` markers are
/// resolved afterwards and the schedule section is validated.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    ensure_dotenv_loaded();

    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| "debug".to_string());
    let prefix = env_vars::get_config_prefix();
    let config_dir =
        PathBuf::from(env::var("CLINIC_CONFIG_DIR").unwrap_or_else(|_| "config".to_string()));

    let default_path = config_dir.join("default");
    let env_path = config_dir.join(&run_env);

    let builder = Config::builder()
        .add_source(File::from(default_path).required(false))
        .add_source(File::from(env_path).required(false))
        .add_source(
            Environment::with_prefix(&prefix)
                .separator("__")
                .try_parsing(true),
        );

    let raw_config: AppConfig = builder.build()?.try_deserialize()?;
    let config = apply_env_overrides_from_marker(raw_config)?;
    validate(&config)?;
    tracing::debug!(run_env = %run_env, use_gcal = config.use_gcal, "Configuration loaded");
    Ok(config)
}

/// Resolves all `"secret_from_env"` markers in a loaded configuration.
pub fn apply_env_overrides_from_marker(config: AppConfig) -> Result<AppConfig, ConfigError> {
    let mut json = serde_json::to_value(&config)
        .map_err(|err| ConfigError::Message(format!("config is not serializable: {err}")))?;
    env_vars::inject_env_vars(&mut json);
    serde_json::from_value(json)
        .map_err(|err| ConfigError::Message(format!("config invalid after secret injection: {err}")))
}

/// Checks the invariants the scheduling engine relies on.
pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    let schedule = &config.schedule;
    if schedule.close_hour > 23 || schedule.open_hour >= schedule.close_hour {
        return Err(ConfigError::Message(format!(
            "schedule: open_hour ({}) must be before close_hour ({}) and both within 0-23",
            schedule.open_hour, schedule.close_hour
        )));
    }
    if schedule.step_minutes == 0 {
        return Err(ConfigError::Message(
            "schedule: step_minutes must be positive".to_string(),
        ));
    }
    if let Some(day) = schedule.workdays.iter().find(|d| **d > 6) {
        return Err(ConfigError::Message(format!(
            "schedule: workday {day} is out of range (0 = Monday .. 6 = Sunday)"
        )));
    }
    if schedule.default_timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(ConfigError::Message(format!(
            "schedule: unknown default_timezone '{}'",
            schedule.default_timezone
        )));
    }
    if let Some(gcal) = &config.gcal {
        if gcal.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "gcal: request_timeout_secs must be positive".to_string(),
            ));
        }
        if gcal.state_ttl_minutes <= 0 {
            return Err(ConfigError::Message(
                "gcal: state_ttl_minutes must be positive".to_string(),
            ));
        }
    }
    Ok(())
}

static INIT_DOTENV: OnceCell<()> = OnceCell::new();

/// Loads the dotenv file once per process and returns the path that was used.
///
/// `DOTENV_OVERRIDE` wins over a first command line argument starting with
/// `.env`, which wins over the plain `.env` default.
pub fn ensure_dotenv_loaded() -> String {
    let dotenv_path_override = env::var("DOTENV_OVERRIDE").ok();
    let dotenv_path_arg = env::args().nth(1).filter(|s| s.starts_with(".env"));

    let dotenv_path = dotenv_path_override
        .or(dotenv_path_arg)
        .unwrap_or_else(|| ".env".to_string());

    INIT_DOTENV.get_or_init(|| {
        dotenv::from_filename(&dotenv_path).ok();
    });

    dotenv_path
}
