//! Runtime feature checks.
//!
//! Remote calendar sync is compiled in unconditionally but only switched on
//! when `use_gcal` is set *and* a `gcal` section exists. Without it the engine
//! computes slots from business hours alone and reports `calendar_sync: false`.

use clinic_config::AppConfig;

/// Check if a feature is enabled at runtime based on configuration.
pub fn is_feature_enabled<T>(use_feature: bool, feature_config: Option<&T>) -> bool {
    use_feature && feature_config.is_some()
}

/// Check if remote Google Calendar sync is enabled at runtime.
pub fn is_gcal_enabled(config: &AppConfig) -> bool {
    is_feature_enabled(config.use_gcal, config.gcal.as_ref())
}
