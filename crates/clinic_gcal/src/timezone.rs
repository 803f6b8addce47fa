// --- File: crates/clinic_gcal/src/timezone.rs ---
//! Branch location to IANA timezone.
//!
//! Most of Mexico is on America/Mexico_City. Branches in states that keep
//! their own offset are recognised from their state/city strings.

use chrono_tz::Tz;
use clinic_common::services::BranchInfo;
use tracing::{debug, warn};

/// Region markers checked in order against the normalised state and city.
///
/// First match wins, so a marker contained in another ("baja california" in
/// "baja california sur", "chihuahua" next to "ciudad juarez") comes after it.
const REGION_ZONES: &[(&[&str], Tz)] = &[
    (&["quintana roo", "cancun"], Tz::America__Cancun),
    (&["baja california sur", "los cabos"], Tz::America__Mazatlan),
    (&["baja california", "tijuana", "mexicali"], Tz::America__Tijuana),
    (&["sonora", "hermosillo"], Tz::America__Hermosillo),
    (&["ciudad juarez"], Tz::America__Ciudad_Juarez),
    (&["chihuahua"], Tz::America__Chihuahua),
];

#[derive(Debug, Clone, Copy)]
pub struct TimezoneResolver {
    default: Tz,
}

impl TimezoneResolver {
    pub fn new(default: Tz) -> Self {
        Self { default }
    }

    /// Parses the configured default zone name.
    pub fn from_name(default: &str) -> Option<Self> {
        default.parse::<Tz>().ok().map(Self::new)
    }

    /// Zone for a branch: valid hint, then region markers, then the default.
    ///
    /// Never fails. An unusable hint or an unrecognised location silently
    /// resolves to the default zone, with a warning for the former.
    pub fn resolve(&self, branch: &BranchInfo) -> Tz {
        if let Some(hint) = branch.timezone_hint.as_deref().map(str::trim) {
            if !hint.is_empty() {
                match hint.parse::<Tz>() {
                    Ok(tz) => return tz,
                    Err(_) => warn!(
                        branch_id = branch.branch_id,
                        hint, "Ignoring invalid timezone hint"
                    ),
                }
            }
        }

        let location = [branch.state.as_deref(), branch.city.as_deref()]
            .into_iter()
            .flatten()
            .map(normalise)
            .collect::<Vec<_>>()
            .join(" ");

        for (markers, tz) in REGION_ZONES {
            if markers.iter().any(|marker| location.contains(marker)) {
                debug!(branch_id = branch.branch_id, timezone = %tz, "Resolved timezone from location");
                return *tz;
            }
        }
        self.default
    }
}

/// Lower-cases and strips Spanish accents so "Cancún" matches "cancun".
fn normalise(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}
