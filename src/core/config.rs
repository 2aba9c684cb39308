use crate::core::hardware::{split_names, CpuFeatures, ParseFeatureError};
use serde::Deserialize;
use tracing::warn;

/// Environment variable listing features the process must not report.
pub const DISABLE_ENV: &str = "PLATFORM_CAPS_DISABLE";

/// Runtime knobs for feature resolution.
///
/// Masking is one-way: a disabled feature is removed from what the hardware
/// reports, nothing can be added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    #[serde(deserialize_with = "deserialize_features")]
    pub disabled: CpuFeatures,
}

impl ProbeConfig {
    pub fn new(disabled: CpuFeatures) -> Self {
        Self { disabled }
    }

    /// Reads [`DISABLE_ENV`]. Unknown names are skipped with a warning so a
    /// stale entry never prevents start-up.
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(DISABLE_ENV).ok().as_deref())
    }

    /// [`from_env`](Self::from_env) for an already-read variable. `None`
    /// means unset.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(list) => Self::from_list_lenient(list),
            None => Self::default(),
        }
    }

    pub fn from_list_lenient(list: &str) -> Self {
        let mut disabled = CpuFeatures::empty();
        for name in split_names(list) {
            match CpuFeatures::lookup(name) {
                Some(flag) => disabled |= flag,
                None => warn!(name, "ignoring unknown CPU feature in {}", DISABLE_ENV),
            }
        }
        Self { disabled }
    }

    /// Strict variant used for user input (CLI).
    pub fn from_list(list: &str) -> Result<Self, ParseFeatureError> {
        Ok(Self {
            disabled: list.parse()?,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Merge another mask into this one.
    pub fn merge(mut self, other: &ProbeConfig) -> Self {
        self.disabled |= other.disabled;
        self
    }

    #[inline]
    pub fn apply(&self, probed: CpuFeatures) -> CpuFeatures {
        probed - self.disabled
    }
}

fn deserialize_features<'de, D>(deserializer: D) -> Result<CpuFeatures, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let names: Vec<String> = Vec::deserialize(deserializer)?;
    let mut features = CpuFeatures::empty();
    for name in &names {
        features |= CpuFeatures::lookup(name)
            .ok_or_else(|| {
                <D::Error as serde::de::Error>::custom(ParseFeatureError::UnknownFeature(name.clone()))
            })?;
    }
    Ok(features)
}
