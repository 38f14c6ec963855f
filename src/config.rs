use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::audio::{BeatConfig, EventConfig, FrequencyConfig};
use crate::choreography::{ChoreographerConfig, RuleTuning, SectionConfig};
use crate::error::Result;

/// Every tunable constant in one place.
///
/// Missing keys fall back to defaults, so a tuning file only needs the values
/// it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub frequency: FrequencyConfig,
    pub beats: BeatConfig,
    pub events: EventConfig,
    pub sections: SectionConfig,
    pub rules: RuleTuning,
    pub choreographer: ChoreographerConfig,
}

impl TuningConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let config: TuningConfig = serde_json::from_str(&json)?;
        info!("Loaded tuning from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
