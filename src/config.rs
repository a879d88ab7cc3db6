// config.rs — JSON configuration for the pass settings.
//
// Every section is optional. A section that is present replaces the live
// pass's settings wholesale (missing fields inside it take the settings'
// own defaults); an absent section leaves the pass as it is. `enabled`
// toggles passes by registry id.
//
//   {
//     "ray_box":  { "threshold": 0.15 },
//     "hough":    { "strategy": "mirror_match" },
//     "enabled":  { "temporal": false }
//   }
//
// Changes land in the pass structs immediately and take effect on the
// next `render`.

use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::continuity::TraceParams;
use crate::error::ConfigError;
use crate::pass::Pass;
use crate::passes::{
    BilateralPass, BilateralSettings, DogPass, DogSettings, DownscalePass, DownscaleSettings,
    HoughPass, HoughSettings, LowCutoffPass, LowCutoffSettings, MagnitudeGatePass,
    MagnitudeGateSettings, OrientationPass, OrientationSettings, RayBoxPass, StructurePass,
};
use crate::pipeline::{Pipeline, PipelineHook};
use crate::raycast::RayBoxSettings;

/// Settings for every configurable pass, keyed by section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub orientation: Option<OrientationSettings>,
    pub bilateral: Option<BilateralSettings>,
    pub downscale: Option<DownscaleSettings>,
    pub structure: Option<TraceParams>,
    pub ray_box: Option<RayBoxSettings>,
    pub hough: Option<HoughSettings>,
    pub dog: Option<DogSettings>,
    pub low_cutoff: Option<LowCutoffSettings>,
    pub magnitude_gate: Option<MagnitudeGateSettings>,
    /// Pass id → enabled.
    pub enabled: BTreeMap<String, bool>,
}

impl PipelineConfig {
    pub fn from_json(path: &str, text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }
}

/// Read and parse a JSON configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<PipelineConfig, ConfigError> {
    let path = path.as_ref();
    let shown = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: shown.clone(),
        source,
    })?;
    let config = PipelineConfig::from_json(&shown, &text)?;
    info!("loaded pipeline config from {shown}");
    Ok(config)
}

/// Overwrite `T`'s settings in every registered pass of that type.
fn apply_to<T: Pass, S: Copy, H: PipelineHook>(
    pipeline: &mut Pipeline<H>,
    settings: Option<S>,
    slot: impl Fn(&mut T) -> &mut S,
) -> usize {
    let Some(settings) = settings else {
        return 0;
    };
    let ids: Vec<&'static str> = pipeline.passes().iter().map(|e| e.id).collect();
    let mut applied = 0;
    for id in ids {
        if let Some(pass) = pipeline.pass_as_mut::<T>(id) {
            *slot(pass) = settings;
            applied += 1;
        }
    }
    applied
}

impl<H: PipelineHook> Pipeline<H> {
    /// Push `config` into the live passes. Returns the number of passes
    /// whose settings or enabled state changed hands.
    pub fn apply_config(&mut self, config: &PipelineConfig) -> usize {
        let mut applied = 0;
        applied += apply_to::<OrientationPass, _, _>(self, config.orientation, |p| &mut p.settings);
        applied += apply_to::<BilateralPass, _, _>(self, config.bilateral, |p| &mut p.settings);
        applied += apply_to::<DownscalePass, _, _>(self, config.downscale, |p| &mut p.settings);
        applied += apply_to::<StructurePass, _, _>(self, config.structure, |p| &mut p.settings);
        applied += apply_to::<RayBoxPass, _, _>(self, config.ray_box, |p| &mut p.settings);
        applied += apply_to::<HoughPass, _, _>(self, config.hough, |p| &mut p.settings);
        applied += apply_to::<DogPass, _, _>(self, config.dog, |p| &mut p.settings);
        applied += apply_to::<LowCutoffPass, _, _>(self, config.low_cutoff, |p| &mut p.settings);
        applied +=
            apply_to::<MagnitudeGatePass, _, _>(self, config.magnitude_gate, |p| &mut p.settings);
        for (id, &on) in &config.enabled {
            if self.set_enabled(id, on) {
                applied += 1;
            } else {
                warn!("config toggles unknown pass {id:?}");
            }
        }
        applied
    }
}
