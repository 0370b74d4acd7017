//! Renderer configuration.
//!
//! Every field has a default, so partial TOML or JSON documents
//! deserialize. [`RendererConfig::validate`] runs once at startup.

use crate::error::{RenderError, RenderResult};
use crate::gpu::BindingTable;
use crate::pipeline::shadow_pass::ShadowConfig;
use crate::pipeline::terrain::{TerrainConfig, MAX_TESSELLATION_LIMIT};
use crate::scene::AmbientLight;
use serde::{Deserialize, Serialize};

/// Background color of pixels no geometry covers.
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.66, 0.9, 0.96, 1.0];

/// Upper bound on frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    /// Number of frame slots, 1 to 3.
    pub frames_in_flight: usize,
    pub max_lights: usize,
    pub max_instances: usize,
    pub max_materials: usize,
    pub shadow: ShadowConfig,
    pub terrain: TerrainConfig,
    pub bindings: BindingTable,
    pub clear_color: [f32; 4],
    /// Used when a frame does not bring its own ambient term.
    pub ambient: AmbientLight,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frames_in_flight: 2,
            max_lights: 64,
            max_instances: 4096,
            max_materials: 256,
            shadow: ShadowConfig::default(),
            terrain: TerrainConfig::default(),
            bindings: BindingTable::default(),
            clear_color: DEFAULT_CLEAR_COLOR,
            ambient: AmbientLight::default(),
        }
    }
}

impl RendererConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_max_lights(mut self, max_lights: usize) -> Self {
        self.max_lights = max_lights;
        self
    }

    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn with_max_materials(mut self, max_materials: usize) -> Self {
        self.max_materials = max_materials;
        self
    }

    pub fn with_shadow(mut self, shadow: ShadowConfig) -> Self {
        self.shadow = shadow;
        self
    }

    pub fn with_terrain(mut self, terrain: TerrainConfig) -> Self {
        self.terrain = terrain;
        self
    }

    pub fn with_bindings(mut self, bindings: BindingTable) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }

    pub fn with_ambient(mut self, ambient: AmbientLight) -> Self {
        self.ambient = ambient;
        self
    }

    /// Binding uniqueness plus range checks.
    pub fn validate(&self) -> RenderResult<()> {
        self.bindings.validate()?;
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::InvalidConfig(format!(
                "render size {}x{} is empty",
                self.width, self.height
            )));
        }
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(RenderError::InvalidConfig(format!(
                "frames_in_flight must be between 1 and {MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        if self.max_instances == 0 || self.max_materials == 0 {
            return Err(RenderError::InvalidConfig(
                "instance and material capacities must be non-zero".to_string(),
            ));
        }
        if !(1..=MAX_TESSELLATION_LIMIT).contains(&self.terrain.max_tessellation) {
            return Err(RenderError::InvalidConfig(format!(
                "max_tessellation must be between 1 and {MAX_TESSELLATION_LIMIT}, got {}",
                self.terrain.max_tessellation
            )));
        }
        if !(self.terrain.detail_distance >= 0.0) {
            return Err(RenderError::InvalidConfig(
                "terrain detail distance must be non-negative".to_string(),
            ));
        }
        self.shadow.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::BufferIndex;
    use rstest::rstest;

    #[test]
    fn test_defaults_validate() {
        let config = RendererConfig::default();
        config.validate().unwrap();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.clear_color, DEFAULT_CLEAR_COLOR);
    }

    #[rstest]
    #[case(0)]
    #[case(4)]
    fn test_frames_in_flight_range(#[case] frames: usize) {
        let config = RendererConfig::default().with_frames_in_flight(frames);
        assert!(matches!(config.validate(), Err(RenderError::InvalidConfig(_))));
    }

    #[test]
    fn test_conflicting_remap_rejected() {
        let bindings = BindingTable::new().with_remap(BufferIndex::Instances, 17);
        let config = RendererConfig::default().with_bindings(bindings);
        assert!(matches!(
            config.validate(),
            Err(RenderError::BindingConflict { slot: 17, .. })
        ));
    }

    #[test]
    fn test_tessellation_cap_enforced() {
        let terrain = TerrainConfig {
            max_tessellation: 65,
            ..Default::default()
        };
        let config = RendererConfig::default().with_terrain(terrain);
        assert!(config.validate().is_err());
    }
}
