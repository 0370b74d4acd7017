//! Binding-slot contract shared by the CPU builders and every shader.
//!
//! Each logical buffer has one canonical slot. Shaders and command encoding
//! both resolve slots through [`BindingTable`], so a remap stays consistent
//! on both sides of the contract.

use crate::error::{RenderError, RenderResult};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Logical buffers bound by the pipeline, with their canonical slot numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum BufferIndex {
    Vertices = 0,
    Lights = 2,
    GBufferTextures = 9,
    ModelParams = 10,
    Uniforms = 11,
    SceneConstants = 12,
    Materials = 13,
    LightConstants = 14,
    FragmentUniforms = 15,
    Instances = 16,
    DrawArguments = 17,
    Models = 18,
    IndirectCommandBuffer = 19,
    Skybox = 20,
    SkyboxDiffuse = 21,
    BrdfLut = 22,
    SkyboxTextures = 23,
    WaterTextures = 24,
    TerrainUniforms = 25,
    TessellationFactors = 26,
}

impl BufferIndex {
    pub const COUNT: usize = 20;

    pub const ALL: [BufferIndex; Self::COUNT] = [
        BufferIndex::Vertices,
        BufferIndex::Lights,
        BufferIndex::GBufferTextures,
        BufferIndex::ModelParams,
        BufferIndex::Uniforms,
        BufferIndex::SceneConstants,
        BufferIndex::Materials,
        BufferIndex::LightConstants,
        BufferIndex::FragmentUniforms,
        BufferIndex::Instances,
        BufferIndex::DrawArguments,
        BufferIndex::Models,
        BufferIndex::IndirectCommandBuffer,
        BufferIndex::Skybox,
        BufferIndex::SkyboxDiffuse,
        BufferIndex::BrdfLut,
        BufferIndex::SkyboxTextures,
        BufferIndex::WaterTextures,
        BufferIndex::TerrainUniforms,
        BufferIndex::TessellationFactors,
    ];

    /// Canonical slot number.
    pub const fn slot(self) -> u32 {
        self as u32
    }

    /// Position of this index inside [`BufferIndex::ALL`].
    pub const fn ordinal(self) -> usize {
        let mut i = 0;
        while i < Self::COUNT {
            if Self::ALL[i] as u32 == self as u32 {
                return i;
            }
            i += 1;
        }
        Self::COUNT
    }
}

const fn canonical_slots_unique() -> bool {
    let mut i = 0;
    while i < BufferIndex::COUNT {
        let mut j = i + 1;
        while j < BufferIndex::COUNT {
            if BufferIndex::ALL[i] as u32 == BufferIndex::ALL[j] as u32 {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const_assert!(canonical_slots_unique());

/// Material texture slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TextureIndex {
    BaseColor = 0,
    Normal = 1,
    Roughness = 2,
    Metallic = 3,
    AmbientOcclusion = 4,
    ShadowMap = 5,
}

/// G-buffer attachments as seen by the lighting pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum GBufferTexture {
    Albedo = 0,
    Normal = 1,
    Position = 2,
    Shadow = 3,
    Specular = 4,
}

impl GBufferTexture {
    pub const ALL: [GBufferTexture; 5] = [
        GBufferTexture::Albedo,
        GBufferTexture::Normal,
        GBufferTexture::Position,
        GBufferTexture::Shadow,
        GBufferTexture::Specular,
    ];

    pub const fn binding(self) -> u32 {
        self as u32
    }
}

/// A single slot override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOverride {
    pub buffer: BufferIndex,
    pub slot: u32,
}

/// Resolves logical buffers to binding slots.
///
/// Starts from the canonical numbering; overrides move individual buffers.
/// [`BindingTable::validate`] must pass before the table is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingTable {
    remap: Vec<SlotOverride>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `buffer` to `slot`. A later override for the same buffer wins.
    pub fn with_remap(mut self, buffer: BufferIndex, slot: u32) -> Self {
        self.remap.retain(|o| o.buffer != buffer);
        self.remap.push(SlotOverride { buffer, slot });
        self
    }

    pub fn slot(&self, buffer: BufferIndex) -> u32 {
        self.remap
            .iter()
            .rev()
            .find(|o| o.buffer == buffer)
            .map(|o| o.slot)
            .unwrap_or(buffer.slot())
    }

    /// Resolved `(buffer, slot)` pairs in canonical order.
    pub fn resolved(&self) -> impl Iterator<Item = (BufferIndex, u32)> + '_ {
        BufferIndex::ALL.iter().map(move |&b| (b, self.slot(b)))
    }

    /// Checks that no two logical buffers share a slot.
    pub fn validate(&self) -> RenderResult<()> {
        let mut seen: Vec<(u32, BufferIndex)> = Vec::with_capacity(BufferIndex::COUNT);
        for (buffer, slot) in self.resolved() {
            if let Some(&(_, first)) = seen.iter().find(|(s, _)| *s == slot) {
                return Err(RenderError::BindingConflict {
                    slot,
                    first,
                    second: buffer,
                });
            }
            seen.push((slot, buffer));
        }
        Ok(())
    }
}
