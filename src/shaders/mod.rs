//! WGSL programs of the three deferred passes.
//!
//! Sources carry `{{BufferIndex}}` placeholders in their `@binding`
//! attributes; [`ShaderProgram::source`] resolves them through a
//! [`BindingTable`] so shaders and recorded bindings always agree.
//! G-buffer textures of the lighting pass live in bind group 1 at their
//! [`crate::gpu::GBufferTexture`] binding.

use crate::backend::PassKind;
use crate::gpu::{BindingTable, BufferIndex};

const COMMON: &str = include_str!("common.wgsl");
const GEOMETRY: &str = include_str!("geometry.wgsl");
const GBUFFER: &str = include_str!("gbuffer.wgsl");
const SHADOW: &str = include_str!("shadow.wgsl");
const LIGHTING: &str = include_str!("lighting.wgsl");

/// How a buffer is declared in WGSL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Uniform,
    Storage,
}

/// Vertex entry points. Instanced draws read the instance stream, model
/// draws read a single [`BufferIndex::ModelParams`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexEntry {
    Instanced,
    Model,
    Fullscreen,
}

impl VertexEntry {
    pub fn name(self) -> &'static str {
        match self {
            VertexEntry::Instanced => "vs_instanced",
            VertexEntry::Model => "vs_model",
            VertexEntry::Fullscreen => "vs_fullscreen",
        }
    }

    fn buffers(self) -> &'static [(BufferIndex, BindingKind)] {
        match self {
            VertexEntry::Instanced => &[
                (BufferIndex::Vertices, BindingKind::Storage),
                (BufferIndex::Instances, BindingKind::Storage),
            ],
            VertexEntry::Model => &[
                (BufferIndex::Vertices, BindingKind::Storage),
                (BufferIndex::ModelParams, BindingKind::Uniform),
            ],
            VertexEntry::Fullscreen => &[],
        }
    }
}

#[derive(Debug)]
pub struct ShaderProgram {
    pub label: &'static str,
    parts: &'static [&'static str],
    pub fragment_entry: Option<&'static str>,
    /// Vertex entries the program provides.
    pub vertex_entries: &'static [VertexEntry],
    /// Buffers every entry of the program reads.
    buffers: &'static [(BufferIndex, BindingKind)],
    /// Whether bind group 1 holds the G-buffer textures.
    pub samples_gbuffer: bool,
}

pub const GBUFFER_PROGRAM: ShaderProgram = ShaderProgram {
    label: "gbuffer",
    parts: &[COMMON, GEOMETRY, GBUFFER],
    fragment_entry: Some("fs_main"),
    vertex_entries: &[VertexEntry::Instanced, VertexEntry::Model],
    buffers: &[
        (BufferIndex::SceneConstants, BindingKind::Uniform),
        (BufferIndex::Uniforms, BindingKind::Uniform),
        (BufferIndex::Materials, BindingKind::Storage),
    ],
    samples_gbuffer: false,
};

pub const SHADOW_PROGRAM: ShaderProgram = ShaderProgram {
    label: "shadow",
    parts: &[COMMON, GEOMETRY, SHADOW],
    fragment_entry: None,
    vertex_entries: &[VertexEntry::Instanced, VertexEntry::Model],
    buffers: &[(BufferIndex::Uniforms, BindingKind::Uniform)],
    samples_gbuffer: false,
};

pub const LIGHTING_PROGRAM: ShaderProgram = ShaderProgram {
    label: "lighting",
    parts: &[COMMON, LIGHTING],
    fragment_entry: Some("fs_main"),
    vertex_entries: &[VertexEntry::Fullscreen],
    buffers: &[
        (BufferIndex::Lights, BindingKind::Storage),
        (BufferIndex::LightConstants, BindingKind::Uniform),
        (BufferIndex::FragmentUniforms, BindingKind::Uniform),
        (BufferIndex::Uniforms, BindingKind::Uniform),
    ],
    samples_gbuffer: true,
};

impl ShaderProgram {
    pub fn for_pass(kind: PassKind) -> &'static ShaderProgram {
        match kind {
            PassKind::GBuffer => &GBUFFER_PROGRAM,
            PassKind::Shadow => &SHADOW_PROGRAM,
            PassKind::Lighting => &LIGHTING_PROGRAM,
        }
    }

    /// WGSL text with every binding placeholder resolved through `table`.
    pub fn source(&self, table: &BindingTable) -> String {
        let mut source = self.parts.join("\n");
        for index in BufferIndex::ALL {
            let placeholder = format!("{{{{{index:?}}}}}");
            if source.contains(&placeholder) {
                source = source.replace(&placeholder, &table.slot(index).to_string());
            }
        }
        source
    }

    /// Group 0 buffers read by `entry`, in declaration order.
    pub fn buffers(&self, entry: VertexEntry) -> Vec<(BufferIndex, BindingKind)> {
        let mut buffers = entry.buffers().to_vec();
        buffers.extend_from_slice(self.buffers);
        buffers
    }
}
