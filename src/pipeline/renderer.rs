//! Frame loop tying the builders, the encoder and the render graph together.
//!
//! A frame walks: begin, build (scene, instances and terrain in parallel),
//! encode, acquire a slot, upload, record, submit. Everything before
//! submission can fail or be cancelled without touching the GPU timeline;
//! once submitted, a frame runs to completion.

use crate::backend::command::CommandList;
use crate::backend::traits::*;
use crate::backend::types::TextureReadback;
use crate::config::RendererConfig;
use crate::error::{Diagnostic, Diagnostics, RenderError, RenderResult};
use crate::frame::{
    Fence, FrameBufferKind, FrameCapacities, FrameId, FramePool, FrameSequencer, FrameSlot,
};
use crate::gpu::{
    DrawIndexedIndirectArgs, EncodedDraw, GBufferTexture, GpuLight, GpuMaterial, InstanceRecord,
    ModelRecord,
};
use crate::pipeline::indirect::{IndirectCommandBuffer, IndirectCommandEncoder};
use crate::pipeline::instance_stream::{InstanceStreamBuilder, InstanceStreamInput};
use crate::pipeline::scene_buffers::{SceneBufferBuilder, SceneBufferInput, SceneBuffers};
use crate::pipeline::shadow_pass::{plan_shadow, ShadowView};
use crate::pipeline::terrain::{TerrainFrame, TerrainStage};
use crate::pipeline::{build_deferred_graph, DeferredResources};
use crate::render_graph::{
    CompiledGraph, FrameContext, RenderGraph, RenderGraphExecutor, ResourceId,
};
use crate::resources::{GeometryArena, Mesh, MeshId};
use crate::scene::FrameInput;
use std::mem::size_of;

/// Counts describing one built frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub lights: u32,
    pub materials: usize,
    pub instances: usize,
    pub batches: usize,
    pub terrain_patches: usize,
    pub culled_patches: usize,
    /// Index of the light casting shadows, if any.
    pub shadow_caster: Option<usize>,
}

/// A frame that is fully built and recorded but not yet submitted.
///
/// Owns its frame slot until [`DeferredRenderer::submit_frame`] or
/// [`DeferredRenderer::cancel_frame`] consumes it.
#[derive(Debug)]
pub struct PreparedFrame {
    frame: FrameId,
    slot: FrameSlot,
    commands: CommandList,
    generation: u64,
    stats: FrameStats,
}

impl PreparedFrame {
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn commands(&self) -> &CommandList {
        &self.commands
    }
}

/// Result of a submitted frame.
#[derive(Debug)]
pub struct FrameReport {
    pub frame: FrameId,
    pub stats: FrameStats,
    /// Signals when the frame's GPU work has completed.
    pub fence: Fence,
    pub diagnostics: Vec<Diagnostic>,
}

/// What happened to one iteration of the render loop.
#[derive(Debug)]
pub enum FrameOutcome {
    Presented(FrameReport),
    /// The frame was abandoned before submission; the previous image stays.
    Dropped { error: RenderError },
}

impl FrameOutcome {
    pub fn is_presented(&self) -> bool {
        matches!(self, FrameOutcome::Presented(_))
    }
}

/// Per-frame CPU output, produced on worker threads.
struct BuiltFrame {
    scene: SceneBuffers,
    indirect: IndirectCommandBuffer,
    instances: Vec<InstanceRecord>,
    draw_arguments: Vec<DrawIndexedIndirectArgs>,
    models: Vec<ModelRecord>,
    terrain: Option<TerrainFrame>,
    shadow: Option<ShadowView>,
    stats: FrameStats,
}

fn capacities(config: &RendererConfig) -> FrameCapacities {
    let lights = (config.max_lights * size_of::<GpuLight>()) as u64;
    let materials = (config.max_materials * size_of::<GpuMaterial>()) as u64;
    let instances = config.max_instances as u64;
    FrameCapacities::default()
        .with(FrameBufferKind::Lights, lights)
        .with(FrameBufferKind::Materials, materials)
        .with(FrameBufferKind::Instances, instances * size_of::<InstanceRecord>() as u64)
        .with(FrameBufferKind::DrawArguments, instances * DrawIndexedIndirectArgs::SIZE)
        .with(FrameBufferKind::IndirectCommands, instances * EncodedDraw::STRIDE)
        .with(FrameBufferKind::Models, instances * size_of::<ModelRecord>() as u64)
}

/// GPU-driven deferred renderer over any [`GraphicsBackend`].
pub struct DeferredRenderer<B: GraphicsBackend> {
    backend: B,
    config: RendererConfig,
    geometry: GeometryArena,
    pool: FramePool,
    sequencer: FrameSequencer,
    graph: RenderGraph,
    compiled: CompiledGraph,
    resources: DeferredResources,
    executor: RenderGraphExecutor,
    scene_builder: SceneBufferBuilder,
    instance_builder: InstanceStreamBuilder,
    terrain_stage: TerrainStage,
    encoder: IndirectCommandEncoder,
    diagnostics: Diagnostics,
    /// Bumped whenever size-dependent targets are recreated.
    generation: u64,
    last_presented: Option<FrameId>,
    frames_dropped: u64,
}

impl<B: GraphicsBackend> DeferredRenderer<B> {
    /// Validates `config`, allocates frame slots and render targets.
    pub fn new(mut backend: B, config: RendererConfig) -> RenderResult<Self> {
        config.validate()?;
        let pool = FramePool::new(&mut backend, config.frames_in_flight, &capacities(&config))?;
        let (graph, resources) = build_deferred_graph(config.width, config.height, &config.shadow)?;
        let compiled = graph.compile()?;
        let mut executor = RenderGraphExecutor::new();
        executor.allocate_resources(&graph, &mut backend)?;
        log::info!(
            "Deferred renderer on {} backend: {}x{}, {} frames in flight",
            backend.name(),
            config.width,
            config.height,
            config.frames_in_flight
        );

        Ok(Self {
            scene_builder: SceneBufferBuilder::new(config.max_lights, config.max_materials),
            instance_builder: InstanceStreamBuilder::new(config.max_instances),
            terrain_stage: TerrainStage::new(config.terrain.clone()),
            encoder: IndirectCommandEncoder::new(),
            backend,
            config,
            geometry: GeometryArena::new(),
            pool,
            sequencer: FrameSequencer::new(),
            graph,
            compiled,
            resources,
            executor,
            diagnostics: Diagnostics::new(),
            generation: 0,
            last_presented: None,
            frames_dropped: 0,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn geometry(&self) -> &GeometryArena {
        &self.geometry
    }

    pub fn resources(&self) -> &DeferredResources {
        &self.resources
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn frame_pool(&self) -> &FramePool {
        &self.pool
    }

    /// Last frame whose commands were submitted.
    pub fn last_presented(&self) -> Option<FrameId> {
        self.last_presented
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Adds a mesh to the shared geometry buffers.
    pub fn register_mesh(&mut self, mesh: &Mesh) -> MeshId {
        self.geometry.add(mesh)
    }

    /// Diagnostics recorded since the last call.
    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.take()
    }

    /// Builds and submits one frame.
    pub fn render_frame(&mut self, input: &FrameInput) -> RenderResult<FrameReport> {
        let prepared = self.prepare_frame(input)?;
        self.submit_frame(prepared)
    }

    /// Runs one loop iteration with the error policy applied.
    ///
    /// Recoverable errors drop the frame and keep the previous image;
    /// fatal ones are returned and should stop the loop.
    pub fn tick(&mut self, input: &FrameInput) -> RenderResult<FrameOutcome> {
        match self.render_frame(input) {
            Ok(report) => Ok(FrameOutcome::Presented(report)),
            Err(error) if !error.is_fatal() => {
                self.frames_dropped += 1;
                self.diagnostics.record(Diagnostic::FrameDropped {
                    reason: error.to_string(),
                });
                Ok(FrameOutcome::Dropped { error })
            }
            Err(error) => {
                log::error!("Render loop stopped: {error}");
                Err(error)
            }
        }
    }

    /// Builds, encodes, uploads and records a frame without submitting it.
    pub fn prepare_frame(&mut self, input: &FrameInput) -> RenderResult<PreparedFrame> {
        let frame = self.sequencer.begin()?;
        match self.prepare(frame, input) {
            Ok(prepared) => Ok(prepared),
            Err(error) => {
                if let Err(cancel) = self.sequencer.cancel(frame) {
                    log::error!("Could not cancel {frame} after '{error}': {cancel}");
                }
                Err(error)
            }
        }
    }

    /// Submits a prepared frame.
    ///
    /// A frame prepared before the last [`resize`](Self::resize) recorded
    /// commands against destroyed targets and is dropped instead.
    pub fn submit_frame(&mut self, prepared: PreparedFrame) -> RenderResult<FrameReport> {
        let PreparedFrame {
            frame,
            slot,
            commands,
            generation,
            stats,
        } = prepared;
        if generation != self.generation {
            self.pool.release(slot);
            self.sequencer.cancel(frame)?;
            return Err(RenderError::FrameDropped(format!(
                "{frame} was recorded before the render targets were resized"
            )));
        }

        let fence = match self.backend.submit(commands) {
            Ok(fence) => fence,
            Err(err) => {
                self.pool.release(slot);
                self.sequencer.cancel(frame)?;
                return Err(err.into());
            }
        };
        self.pool.retire(slot, fence.clone())?;
        self.sequencer.mark_submitted(frame)?;
        self.last_presented = Some(frame);
        log::debug!(
            "Submitted {frame}: {} batches, {} instances, {} lights",
            stats.batches,
            stats.instances,
            stats.lights
        );
        Ok(FrameReport {
            frame,
            stats,
            fence,
            diagnostics: self.diagnostics.take(),
        })
    }

    /// Abandons a prepared frame and returns its slot without waiting.
    pub fn cancel_frame(&mut self, prepared: PreparedFrame) -> RenderResult<()> {
        self.pool.release(prepared.slot);
        self.sequencer.cancel(prepared.frame)?;
        self.diagnostics.record(Diagnostic::FrameDropped {
            reason: format!("{} cancelled before submission", prepared.frame),
        });
        Ok(())
    }

    fn prepare(&mut self, frame: FrameId, input: &FrameInput) -> RenderResult<PreparedFrame> {
        let built = self.build(frame, input)?;
        self.sequencer.mark_built(frame)?;
        self.sequencer.mark_encoded(frame)?;

        // New meshes replace the shared geometry buffers, which in-flight frames may still read.
        if self.geometry.needs_upload() && !self.geometry.is_empty() {
            self.pool.wait_idle(&mut self.backend)?;
            self.geometry.upload(&mut self.backend)?;
        }

        let mut slot = self.pool.acquire(&mut self.backend, frame)?;
        match self.record(&mut slot, &built) {
            Ok(commands) => Ok(PreparedFrame {
                frame,
                slot,
                commands,
                generation: self.generation,
                stats: built.stats,
            }),
            Err(error) => {
                self.pool.release(slot);
                Err(error)
            }
        }
    }

    /// Runs the CPU builders and the encoder. Nothing here touches the backend.
    fn build(&self, frame: FrameId, input: &FrameInput) -> RenderResult<BuiltFrame> {
        let shadow = match plan_shadow(&input.lights, &input.camera, &self.config.shadow) {
            Ok(view) => Some(view),
            Err(RenderError::NoShadowCaster) => {
                self.diagnostics.record(Diagnostic::NoShadowCaster);
                None
            }
            Err(err) => return Err(err),
        };

        let scene_input = SceneBufferInput {
            camera: &input.camera,
            lights: &input.lights,
            materials: &input.materials,
            ambient: input.ambient.unwrap_or(self.config.ambient),
            shadow: shadow.as_ref(),
        };
        let instance_input = InstanceStreamInput {
            frame,
            drawables: &input.drawables,
            morph_overrides: &input.morph_overrides,
            geometry: &self.geometry,
            material_count: input.materials.len(),
        };
        let frustum = input.camera.frustum();
        let diagnostics = &self.diagnostics;
        let scene_builder = &self.scene_builder;
        let instance_builder = &self.instance_builder;
        let terrain_stage = &self.terrain_stage;

        let (scene, (stream, terrain)) = rayon::join(
            || scene_builder.build(&scene_input),
            || {
                rayon::join(
                    || instance_builder.build(&instance_input, diagnostics),
                    || {
                        input
                            .terrain
                            .as_ref()
                            .map(|terrain| {
                                terrain_stage.build(
                                    terrain,
                                    input.camera.position,
                                    &frustum,
                                    input.materials.len(),
                                    diagnostics,
                                )
                            })
                            .transpose()
                    },
                )
            },
        );
        let scene = scene?;
        let stream = stream?;
        let terrain = terrain?;

        let indirect = self.encoder.encode(&stream, &self.config.bindings, frame)?;
        let stats = FrameStats {
            lights: scene.light_count(),
            materials: scene.materials.len(),
            instances: stream.instances.len(),
            batches: stream.batches.len(),
            terrain_patches: terrain.as_ref().map_or(0, |t| t.factors.len()),
            culled_patches: terrain.as_ref().map_or(0, |t| t.culled_patches),
            shadow_caster: shadow.map(|s| s.light_index),
        };
        Ok(BuiltFrame {
            models: stream.model_records(),
            scene,
            indirect,
            instances: stream.instances,
            draw_arguments: stream.draw_arguments,
            terrain,
            shadow,
            stats,
        })
    }

    /// Uploads the frame into its slot and records the graph.
    fn record(&mut self, slot: &mut FrameSlot, built: &BuiltFrame) -> RenderResult<CommandList> {
        let scene = &built.scene;
        let mut uploads: Vec<(FrameBufferKind, &[u8])> = vec![
            (
                FrameBufferKind::SceneConstants,
                bytemuck::bytes_of(&scene.scene_constants),
            ),
            (
                FrameBufferKind::FragmentUniforms,
                bytemuck::bytes_of(&scene.fragment_uniforms),
            ),
            (
                FrameBufferKind::LightConstants,
                bytemuck::bytes_of(&scene.light_constants),
            ),
            (FrameBufferKind::Uniforms, bytemuck::bytes_of(&scene.uniforms)),
            (FrameBufferKind::Lights, bytemuck::cast_slice(&scene.lights)),
            (FrameBufferKind::Materials, bytemuck::cast_slice(&scene.materials)),
            (FrameBufferKind::Instances, bytemuck::cast_slice(&built.instances)),
            (
                FrameBufferKind::DrawArguments,
                bytemuck::cast_slice(&built.draw_arguments),
            ),
            (FrameBufferKind::Models, bytemuck::cast_slice(&built.models)),
            (
                FrameBufferKind::IndirectCommands,
                bytemuck::cast_slice(&built.indirect.commands),
            ),
        ];
        if let Some(terrain) = &built.terrain {
            uploads.extend([
                (
                    FrameBufferKind::ModelParams,
                    bytemuck::bytes_of(&terrain.model_params),
                ),
                (
                    FrameBufferKind::TerrainUniforms,
                    bytemuck::bytes_of(&terrain.uniforms),
                ),
                (
                    FrameBufferKind::TessellationFactors,
                    bytemuck::cast_slice(&terrain.factors),
                ),
                (
                    FrameBufferKind::TerrainVertices,
                    bytemuck::cast_slice(&terrain.vertices),
                ),
                (
                    FrameBufferKind::TerrainIndices,
                    bytemuck::cast_slice(&terrain.indices),
                ),
            ]);
        }
        let buffers = slot.buffers_mut();
        for (kind, bytes) in uploads {
            buffers.upload(&mut self.backend, kind, bytes)?;
        }

        let context = FrameContext {
            frame: slot.frame(),
            bindings: &self.config.bindings,
            buffers: slot.buffers(),
            geometry: self.geometry.buffers(),
            indirect: &built.indirect,
            terrain: built.terrain.as_ref().and_then(TerrainFrame::draw),
            shadow: built.shadow.as_ref(),
            clear_color: self.config.clear_color,
        };
        self.executor.execute(&self.graph, &self.compiled, &context)
    }

    /// Reads back the lit composite of the last completed frame.
    pub fn present_image(&mut self) -> RenderResult<TextureReadback> {
        self.read_resource(self.resources.lit_color)
    }

    /// Reads back one G-buffer channel, or the shadow map.
    pub fn debug_view(&mut self, channel: GBufferTexture) -> RenderResult<TextureReadback> {
        self.read_resource(self.resources.channel(channel))
    }

    /// Depth buffer of the geometry pass.
    pub fn depth_view(&mut self) -> RenderResult<TextureReadback> {
        self.read_resource(self.resources.gbuffer_depth)
    }

    fn read_resource(&mut self, resource: ResourceId) -> RenderResult<TextureReadback> {
        let texture = self.executor.texture(resource).ok_or_else(|| {
            RenderError::Backend(BackendError::InvalidHandle(format!(
                "render target {resource:?} is not allocated"
            )))
        })?;
        Ok(self.backend.read_texture(texture)?)
    }

    /// Recreates the size-dependent targets after all in-flight work completes.
    ///
    /// Frames prepared before the resize are dropped on submission.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if (width, height) == (self.config.width, self.config.height) {
            return Ok(());
        }
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidConfig(format!(
                "cannot resize to {width}x{height}"
            )));
        }
        self.pool.wait_idle(&mut self.backend)?;
        let (graph, resources) = build_deferred_graph(width, height, &self.config.shadow)?;
        let compiled = graph.compile()?;
        self.executor.cleanup(&mut self.backend);
        self.executor.allocate_resources(&graph, &mut self.backend)?;
        self.graph = graph;
        self.compiled = compiled;
        self.resources = resources;
        self.config.width = width;
        self.config.height = height;
        self.generation += 1;
        log::info!("Resized render targets to {width}x{height}");
        Ok(())
    }

    /// Waits for outstanding work and releases every GPU resource.
    pub fn shutdown(mut self) -> RenderResult<B> {
        self.pool.wait_idle(&mut self.backend)?;
        self.executor.cleanup(&mut self.backend);
        if let Some(buffers) = self.geometry.buffers() {
            self.backend.destroy_buffer(buffers.vertices);
            self.backend.destroy_buffer(buffers.indices);
        }
        self.pool.destroy(&mut self.backend)?;
        Ok(self.backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::{CompletionMode, SoftwareBackend};
    use crate::resources::Material;
    use crate::scene::{Camera, Drawable, Light};
    use glam::Vec3;

    fn renderer(mode: CompletionMode) -> DeferredRenderer<SoftwareBackend> {
        let config = RendererConfig::default()
            .with_size(16, 16)
            .with_shadow(crate::pipeline::ShadowConfig {
                resolution: 32,
                ..Default::default()
            });
        DeferredRenderer::new(SoftwareBackend::with_completion(mode), config).unwrap()
    }

    fn scene(cube: MeshId) -> FrameInput {
        let mut input = FrameInput::new(Camera::new(Vec3::new(0.0, 2.0, 4.0), Vec3::ZERO));
        let material = input.add_material(Material::plastic(Vec3::new(0.8, 0.2, 0.2)));
        input.add_drawable(Drawable::new(cube, material));
        input.add_light(Light::sun(Vec3::new(-1.0, -1.0, -1.0), Vec3::ONE, 1.0));
        input
    }

    #[test]
    fn test_frames_submit_in_order() {
        let mut renderer = renderer(CompletionMode::Immediate);
        let cube = renderer.register_mesh(&Mesh::cube());
        let input = scene(cube);
        let first = renderer.render_frame(&input).unwrap();
        let second = renderer.render_frame(&input).unwrap();
        assert_eq!(first.frame, FrameId(0));
        assert_eq!(second.frame, FrameId(1));
        assert_eq!(first.stats.batches, 1);
        assert_eq!(first.stats.shadow_caster, Some(0));
        assert!(second.fence.is_signaled());
    }

    #[test]
    fn test_cancelled_frame_returns_slot() {
        let mut renderer = renderer(CompletionMode::Deferred);
        let cube = renderer.register_mesh(&Mesh::cube());
        let input = scene(cube);
        let prepared = renderer.prepare_frame(&input).unwrap();
        renderer.cancel_frame(prepared).unwrap();
        assert_eq!(renderer.backend().submission_count(), 0);
        assert_eq!(renderer.frame_pool().in_flight(), 0);

        let report = renderer.render_frame(&input).unwrap();
        assert_eq!(report.frame, FrameId(1));
        assert!(!report.fence.is_signaled());
        renderer.backend_mut().poll(true).unwrap();
        assert!(report.fence.is_signaled());
    }

    #[test]
    fn test_resize_drops_stale_frame() {
        let mut renderer = renderer(CompletionMode::Immediate);
        let cube = renderer.register_mesh(&Mesh::cube());
        let input = scene(cube);
        let prepared = renderer.prepare_frame(&input).unwrap();
        renderer.resize(8, 8).unwrap();
        assert!(matches!(
            renderer.submit_frame(prepared),
            Err(RenderError::FrameDropped(_))
        ));
        renderer.render_frame(&input).unwrap();
        let image = renderer.present_image().unwrap();
        assert_eq!((image.width, image.height), (8, 8));
    }

    #[test]
    fn test_tick_drops_recoverable_errors() {
        let mut renderer = renderer(CompletionMode::Immediate);
        let cube = renderer.register_mesh(&Mesh::cube());
        let mut input = scene(cube);
        input.drawables[0].material = crate::resources::MaterialId(7);
        let outcome = renderer.tick(&input).unwrap();
        assert!(matches!(
            outcome,
            FrameOutcome::Dropped {
                error: RenderError::UnknownMaterial(7)
            }
        ));
        assert_eq!(renderer.frames_dropped(), 1);
        assert_eq!(renderer.backend().submission_count(), 0);
    }

    #[test]
    fn test_device_loss_is_fatal() {
        let mut renderer = renderer(CompletionMode::Immediate);
        let cube = renderer.register_mesh(&Mesh::cube());
        let input = scene(cube);
        renderer.backend_mut().lose_device();
        let error = renderer.tick(&input).unwrap_err();
        assert!(error.is_fatal());
    }
}
