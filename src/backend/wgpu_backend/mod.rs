//! wgpu backend implementation
//!
//! Headless realization of recorded command lists: buffers and textures
//! map to wgpu resources, each pass kind maps to a WGSL pipeline built on
//! first use, and fences signal from `on_submitted_work_done`.
//!
//! Vertices, instances and materials are pulled from storage buffers, so
//! no pipeline declares vertex buffer layouts.

use crate::backend::command::{
    Command, CommandList, DepthBias, LoadOp, PassDescriptor, PassKind,
};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::frame::Fence;
use crate::gpu::{BindingTable, BufferIndex, GBufferTexture};
use crate::shaders::{BindingKind, ShaderProgram, VertexEntry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Depth32Float resolves about 2^-24 near the far plane; constant bias is
/// expressed in those units.
const DEPTH_BIAS_UNITS: f32 = (1u32 << 24) as f32;

struct GpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
    usage: BufferUsage,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDescriptor,
}

/// Everything that selects a distinct render pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    kind: PassKind,
    entry: VertexEntry,
    colors: Vec<TextureFormat>,
    depth: Option<TextureFormat>,
    /// Constant, slope and clamp as raw `f32` bits.
    bias: Option<[u32; 3]>,
    /// Slots that differ from the canonical numbering.
    remapped: Vec<(BufferIndex, u32)>,
}

impl PipelineKey {
    fn table(&self) -> BindingTable {
        self.remapped
            .iter()
            .fold(BindingTable::default(), |table, &(index, slot)| table.with_remap(index, slot))
    }

    fn bias(&self) -> wgpu::DepthBiasState {
        match self.bias {
            Some([constant, slope, clamp]) => wgpu::DepthBiasState {
                constant: (f32::from_bits(constant) * DEPTH_BIAS_UNITS).round() as i32,
                slope_scale: f32::from_bits(slope),
                clamp: f32::from_bits(clamp),
            },
            None => wgpu::DepthBiasState::default(),
        }
    }
}

struct Pipeline {
    pipeline: wgpu::RenderPipeline,
    buffer_layout: wgpu::BindGroupLayout,
    texture_layout: Option<wgpu::BindGroupLayout>,
    buffers: Vec<(BufferIndex, BindingKind)>,
}

enum DrawCall {
    Indirect { buffer: BufferHandle, offset: u64 },
    Indexed { first_index: u32, index_count: u32, base_vertex: i32 },
    Fullscreen,
}

/// A draw with its pipeline resolved and bind groups created, ready to be
/// replayed inside a wgpu render pass.
struct PlannedDraw {
    key: PipelineKey,
    groups: Vec<wgpu::BindGroup>,
    index_buffer: Option<BufferHandle>,
    call: DrawCall,
}

/// Binding state while a pass is being planned.
struct PassState<'c> {
    desc: &'c PassDescriptor,
    buffers: HashMap<BufferIndex, (BufferHandle, u32, u64)>,
    textures: HashMap<GBufferTexture, TextureHandle>,
    index_buffer: Option<BufferHandle>,
    draws: Vec<PlannedDraw>,
}

/// wgpu-based graphics backend
pub struct WgpuBackend {
    _instance: wgpu::Instance,
    adapter_info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: HashMap<u64, GpuBuffer>,
    textures: HashMap<u64, GpuTexture>,
    pipelines: HashMap<PipelineKey, Pipeline>,
    next_id: u64,
    submissions: u64,
    device_lost: Arc<AtomicBool>,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::COPY_SRC) {
            result |= wgpu::BufferUsages::COPY_SRC;
        }
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        if usage.contains(BufferUsage::STORAGE) {
            result |= wgpu::BufferUsages::STORAGE;
        }
        if usage.contains(BufferUsage::INDIRECT) {
            result |= wgpu::BufferUsages::INDIRECT;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_load_op(load: &LoadOp) -> wgpu::LoadOp<wgpu::Color> {
        match load {
            LoadOp::Clear(color) => wgpu::LoadOp::Clear(wgpu::Color {
                r: color[0] as f64,
                g: color[1] as f64,
                b: color[2] as f64,
                a: color[3] as f64,
            }),
            LoadOp::Load => wgpu::LoadOp::Load,
        }
    }

    async fn request_device(
    ) -> BackendResult<(wgpu::Instance, wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all()),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No GPU adapter found".to_string()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Found adapter: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        // Indirect draws start at a per-batch first instance.
        let required_features = wgpu::Features::INDIRECT_FIRST_INSTANCE;
        if !adapter.features().contains(required_features) {
            return Err(BackendError::InitializationFailed(format!(
                "adapter {} does not support indirect first instance",
                adapter_info.name
            )));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Stellar Device"),
                    required_features,
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        log::info!(
            "Device created with max texture size: {}",
            device.limits().max_texture_dimension_2d
        );

        Ok((instance, adapter, device, queue))
    }

    /// Create a backend without a surface; results are read back from textures.
    pub fn new_headless() -> BackendResult<Self> {
        let (instance, adapter, device, queue) = pollster::block_on(Self::request_device())?;

        let device_lost = Arc::new(AtomicBool::new(false));
        let lost = Arc::clone(&device_lost);
        device.set_device_lost_callback(move |reason, message| {
            log::error!("GPU device lost ({reason:?}): {message}");
            lost.store(true, Ordering::Release);
        });
        device.on_uncaptured_error(Box::new(|error| {
            log::error!("Uncaptured wgpu error: {error}");
        }));

        Ok(Self {
            _instance: instance,
            adapter_info: adapter.get_info(),
            device,
            queue,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            pipelines: HashMap::new(),
            next_id: 1,
            submissions: 0,
            device_lost,
        })
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    pub fn submission_count(&self) -> u64 {
        self.submissions
    }

    fn check_device(&self) -> BackendResult<()> {
        if self.device_lost.load(Ordering::Acquire) {
            Err(BackendError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer(&self, handle: BufferHandle) -> BackendResult<&GpuBuffer> {
        self.buffers
            .get(&handle.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", handle.0)))
    }

    fn texture(&self, handle: TextureHandle) -> BackendResult<&GpuTexture> {
        self.textures
            .get(&handle.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("texture {}", handle.0)))
    }

    /// Runs `f` inside a validation error scope and surfaces what it caught.
    fn validated<T>(&self, f: impl FnOnce() -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(error.to_string()),
            None => Ok(value),
        }
    }

    /// Blocks until `staging` is mapped and returns its contents.
    fn map_staging(&self, staging: &wgpu::Buffer) -> BackendResult<Vec<u8>> {
        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;
        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }

    /// Slots bound in `commands` that differ from the canonical numbering.
    fn remapped_slots(commands: &CommandList) -> BackendResult<Vec<(BufferIndex, u32)>> {
        let mut slots: HashMap<BufferIndex, u32> = HashMap::new();
        for command in commands.commands() {
            if let Command::BindBuffer { index, slot, .. } = command {
                if let Some(previous) = slots.insert(*index, *slot) {
                    if previous != *slot {
                        return Err(BackendError::InvalidCommand(format!(
                            "{index:?} bound at slots {previous} and {slot} in one submission"
                        )));
                    }
                }
            }
        }
        let mut remapped: Vec<_> = slots
            .into_iter()
            .filter(|(index, slot)| index.slot() != *slot)
            .collect();
        remapped.sort();
        Ok(remapped)
    }

    fn pipeline_key(
        &self,
        desc: &PassDescriptor,
        entry: VertexEntry,
        remapped: &[(BufferIndex, u32)],
    ) -> BackendResult<PipelineKey> {
        let colors = desc
            .color_targets
            .iter()
            .map(|target| self.texture(target.texture).map(|t| t.desc.format))
            .collect::<BackendResult<Vec<_>>>()?;
        let depth = desc
            .depth_target
            .as_ref()
            .map(|target| self.texture(target.texture).map(|t| t.desc.format))
            .transpose()?;
        let bias = desc
            .depth_target
            .as_ref()
            .and_then(|target| target.bias)
            .map(|DepthBias { constant, slope_scale, clamp }| {
                [constant.to_bits(), slope_scale.to_bits(), clamp.to_bits()]
            });
        Ok(PipelineKey {
            kind: desc.kind,
            entry,
            colors,
            depth,
            bias,
            remapped: remapped.to_vec(),
        })
    }

    fn create_pipeline(&self, key: &PipelineKey) -> BackendResult<Pipeline> {
        let program = ShaderProgram::for_pass(key.kind);
        let table = key.table();
        let buffers = program.buffers(key.entry);
        let label = format!("{} {}", program.label, key.entry.name());

        let created = self.validated(|| {
            let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(program.label),
                source: wgpu::ShaderSource::Wgsl(program.source(&table).into()),
            });

            let buffer_entries: Vec<wgpu::BindGroupLayoutEntry> = buffers
                .iter()
                .map(|(index, kind)| wgpu::BindGroupLayoutEntry {
                    binding: table.slot(*index),
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: match kind {
                            BindingKind::Uniform => wgpu::BufferBindingType::Uniform,
                            BindingKind::Storage => {
                                wgpu::BufferBindingType::Storage { read_only: true }
                            }
                        },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect();
            let buffer_layout =
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some(&label),
                        entries: &buffer_entries,
                    });

            let texture_layout = program.samples_gbuffer.then(|| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = GBufferTexture::ALL
                    .iter()
                    .map(|texture| wgpu::BindGroupLayoutEntry {
                        binding: texture.binding(),
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: if *texture == GBufferTexture::Shadow {
                                wgpu::TextureSampleType::Depth
                            } else {
                                wgpu::TextureSampleType::Float { filterable: false }
                            },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    })
                    .collect();
                self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("G-Buffer Textures"),
                    entries: &entries,
                })
            });

            let mut layouts = vec![&buffer_layout];
            layouts.extend(texture_layout.as_ref());
            let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&label),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

            let color_targets: Vec<Option<wgpu::ColorTargetState>> = key
                .colors
                .iter()
                .map(|format| {
                    Some(wgpu::ColorTargetState {
                        format: Self::convert_texture_format(*format),
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })
                })
                .collect();
            let depth_stencil = key.depth.map(|format| wgpu::DepthStencilState {
                format: Self::convert_texture_format(format),
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: key.bias(),
            });

            let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: key.entry.name(),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: program.fragment_entry.map(|entry_point| wgpu::FragmentState {
                    module: &module,
                    entry_point,
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
            (pipeline, buffer_layout, texture_layout)
        });

        let (pipeline, buffer_layout, texture_layout) =
            created.map_err(|e| BackendError::PipelineCreationFailed(format!("{label}: {e}")))?;
        log::debug!("Created pipeline {label}");
        Ok(Pipeline {
            pipeline,
            buffer_layout,
            texture_layout,
            buffers,
        })
    }

    fn plan_draw(
        &mut self,
        state: &PassState<'_>,
        entry: VertexEntry,
        call: DrawCall,
        remapped: &[(BufferIndex, u32)],
    ) -> BackendResult<PlannedDraw> {
        let key = self.pipeline_key(state.desc, entry, remapped)?;
        if !self.pipelines.contains_key(&key) {
            let pipeline = self.create_pipeline(&key)?;
            self.pipelines.insert(key.clone(), pipeline);
        }
        let pipeline = self
            .pipelines
            .get(&key)
            .ok_or_else(|| BackendError::PipelineCreationFailed(format!("{key:?} missing")))?;

        let mut buffer_entries = Vec::with_capacity(pipeline.buffers.len());
        for (index, _) in &pipeline.buffers {
            let (handle, slot, offset) = state.buffers.get(index).copied().ok_or_else(|| {
                BackendError::InvalidCommand(format!(
                    "{} draw without a buffer bound at {index:?}",
                    state.desc.label
                ))
            })?;
            buffer_entries.push(wgpu::BindGroupEntry {
                binding: slot,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &self.buffer(handle)?.buffer,
                    offset,
                    size: None,
                }),
            });
        }
        let mut groups = vec![self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&state.desc.label),
            layout: &pipeline.buffer_layout,
            entries: &buffer_entries,
        })];

        if let Some(layout) = &pipeline.texture_layout {
            let mut entries = Vec::with_capacity(GBufferTexture::ALL.len());
            for binding in GBufferTexture::ALL {
                let handle = state.textures.get(&binding).copied().ok_or_else(|| {
                    BackendError::InvalidCommand(format!(
                        "{} has no {binding:?} texture bound",
                        state.desc.label
                    ))
                })?;
                entries.push(wgpu::BindGroupEntry {
                    binding: binding.binding(),
                    resource: wgpu::BindingResource::TextureView(&self.texture(handle)?.view),
                });
            }
            groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("G-Buffer Textures"),
                layout,
                entries: &entries,
            }));
        }

        Ok(PlannedDraw {
            key,
            groups,
            index_buffer: state.index_buffer,
            call,
        })
    }

    /// Replays one planned pass into `encoder`.
    fn record_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        desc: &PassDescriptor,
        draws: &[PlannedDraw],
    ) -> BackendResult<()> {
        let color_attachments = desc
            .color_targets
            .iter()
            .map(|target| -> BackendResult<_> {
                Ok(Some(wgpu::RenderPassColorAttachment {
                    view: &self.texture(target.texture)?.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: Self::convert_load_op(&target.load),
                        store: wgpu::StoreOp::Store,
                    },
                }))
            })
            .collect::<BackendResult<Vec<_>>>()?;
        let depth_stencil_attachment = desc
            .depth_target
            .as_ref()
            .map(|target| -> BackendResult<_> {
                Ok(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.texture(target.texture)?.view,
                    depth_ops: Some(wgpu::Operations {
                        load: match target.clear {
                            Some(depth) => wgpu::LoadOp::Clear(depth),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                })
            })
            .transpose()?;

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&desc.label),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for draw in draws {
            let pipeline = self
                .pipelines
                .get(&draw.key)
                .ok_or_else(|| BackendError::InvalidCommand("draw lost its pipeline".to_string()))?;
            render_pass.set_pipeline(&pipeline.pipeline);
            for (index, group) in draw.groups.iter().enumerate() {
                render_pass.set_bind_group(index as u32, group, &[]);
            }
            if let Some(handle) = draw.index_buffer {
                render_pass.set_index_buffer(
                    self.buffer(handle)?.buffer.slice(..),
                    wgpu::IndexFormat::Uint32,
                );
            }
            match draw.call {
                DrawCall::Indirect { buffer, offset } => {
                    render_pass.draw_indexed_indirect(&self.buffer(buffer)?.buffer, offset);
                }
                DrawCall::Indexed {
                    first_index,
                    index_count,
                    base_vertex,
                } => {
                    render_pass.draw_indexed(
                        first_index..first_index + index_count,
                        base_vertex,
                        0..1,
                    );
                }
                DrawCall::Fullscreen => render_pass.draw(0..3, 0..1),
            }
        }
        Ok(())
    }

    fn encode(&mut self, commands: &CommandList) -> BackendResult<wgpu::CommandBuffer> {
        let remapped = Self::remapped_slots(commands)?;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&commands.label),
        });
        let mut active: Option<PassState<'_>> = None;

        for command in commands.commands() {
            let state = match (command, active.as_mut()) {
                (Command::BeginPass(desc), None) => {
                    active = Some(PassState {
                        desc,
                        buffers: HashMap::new(),
                        textures: HashMap::new(),
                        index_buffer: None,
                        draws: Vec::new(),
                    });
                    continue;
                }
                (Command::BeginPass(desc), Some(state)) => {
                    return Err(BackendError::InvalidCommand(format!(
                        "pass {} begins inside {}",
                        desc.label, state.desc.label
                    )))
                }
                (command, None) => {
                    return Err(BackendError::InvalidCommand(format!(
                        "{command:?} outside a pass"
                    )))
                }
                (_, Some(state)) => state,
            };

            let draw = match command {
                Command::BindBuffer {
                    index,
                    slot,
                    buffer,
                    offset,
                } => {
                    self.buffer(*buffer)?;
                    state.buffers.insert(*index, (*buffer, *slot, *offset));
                    None
                }
                Command::BindTexture { binding, texture } => {
                    self.texture(*texture)?;
                    state.textures.insert(*binding, *texture);
                    None
                }
                Command::SetIndexBuffer { buffer } => {
                    self.buffer(*buffer)?;
                    state.index_buffer = Some(*buffer);
                    None
                }
                Command::DrawIndexedIndirect { buffer, offset } => Some((
                    VertexEntry::Instanced,
                    DrawCall::Indirect {
                        buffer: *buffer,
                        offset: *offset,
                    },
                )),
                Command::DrawIndexed {
                    first_index,
                    index_count,
                    base_vertex,
                } => Some((
                    VertexEntry::Model,
                    DrawCall::Indexed {
                        first_index: *first_index,
                        index_count: *index_count,
                        base_vertex: *base_vertex,
                    },
                )),
                Command::DrawFullscreen => Some((VertexEntry::Fullscreen, DrawCall::Fullscreen)),
                Command::EndPass => {
                    if let Some(state) = active.take() {
                        self.record_pass(&mut encoder, state.desc, &state.draws)?;
                    }
                    continue;
                }
                Command::BeginPass(_) => None,
            };

            if let Some((entry, call)) = draw {
                let fullscreen = entry == VertexEntry::Fullscreen;
                if fullscreen != (state.desc.kind == PassKind::Lighting) {
                    return Err(BackendError::InvalidCommand(format!(
                        "{entry:?} draw inside a {:?} pass",
                        state.desc.kind
                    )));
                }
                if !fullscreen && state.index_buffer.is_none() {
                    return Err(BackendError::InvalidCommand(format!(
                        "indexed draw in {} without an index buffer",
                        state.desc.label
                    )));
                }
                let planned = self.plan_draw(state, entry, call, &remapped)?;
                state.draws.push(planned);
            }
        }

        if let Some(state) = active {
            return Err(BackendError::InvalidCommand(format!(
                "pass {} was never ended",
                state.desc.label
            )));
        }
        Ok(encoder.finish())
    }

    /// Bytes of one row of `desc` as laid out in a copy buffer.
    fn padded_row(desc: &TextureDescriptor) -> (u32, u32) {
        let unpadded = desc.width * desc.format.bytes_per_pixel();
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        (unpadded, unpadded.div_ceil(align) * align)
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        self.check_device()?;
        // Copies and writes move whole words.
        let align = wgpu::COPY_BUFFER_ALIGNMENT;
        let padded = desc.size.max(4).div_ceil(align) * align;
        let buffer = self
            .validated(|| {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: desc.label.as_deref(),
                    size: padded,
                    usage: Self::convert_buffer_usage(desc.usage),
                    mapped_at_creation: false,
                })
            })
            .map_err(BackendError::BufferCreationFailed)?;

        let id = self.next_id();
        self.buffers.insert(
            id,
            GpuBuffer {
                buffer,
                size: desc.size,
                usage: desc.usage,
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        self.check_device()?;
        let target = self.buffer(buffer)?;
        if offset + data.len() as u64 > target.size {
            return Err(BackendError::OutOfBounds {
                offset,
                len: data.len() as u64,
                size: target.size,
            });
        }
        if data.is_empty() {
            return Ok(());
        }
        if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(&target.buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            let len = data.len().next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize);
            padded.resize(len, 0);
            self.queue.write_buffer(&target.buffer, offset, &padded);
        }
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        self.check_device()?;
        let source = self.buffer(buffer)?;
        if !source.usage.contains(BufferUsage::COPY_SRC) {
            return Err(BackendError::ReadbackFailed(format!(
                "buffer {} was not created with COPY_SRC",
                buffer.0
            )));
        }
        let copy_size = source.buffer.size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: copy_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Buffer Readback"),
        });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &staging, 0, copy_size);
        let size = source.size as usize;
        self.queue.submit(Some(encoder.finish()));

        let mut data = self.map_staging(&staging)?;
        data.truncate(size);
        Ok(data)
    }

    fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.buffers.get(&buffer.0).map(|b| b.size)
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        self.check_device()?;
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has a zero extent",
                desc.label
            )));
        }
        let texture = self
            .validated(|| {
                self.device.create_texture(&wgpu::TextureDescriptor {
                    label: desc.label.as_deref(),
                    size: wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: Self::convert_texture_format(desc.format),
                    usage: Self::convert_texture_usage(desc.usage),
                    view_formats: &[],
                })
            })
            .map_err(BackendError::TextureCreationFailed)?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = self.next_id();
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                desc: desc.clone(),
            },
        );
        Ok(TextureHandle(id))
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<TextureReadback> {
        self.check_device()?;
        let source = self.texture(texture)?;
        let desc = source.desc.clone();
        let (unpadded, padded) = Self::padded_row(&desc);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Readback"),
            size: padded as u64 * desc.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Texture Readback"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: if desc.format.is_depth() {
                    wgpu::TextureAspect::DepthOnly
                } else {
                    wgpu::TextureAspect::All
                },
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(desc.height),
                },
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
        let bytes = self.map_staging(&staging)?;

        let texel_count = (desc.width * desc.height) as usize;
        let mut texels = Vec::with_capacity(texel_count * desc.format.channels());
        for row in bytes.chunks(padded as usize).take(desc.height as usize) {
            let row = &row[..unpadded as usize];
            match desc.format {
                TextureFormat::Rgba32Float | TextureFormat::Depth32Float => {
                    texels.extend(row.chunks_exact(4).map(bytemuck::pod_read_unaligned::<f32>));
                }
                TextureFormat::Rgba8Unorm => {
                    texels.extend(row.iter().map(|&b| b as f32 / 255.0));
                }
                TextureFormat::Rgba16Float => {
                    return Err(BackendError::ReadbackFailed(
                        "half-float readback is not supported".to_string(),
                    ))
                }
            }
        }
        Ok(TextureReadback {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            texels,
        })
    }

    fn submit(&mut self, commands: CommandList) -> BackendResult<Fence> {
        self.check_device()?;
        let label = commands.label.clone();
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let encoded = self.encode(&commands);
        let submitted = encoded.map(|command_buffer| self.queue.submit(Some(command_buffer)));
        let error = pollster::block_on(self.device.pop_error_scope());
        submitted?;
        if let Some(error) = error {
            return Err(BackendError::InvalidCommand(format!("{label}: {error}")));
        }
        self.check_device()?;

        let fence = Fence::new_unsignaled();
        let signal = fence.clone();
        self.queue.on_submitted_work_done(move || signal.signal());
        self.submissions += 1;
        log::trace!("Submitted {label} ({} commands)", commands.len());
        Ok(fence)
    }

    fn poll(&mut self, wait: bool) -> BackendResult<()> {
        self.check_device()?;
        self.device.poll(if wait {
            wgpu::Maintain::Wait
        } else {
            wgpu::Maintain::Poll
        });
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(gpu) = self.buffers.remove(&buffer.0) {
            gpu.buffer.destroy();
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(gpu) = self.textures.remove(&texture.0) {
            gpu.texture.destroy();
        }
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}
