//! CPU backend.
//!
//! Executes recorded command lists on the host: rasterizes geometry into
//! float render targets and runs the deferred lighting kernel per pixel.
//! Always available, deterministic, and the reference the GPU backend is
//! checked against.
//!
//! Submitted work either completes inside `submit` or, in
//! [`CompletionMode::Deferred`], waits in a queue until `poll`. While work
//! is queued its buffers are locked: writing them is a hazard and fails
//! with [`BackendError::BufferInUse`].

mod kernels;
mod raster;

use crate::backend::command::{Command, CommandList, LoadOp, PassDescriptor, PassKind};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::frame::Fence;
use crate::gpu::{BufferIndex, GBufferTexture, ModelParams};
use kernels::{DrawInstance, IndexRange, Targets};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// When submitted work completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// Inside `submit`; the returned fence is already signaled.
    #[default]
    Immediate,
    /// On a later `poll`, one submission per non-blocking poll.
    Deferred,
}

/// Host copy of a texture, one `f32` per channel.
#[derive(Debug, Clone)]
pub(crate) struct Texture {
    pub desc: TextureDescriptor,
    pub texels: Vec<f32>,
}

impl Texture {
    fn new(desc: &TextureDescriptor) -> Self {
        let len = desc.width as usize * desc.height as usize * desc.format.channels();
        let fill = if desc.format.is_depth() { 1.0 } else { 0.0 };
        Self {
            desc: desc.clone(),
            texels: vec![fill; len],
        }
    }

    fn channels(&self) -> usize {
        self.desc.format.channels()
    }

    fn fill(&mut self, value: [f32; 4]) {
        let channels = self.channels();
        for texel in self.texels.chunks_exact_mut(channels) {
            texel.copy_from_slice(&value[..channels]);
        }
    }

    fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        let channels = self.channels();
        let base = (y as usize * self.desc.width as usize + x as usize) * channels;
        let mut out = [0.0, 0.0, 0.0, 1.0];
        out[..channels].copy_from_slice(&self.texels[base..base + channels]);
        out
    }

    /// Texel covering pixel `(x, y)` of a `width x height` target.
    pub(crate) fn texel_scaled(&self, x: u32, y: u32, width: u32, height: u32) -> [f32; 4] {
        if width == self.desc.width && height == self.desc.height {
            return self.texel(x, y);
        }
        let sx = ((x as u64 * self.desc.width as u64) / width.max(1) as u64) as u32;
        let sy = ((y as u64 * self.desc.height as u64) / height.max(1) as u64) as u32;
        self.texel(sx.min(self.desc.width - 1), sy.min(self.desc.height - 1))
    }

    /// Nearest sample of the first channel at normalized coordinates.
    pub(crate) fn sample_nearest(&self, u: f32, v: f32) -> f32 {
        let x = ((u * self.desc.width as f32) as u32).min(self.desc.width - 1);
        let y = ((v * self.desc.height as f32) as u32).min(self.desc.height - 1);
        self.texel(x, y)[0]
    }

    fn readback(&self) -> TextureReadback {
        TextureReadback {
            width: self.desc.width,
            height: self.desc.height,
            format: self.desc.format,
            texels: self.texels.clone(),
        }
    }
}

#[derive(Debug)]
struct HostBuffer {
    label: String,
    data: Vec<u8>,
}

/// Buffers visible to one pass through its bindings.
pub(crate) struct Bound<'a> {
    buffers: &'a HashMap<u64, HostBuffer>,
    bindings: &'a HashMap<BufferIndex, BufferHandle>,
}

impl<'a> Bound<'a> {
    fn buffer(&self, handle: BufferHandle) -> BackendResult<&'a [u8]> {
        self.buffers
            .get(&handle.0)
            .map(|b| b.data.as_slice())
            .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", handle.0)))
    }

    pub(crate) fn bytes(&self, index: BufferIndex) -> BackendResult<&'a [u8]> {
        let handle = self.bindings.get(&index).ok_or_else(|| {
            BackendError::InvalidCommand(format!("nothing bound at {index:?}"))
        })?;
        self.buffer(*handle)
    }

    pub(crate) fn read<T: bytemuck::Pod>(&self, index: BufferIndex, offset: usize) -> BackendResult<T> {
        let bytes = self.bytes(index)?;
        let size = std::mem::size_of::<T>();
        bytes
            .get(offset..offset + size)
            .map(bytemuck::pod_read_unaligned)
            .ok_or_else(|| {
                BackendError::InvalidCommand(format!(
                    "{index:?} holds {} bytes, {size} needed at offset {offset}",
                    bytes.len()
                ))
            })
    }
}

struct PendingWork {
    commands: CommandList,
    fence: Fence,
    buffers: Vec<BufferHandle>,
}

/// State of the pass currently being executed.
struct ActivePass {
    desc: PassDescriptor,
    colors: Vec<Texture>,
    depth: Option<Texture>,
    buffers: HashMap<BufferIndex, BufferHandle>,
    textures: HashMap<GBufferTexture, TextureHandle>,
    index_buffer: Option<BufferHandle>,
}

/// CPU implementation of [`GraphicsBackend`].
pub struct SoftwareBackend {
    buffers: HashMap<u64, HostBuffer>,
    textures: HashMap<u64, Texture>,
    next_id: u64,
    mode: CompletionMode,
    pending: Mutex<VecDeque<PendingWork>>,
    submissions: u64,
    device_lost: bool,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::with_completion(CompletionMode::Immediate)
    }

    pub fn with_completion(mode: CompletionMode) -> Self {
        log::info!("Software backend initialized ({mode:?} completion)");
        Self {
            buffers: HashMap::new(),
            textures: HashMap::new(),
            next_id: 1,
            mode,
            pending: Mutex::new(VecDeque::new()),
            submissions: 0,
            device_lost: false,
        }
    }

    pub fn completion_mode(&self) -> CompletionMode {
        self.mode
    }

    /// Number of command lists accepted by `submit`.
    pub fn submission_count(&self) -> u64 {
        self.submissions
    }

    /// Submissions queued but not yet executed.
    pub fn pending_submissions(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Simulates device loss: every later submit and poll fails.
    pub fn lose_device(&mut self) {
        log::error!("Software device lost");
        self.device_lost = true;
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer_in_use(&self, buffer: BufferHandle) -> bool {
        self.pending
            .lock()
            .iter()
            .any(|work| work.buffers.contains(&buffer))
    }

    fn take_texture(&mut self, handle: TextureHandle) -> BackendResult<Texture> {
        self.textures
            .remove(&handle.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("texture {}", handle.0)))
    }

    fn begin_pass(&mut self, desc: &PassDescriptor) -> BackendResult<ActivePass> {
        let mut colors = Vec::with_capacity(desc.color_targets.len());
        for target in &desc.color_targets {
            match self.take_texture(target.texture) {
                Ok(mut texture) => {
                    if let LoadOp::Clear(value) = target.load {
                        texture.fill(value);
                    }
                    colors.push(texture);
                }
                Err(err) => {
                    self.restore(desc, colors, None);
                    return Err(err);
                }
            }
        }
        let depth = match &desc.depth_target {
            Some(target) => match self.take_texture(target.texture) {
                Ok(mut texture) => {
                    if let Some(value) = target.clear {
                        texture.fill([value; 4]);
                    }
                    Some(texture)
                }
                Err(err) => {
                    self.restore(desc, colors, None);
                    return Err(err);
                }
            },
            None => None,
        };
        log::trace!("[software] begin '{}'", desc.label);
        Ok(ActivePass {
            desc: desc.clone(),
            colors,
            depth,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            index_buffer: None,
        })
    }

    fn restore(&mut self, desc: &PassDescriptor, colors: Vec<Texture>, depth: Option<Texture>) {
        for (target, texture) in desc.color_targets.iter().zip(colors) {
            self.textures.insert(target.texture.0, texture);
        }
        if let (Some(target), Some(texture)) = (&desc.depth_target, depth) {
            self.textures.insert(target.texture.0, texture);
        }
    }

    fn end_pass(&mut self, pass: ActivePass) {
        log::trace!("[software] end '{}'", pass.desc.label);
        self.restore(&pass.desc, pass.colors, pass.depth);
    }

    fn execute(&mut self, commands: &CommandList) -> BackendResult<()> {
        let mut active: Option<ActivePass> = None;
        let result = self.run(commands, &mut active);
        if let Some(pass) = active.take() {
            self.end_pass(pass);
            if result.is_ok() {
                return Err(BackendError::InvalidCommand(format!(
                    "command list '{}' ended inside a pass",
                    commands.label
                )));
            }
        }
        result
    }

    fn run(&mut self, commands: &CommandList, active: &mut Option<ActivePass>) -> BackendResult<()> {
        for command in commands.commands() {
            if let Command::BeginPass(desc) = command {
                if active.is_some() {
                    return Err(BackendError::InvalidCommand(format!(
                        "pass '{}' begun inside another pass",
                        desc.label
                    )));
                }
                *active = Some(self.begin_pass(desc)?);
                continue;
            }
            let pass = active.as_mut().ok_or_else(|| {
                BackendError::InvalidCommand(format!("{command:?} recorded outside a pass"))
            })?;
            let ActivePass {
                desc,
                colors,
                depth,
                buffers,
                textures,
                index_buffer,
            } = pass;
            match command {
                Command::BeginPass(_) => {}
                Command::BindBuffer { index, buffer, .. } => {
                    if !self.buffers.contains_key(&buffer.0) {
                        return Err(BackendError::InvalidHandle(format!("buffer {}", buffer.0)));
                    }
                    buffers.insert(*index, *buffer);
                }
                Command::BindTexture { binding, texture } => {
                    textures.insert(*binding, *texture);
                }
                Command::SetIndexBuffer { buffer } => *index_buffer = Some(*buffer),
                Command::DrawIndexedIndirect { buffer, offset } => {
                    let bound = Bound {
                        buffers: &self.buffers,
                        bindings: buffers,
                    };
                    let arguments = bound.buffer(*buffer)?;
                    let (range, instances) = kernels::indirect_draw(&bound, arguments, *offset)?;
                    let mut targets = Targets {
                        colors,
                        depth: depth.as_mut(),
                        bias: desc.depth_target.as_ref().and_then(|d| d.bias),
                    };
                    Self::draw(desc.kind, &bound, *index_buffer, range, &instances, &mut targets)?;
                }
                Command::DrawIndexed {
                    first_index,
                    index_count,
                    base_vertex,
                } => {
                    let bound = Bound {
                        buffers: &self.buffers,
                        bindings: buffers,
                    };
                    let params: ModelParams = bound.read(BufferIndex::ModelParams, 0)?;
                    let range = IndexRange {
                        first_index: *first_index,
                        index_count: *index_count,
                        base_vertex: *base_vertex,
                    };
                    let mut targets = Targets {
                        colors,
                        depth: depth.as_mut(),
                        bias: desc.depth_target.as_ref().and_then(|d| d.bias),
                    };
                    let instances = [DrawInstance::from(&params)];
                    Self::draw(desc.kind, &bound, *index_buffer, range, &instances, &mut targets)?;
                }
                Command::DrawFullscreen => {
                    if desc.kind != PassKind::Lighting {
                        return Err(BackendError::InvalidCommand(
                            "fullscreen draw outside the lighting pass".to_string(),
                        ));
                    }
                    let mut inputs = HashMap::new();
                    for (&binding, handle) in textures.iter() {
                        let texture = self.textures.get(&handle.0).ok_or_else(|| {
                            BackendError::InvalidHandle(format!(
                                "texture {} bound as {binding:?}",
                                handle.0
                            ))
                        })?;
                        inputs.insert(binding, texture);
                    }
                    let bound = Bound {
                        buffers: &self.buffers,
                        bindings: buffers,
                    };
                    let output = colors.first_mut().ok_or_else(|| {
                        BackendError::InvalidCommand("lighting pass without a color target".to_string())
                    })?;
                    kernels::draw_lighting(&bound, &inputs, output)?;
                }
                Command::EndPass => {
                    if let Some(pass) = active.take() {
                        self.end_pass(pass);
                    }
                }
            }
        }
        Ok(())
    }

    fn draw(
        kind: PassKind,
        bound: &Bound<'_>,
        index_buffer: Option<BufferHandle>,
        range: IndexRange,
        instances: &[DrawInstance],
        targets: &mut Targets<'_>,
    ) -> BackendResult<()> {
        let index_buffer = index_buffer.ok_or_else(|| {
            BackendError::InvalidCommand("indexed draw without an index buffer".to_string())
        })?;
        let indices = bound.buffer(index_buffer)?;
        kernels::draw_geometry(kind, bound, indices, range, instances, targets)
    }

    /// Runs the oldest queued submission and signals its fence.
    fn complete_one(&mut self) -> BackendResult<bool> {
        let Some(work) = self.pending.lock().pop_front() else {
            return Ok(false);
        };
        let result = self.execute(&work.commands);
        work.fence.signal();
        result.map(|_| true)
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let id = self.allocate_id();
        let label = desc.label.clone().unwrap_or_else(|| format!("buffer {id}"));
        log::trace!("[software] create buffer '{label}' ({} bytes)", desc.size);
        self.buffers.insert(
            id,
            HostBuffer {
                label,
                data: vec![0; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        if self.buffer_in_use(buffer) {
            return Err(BackendError::BufferInUse(buffer.0));
        }
        let target = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", buffer.0)))?;
        let size = target.data.len() as u64;
        let end = offset + data.len() as u64;
        if end > size {
            return Err(BackendError::OutOfBounds {
                offset,
                len: data.len() as u64,
                size,
            });
        }
        target.data[offset as usize..end as usize].copy_from_slice(data);
        log::trace!("[software] write {} bytes to '{}'", data.len(), target.label);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        self.buffers
            .get(&buffer.0)
            .map(|b| b.data.clone())
            .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", buffer.0)))
    }

    fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.buffers.get(&buffer.0).map(|b| b.data.len() as u64)
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero extent",
                desc.label
            )));
        }
        let id = self.allocate_id();
        self.textures.insert(id, Texture::new(desc));
        Ok(TextureHandle(id))
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<TextureReadback> {
        self.poll(true)?;
        self.textures
            .get(&texture.0)
            .map(Texture::readback)
            .ok_or_else(|| BackendError::InvalidHandle(format!("texture {}", texture.0)))
    }

    fn submit(&mut self, commands: CommandList) -> BackendResult<Fence> {
        if self.device_lost {
            return Err(BackendError::DeviceLost);
        }
        self.submissions += 1;
        log::trace!(
            "[software] submit '{}' ({} commands)",
            commands.label,
            commands.len()
        );
        match self.mode {
            CompletionMode::Immediate => {
                self.execute(&commands)?;
                Ok(Fence::new_signaled())
            }
            CompletionMode::Deferred => {
                let fence = Fence::new_unsignaled();
                let buffers = commands.referenced_buffers();
                self.pending.lock().push_back(PendingWork {
                    commands,
                    fence: fence.clone(),
                    buffers,
                });
                Ok(fence)
            }
        }
    }

    fn poll(&mut self, wait: bool) -> BackendResult<()> {
        if self.device_lost {
            return Err(BackendError::DeviceLost);
        }
        if wait {
            while self.complete_one()? {}
        } else {
            self.complete_one()?;
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }
}
