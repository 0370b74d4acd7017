//! Core backend abstraction traits
//!
//! These traits define the interface that both the software and wgpu backends must implement.

use crate::backend::command::CommandList;
use crate::backend::types::*;
use crate::frame::Fence;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Write of {len} bytes at offset {offset} overruns buffer of {size} bytes")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
    #[error("Buffer {0} is referenced by work still in flight")]
    BufferInUse(u64),
    #[error("Invalid command stream: {0}")]
    InvalidCommand(String),
    #[error("Readback failed: {0}")]
    ReadbackFailed(String),
    #[error("Device lost")]
    DeviceLost,
}

impl BackendError {
    pub fn is_device_loss(&self) -> bool {
        matches!(self, BackendError::DeviceLost)
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

impl BufferHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

impl TextureHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    // Resource creation

    /// Create a zero-initialized buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Write data to a buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8])
        -> BackendResult<()>;

    /// Read the whole buffer back, waiting for outstanding work that writes it
    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>>;

    /// Size in bytes, or `None` for an unknown handle
    fn buffer_size(&self, buffer: BufferHandle) -> Option<u64>;

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Read a texture back, waiting for outstanding work
    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<TextureReadback>;

    // Command execution

    /// Submit a recorded command list; the fence signals when its work completes
    fn submit(&mut self, commands: CommandList) -> BackendResult<Fence>;

    /// Drive completion of submitted work. With `wait`, blocks until all of it is done.
    fn poll(&mut self, wait: bool) -> BackendResult<()>;

    // Resource cleanup

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: TextureHandle);
}
