//! Common types shared between backends

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    /// Number of float channels returned by a readback.
    pub fn channels(&self) -> usize {
        if self.is_depth() {
            1
        } else {
            4
        }
    }
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const TEXTURE_BINDING: Self = Self(1 << 2);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 4);

    /// Every target the pipeline renders and later samples or reads back.
    pub const TARGET: Self =
        Self(Self::COPY_SRC.0 | Self::TEXTURE_BINDING.0 | Self::RENDER_ATTACHMENT.0);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const COPY_SRC: Self = Self(1 << 2);
    pub const COPY_DST: Self = Self(1 << 3);
    pub const INDEX: Self = Self(1 << 4);
    pub const VERTEX: Self = Self(1 << 5);
    pub const UNIFORM: Self = Self(1 << 6);
    pub const STORAGE: Self = Self(1 << 7);
    pub const INDIRECT: Self = Self(1 << 8);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            format: TextureFormat::Rgba32Float,
            usage: TextureUsage::TARGET,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

/// CPU copy of a texture, one `f32` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureReadback {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub texels: Vec<f32>,
}

impl TextureReadback {
    /// RGBA value at `(x, y)`; depth textures report depth in every channel.
    pub fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        let channels = self.format.channels();
        let base = (y as usize * self.width as usize + x as usize) * channels;
        if channels == 1 {
            let d = self.texels.get(base).copied().unwrap_or(0.0);
            [d, d, d, 1.0]
        } else {
            let mut out = [0.0; 4];
            for (c, value) in out.iter_mut().enumerate() {
                *value = self.texels.get(base + c).copied().unwrap_or(0.0);
            }
            out
        }
    }
}
