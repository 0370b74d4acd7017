//! Graph-owned textures and how passes touch them

use crate::backend::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

/// Texture declared by a pass during setup and allocated by the executor.
#[derive(Debug, Clone)]
pub struct VirtualTexture {
    pub id: ResourceId,
    pub desc: TextureDescriptor,
    pub name: String,
}

/// How a pass uses a resource. Only the distinction between reads and
/// writes feeds dependency ordering; the variants document intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    /// Loaded texel by texel, e.g. G-buffer channels in the lighting pass
    TextureRead,
    /// Color attachment
    RenderTarget,
    /// Depth attachment with depth writes enabled
    DepthWrite,
}

#[derive(Debug, Clone)]
pub struct ResourceAccess {
    pub resource: ResourceId,
    pub usage: ResourceUsage,
}

/// Extent of a graph texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureSize {
    /// Follows the output image, recreated on resize
    #[default]
    Screen,
    /// Fixed square extent, e.g. the shadow map resolution
    Square(u32),
}

impl TextureSize {
    /// Resolved size, never smaller than one pixel.
    pub fn resolve(self, screen_width: u32, screen_height: u32) -> (u32, u32) {
        let (width, height) = match self {
            TextureSize::Screen => (screen_width, screen_height),
            TextureSize::Square(side) => (side, side),
        };
        (width.max(1), height.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_resolve() {
        assert_eq!(TextureSize::Screen.resolve(640, 480), (640, 480));
        assert_eq!(TextureSize::Screen.resolve(0, 0), (1, 1));
        assert_eq!(TextureSize::Square(2048).resolve(64, 64), (2048, 2048));
    }
}
