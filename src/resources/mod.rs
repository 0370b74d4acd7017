//! Resource management (meshes, materials, height maps)

pub mod heightmap;
pub mod material;
pub mod mesh;

pub use heightmap::HeightMap;
pub use material::{Material, MaterialId};
pub use mesh::{GeometryArena, GeometryBuffers, Mesh, MeshId, MeshRange};
