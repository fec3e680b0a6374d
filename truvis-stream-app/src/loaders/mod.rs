pub mod image_loader;
pub mod mesh_loader;

pub use image_loader::{ImageLoader, RawImageData, UploadedTexture};
pub use mesh_loader::{ObjMeshLoader, RawMeshData, UploadedMesh};
