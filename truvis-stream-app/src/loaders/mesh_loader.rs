use crate::device::{DeviceMeshHandle, MockDevice};
use anyhow::Context;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use truvis_asset_stream::{Asset, AssetLoader};

/// 合并后的网格数据 (CPU 端)
///
/// 所有 model 合并成一个索引缓冲，索引按顶点偏移修正。
#[derive(Default, Debug)]
pub struct RawMeshData {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub indices: Vec<u32>,
    pub submesh_count: usize,
}

impl RawMeshData {
    fn from_models(models: Vec<tobj::Model>) -> Self {
        let mut raw = RawMeshData::default();
        for model in models {
            let base_vertex = (raw.positions.len() / 3) as u32;
            raw.positions.extend_from_slice(&model.mesh.positions);
            raw.normals.extend_from_slice(&model.mesh.normals);
            raw.indices.extend(model.mesh.indices.iter().map(|i| i + base_vertex));
            raw.submesh_count += 1;
        }
        raw
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }
}

/// 网格在设备上的资源，drop 时销毁对应的设备网格
pub struct UploadedMesh {
    device: Arc<MockDevice>,
    pub handle: DeviceMeshHandle,
    pub index_count: usize,
}
impl Drop for UploadedMesh {
    fn drop(&mut self) {
        self.device.destroy_mesh(self.handle);
    }
}

/// 使用 `tobj` 解析 .obj 的网格 Loader，忽略材质
pub struct ObjMeshLoader {
    device: Arc<MockDevice>,
}
impl ObjMeshLoader {
    pub fn new(device: Arc<MockDevice>) -> Self {
        Self { device }
    }
}
impl AssetLoader for ObjMeshLoader {
    fn name(&self) -> &str {
        "ObjMeshLoader"
    }

    fn load_from_path(&self, asset: &Asset, path: &Path) -> anyhow::Result<()> {
        let _span = tracy_client::span!("ObjMeshLoader::load_from_path");
        let (models, _materials) =
            tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS).with_context(|| format!("Failed to load OBJ file {:?}", path))?;
        log::info!("Load {} models from {:?}", models.len(), path);

        asset.store_cpu_data(RawMeshData::from_models(models));
        Ok(())
    }

    fn load_from_memory(&self, asset: &Asset, data: &[u8]) -> anyhow::Result<()> {
        let _span = tracy_client::span!("ObjMeshLoader::load_from_memory");
        let mut reader = BufReader::new(data);
        // 内存中的 obj 没有相对路径，mtl 一律视为缺失
        let (models, _materials) =
            tobj::load_obj_buf(&mut reader, &tobj::GPU_LOAD_OPTIONS, |_| Err(tobj::LoadError::OpenFileFailed))
                .with_context(|| format!("Failed to parse OBJ data for '{}'", asset.name()))?;
        anyhow::ensure!(!models.is_empty(), "OBJ data for '{}' contains no model", asset.name());

        asset.store_cpu_data(RawMeshData::from_models(models));
        Ok(())
    }

    fn create_device_resource(&self, asset: &Asset) -> anyhow::Result<()> {
        let uploaded = asset
            .with_cpu_data(|raw: &RawMeshData| {
                self.device
                    .create_mesh(raw.vertex_count(), raw.indices.len())
                    .map(|handle| UploadedMesh {
                        device: self.device.clone(),
                        handle,
                        index_count: raw.indices.len(),
                    })
            })
            .with_context(|| format!("'{}' has no decoded mesh data", asset.name()))??;

        asset.set_device_resource(uploaded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use truvis_asset_stream::AssetKind;

    const QUAD_OBJ: &str = "\
o quad
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 1.0 1.0 0.0
v 0.0 1.0 0.0
f 1 2 3 4
";

    #[test]
    fn test_quad_is_triangulated() {
        let device = Arc::new(MockDevice::new());
        let loader = ObjMeshLoader::new(device.clone());
        let asset = Asset::new("quad", AssetKind::Mesh);

        loader.load_from_memory(&asset, QUAD_OBJ.as_bytes()).unwrap();
        assert_eq!(asset.with_cpu_data(|raw: &RawMeshData| (raw.vertex_count(), raw.indices.len())), Some((4, 6)));

        loader.create_device_resource(&asset).unwrap();
        let (handle, index_count) = asset.with_device_resource(|mesh: &UploadedMesh| (mesh.handle, mesh.index_count)).unwrap();
        assert_eq!(index_count, 6);
        assert_eq!(device.mesh_index_count(handle), Some(6));
        assert_eq!(device.mesh_count(), 1);

        drop(asset);
        assert_eq!(device.mesh_count(), 0);
    }

    #[test]
    fn test_mesh_dropped_off_device_thread_is_deferred() {
        let device = Arc::new(MockDevice::new());
        let loader = ObjMeshLoader::new(device.clone());
        let asset = Asset::new_handle("quad", AssetKind::Mesh);
        loader.load_from_memory(&asset, QUAD_OBJ.as_bytes()).unwrap();
        loader.create_device_resource(&asset).unwrap();

        std::thread::spawn(move || drop(asset)).join().unwrap();
        assert_eq!(device.mesh_count(), 1);

        assert_eq!(device.flush_pending_destroy().unwrap(), 1);
        assert_eq!(device.mesh_count(), 0);
    }

    #[test]
    fn test_models_are_merged_with_vertex_offset() {
        let obj = format!("{QUAD_OBJ}o tri\nv 0 0 1\nv 1 0 1\nv 0 1 1\nf 5 6 7\n");
        let loader = ObjMeshLoader::new(Arc::new(MockDevice::new()));
        let asset = Asset::new("two", AssetKind::Mesh);

        loader.load_from_memory(&asset, obj.as_bytes()).unwrap();
        let raw = asset.take_cpu_data::<RawMeshData>().unwrap();
        assert_eq!(raw.submesh_count, 2);
        assert_eq!(raw.vertex_count(), 7);
        assert_eq!(raw.indices.len(), 9);
        assert!(raw.indices[6..].iter().all(|&i| i >= 4));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let loader = ObjMeshLoader::new(Arc::new(MockDevice::new()));
        let asset = Asset::new("missing", AssetKind::Mesh);
        assert!(loader.load_from_path(&asset, Path::new("does/not/exist.obj")).is_err());
        assert!(!asset.has_cpu_data());
    }
}
