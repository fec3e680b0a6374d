use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};
use std::thread::{self, ThreadId};

new_key_type! { pub struct DeviceTextureHandle; }
new_key_type! { pub struct DeviceMeshHandle; }

#[derive(Debug)]
pub struct DeviceTexture {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<u8>,
}

#[derive(Debug)]
pub struct DeviceMesh {
    pub vertex_count: usize,
    pub index_count: usize,
}

enum PendingDestroy {
    Texture(DeviceTextureHandle),
    Mesh(DeviceMeshHandle),
}

/// 模拟的图形设备
///
/// 和真实的 GPU 上下文一样，只允许在创建它的线程上创建 / 销毁资源。
/// 其他线程发起的销毁请求会被延迟到 `flush_pending_destroy` 时执行。
pub struct MockDevice {
    owner: ThreadId,

    textures: Mutex<SlotMap<DeviceTextureHandle, DeviceTexture>>,
    meshes: Mutex<SlotMap<DeviceMeshHandle, DeviceMesh>>,

    pending_destroy: Mutex<Vec<PendingDestroy>>,
}
// new & init
impl MockDevice {
    /// 当前线程成为设备的所属线程
    pub fn new() -> Self {
        Self {
            owner: thread::current().id(),
            textures: Mutex::new(SlotMap::with_key()),
            meshes: Mutex::new(SlotMap::with_key()),
            pending_destroy: Mutex::new(Vec::new()),
        }
    }
}
impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}
// getters
impl MockDevice {
    #[inline]
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }
    pub fn texture_count(&self) -> usize {
        self.textures.lock().len()
    }
    pub fn mesh_count(&self) -> usize {
        self.meshes.lock().len()
    }
    pub fn texture_extent(&self, handle: DeviceTextureHandle) -> Option<(u32, u32)> {
        self.textures.lock().get(handle).map(|tex| (tex.width, tex.height))
    }
    pub fn mesh_index_count(&self, handle: DeviceMeshHandle) -> Option<usize> {
        self.meshes.lock().get(handle).map(|mesh| mesh.index_count)
    }
}
// create & destroy
impl MockDevice {
    pub fn create_texture(&self, width: u32, height: u32, texels: &[u8]) -> anyhow::Result<DeviceTextureHandle> {
        self.ensure_owner_thread("create_texture")?;
        anyhow::ensure!(
            texels.len() == (width as usize) * (height as usize) * 4,
            "texel size mismatch: {}x{} RGBA8 needs {} bytes, got {}",
            width,
            height,
            (width as usize) * (height as usize) * 4,
            texels.len()
        );

        let handle = self.textures.lock().insert(DeviceTexture {
            width,
            height,
            texels: texels.to_vec(),
        });
        log::debug!("Create texture {:?} ({}x{})", handle, width, height);
        Ok(handle)
    }

    pub fn create_mesh(&self, vertex_count: usize, index_count: usize) -> anyhow::Result<DeviceMeshHandle> {
        self.ensure_owner_thread("create_mesh")?;
        let handle = self.meshes.lock().insert(DeviceMesh {
            vertex_count,
            index_count,
        });
        log::debug!("Create mesh {:?} ({} vertices, {} indices)", handle, vertex_count, index_count);
        Ok(handle)
    }

    pub fn destroy_texture(&self, handle: DeviceTextureHandle) {
        if self.is_owner_thread() {
            self.textures.lock().remove(handle);
        } else {
            self.pending_destroy.lock().push(PendingDestroy::Texture(handle));
        }
    }

    pub fn destroy_mesh(&self, handle: DeviceMeshHandle) {
        if self.is_owner_thread() {
            self.meshes.lock().remove(handle);
        } else {
            self.pending_destroy.lock().push(PendingDestroy::Mesh(handle));
        }
    }

    /// 执行其他线程发起的销毁请求，只能在所属线程调用，返回销毁的数量
    pub fn flush_pending_destroy(&self) -> anyhow::Result<usize> {
        self.ensure_owner_thread("flush_pending_destroy")?;
        let pending = std::mem::take(&mut *self.pending_destroy.lock());
        let count = pending.len();
        for request in pending {
            match request {
                PendingDestroy::Texture(handle) => {
                    self.textures.lock().remove(handle);
                }
                PendingDestroy::Mesh(handle) => {
                    self.meshes.lock().remove(handle);
                }
            }
        }
        Ok(count)
    }

    fn ensure_owner_thread(&self, op: &str) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.is_owner_thread(),
            "MockDevice::{} called from thread {:?}, device belongs to {:?}",
            op,
            thread::current().name().unwrap_or("<unnamed>"),
            self.owner
        );
        Ok(())
    }
}
