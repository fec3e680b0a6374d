use crate::asset::Asset;
use crate::handle::AssetKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// 具体格式解码器需要满足的契约
///
/// 流水线只负责按顺序调用这些方法，从不关心解码器内部。
///
/// - `load_from_path` / `load_from_memory` 在 worker 线程上执行，负责 IO 和 CPU 解码，
///   结果写到 `Asset` 的 CPU 数据槽里。打开 / 读取文件的 IO 错误也通过 `Err` 返回。
/// - `create_device_resource` 只会在唯一的 GPU 线程上执行，负责把 CPU 数据上传为设备资源，
///   并通过 `Asset::set_device_resource` 标记 `uploaded_to_device`。
/// - `release` 释放解码过程中留下的 CPU 临时数据。
///
/// 在 worker 线程上 panic 属于契约违背，会直接终止进程。
pub trait AssetLoader: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn load_from_path(&self, asset: &Asset, path: &Path) -> anyhow::Result<()>;

    fn load_from_memory(&self, asset: &Asset, data: &[u8]) -> anyhow::Result<()>;

    fn create_device_resource(&self, asset: &Asset) -> anyhow::Result<()>;

    fn release(&self, asset: &Asset) {
        asset.clear_cpu_data();
    }

    /// 重新提交一个已经上传过的 asset 时调用，释放旧的设备资源
    fn release_device_resource(&self, asset: &Asset) {
        asset.drop_device_resource();
    }
}

pub type LoaderHandle = Arc<dyn AssetLoader>;

/// AssetKind -> Loader 的注册表
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: RwLock<HashMap<AssetKind, LoaderHandle>>,
}
// new & init
impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}
// tools
impl LoaderRegistry {
    /// 注册 loader，返回被替换掉的旧 loader
    pub fn register(&self, kind: AssetKind, loader: LoaderHandle) -> Option<LoaderHandle> {
        log::info!("Register loader '{}' for {} assets", loader.name(), kind);
        self.loaders.write().insert(kind, loader)
    }

    pub fn get(&self, kind: AssetKind) -> Option<LoaderHandle> {
        self.loaders.read().get(&kind).cloned()
    }

    pub fn contains(&self, kind: AssetKind) -> bool {
        self.loaders.read().contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StubLoader;

    #[test]
    fn test_register_replaces_previous_loader() {
        let registry = LoaderRegistry::new();
        assert!(registry.get(AssetKind::Image).is_none());

        let first: LoaderHandle = Arc::new(StubLoader::new());
        let second: LoaderHandle = Arc::new(StubLoader::new());

        assert!(registry.register(AssetKind::Image, first.clone()).is_none());
        let replaced = registry.register(AssetKind::Image, second.clone()).unwrap();

        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(Arc::ptr_eq(&registry.get(AssetKind::Image).unwrap(), &second));
        assert!(!registry.contains(AssetKind::Mesh));
    }

    #[test]
    fn test_default_release_clears_cpu_data() {
        let loader = StubLoader::new();
        let asset = Asset::new("blob", AssetKind::Blob);
        asset.store_cpu_data(7u64);

        AssetLoader::release(&loader, &asset);
        assert!(!asset.has_cpu_data());
    }
}
