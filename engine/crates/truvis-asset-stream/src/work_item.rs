use crate::asset::AssetHandle;
use crate::handle::AssetKind;
use crate::loader::LoaderHandle;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 加载来源：文件路径或内存中的字节，二者只能有其一
#[derive(Clone, Debug)]
pub enum LoadSource {
    Path(PathBuf),
    Memory(Arc<[u8]>),
}

impl LoadSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            LoadSource::Path(path) => Some(path),
            LoadSource::Memory(_) => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            LoadSource::Path(_) => None,
            LoadSource::Memory(bytes) => Some(bytes),
        }
    }
}

impl std::fmt::Display for LoadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadSource::Path(path) => write!(f, "{}", path.display()),
            LoadSource::Memory(bytes) => write!(f, "<memory: {} bytes>", bytes.len()),
        }
    }
}

/// 一次加载请求
///
/// 构造后不可变，只能移动：提交时移动进 WorkQueue，再移动进 worker，
/// 最后随完成消息移动到上传阶段。被消费之后就不再有人读它。
pub struct WorkItem {
    source: LoadSource,
    kind: AssetKind,
    loader: LoaderHandle,
    asset: AssetHandle,
}
// new & init
impl WorkItem {
    pub fn new(source: LoadSource, kind: AssetKind, loader: LoaderHandle, asset: AssetHandle) -> Self {
        Self {
            source,
            kind,
            loader,
            asset,
        }
    }

    pub fn from_path(path: impl Into<PathBuf>, kind: AssetKind, loader: LoaderHandle, asset: AssetHandle) -> Self {
        Self::new(LoadSource::Path(path.into()), kind, loader, asset)
    }

    pub fn from_memory(
        bytes: impl Into<Arc<[u8]>>,
        kind: AssetKind,
        loader: LoaderHandle,
        asset: AssetHandle,
    ) -> Self {
        Self::new(LoadSource::Memory(bytes.into()), kind, loader, asset)
    }
}
// getters
impl WorkItem {
    #[inline]
    pub fn source(&self) -> &LoadSource {
        &self.source
    }
    #[inline]
    pub fn kind(&self) -> AssetKind {
        self.kind
    }
    #[inline]
    pub fn loader(&self) -> &LoaderHandle {
        &self.loader
    }
    #[inline]
    pub fn asset(&self) -> &AssetHandle {
        &self.asset
    }

    /// 拆出 loader 和 asset，item 本身就此结束
    pub(crate) fn into_parts(self) -> (LoaderHandle, AssetHandle) {
        (self.loader, self.asset)
    }
}
// tools
impl WorkItem {
    /// 在当前线程上执行解码（worker 线程调用）
    pub(crate) fn decode(&self) -> anyhow::Result<()> {
        match &self.source {
            LoadSource::Memory(bytes) => self.loader.load_from_memory(&self.asset, bytes),
            LoadSource::Path(path) => self.loader.load_from_path(&self.asset, path),
        }
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("source", &self.source)
            .field("kind", &self.kind)
            .field("loader", &self.loader.name())
            .field("asset", &self.asset.name())
            .finish()
    }
}
