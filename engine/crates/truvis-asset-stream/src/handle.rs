use serde::{Deserialize, Serialize};

/// 资产类别，用于选择对应的 Loader
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// 图片 / 纹理
    Image,
    /// 3D 模型
    Mesh,
    /// 任意二进制数据
    Blob,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AssetKind::Image => "image",
            AssetKind::Mesh => "mesh",
            AssetKind::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// 单次加载的结果
///
/// `None` 只会出现在 worker 还没有加载过任何东西时，
/// 或者 asset 的完成信号被 kill 而没有产生结果时。
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum LoadStatus {
    #[default]
    None,
    Success,
    Error,
}

/// 资产状态机
///
/// 状态流转: Unloaded -> Queued -> Loading -> Uploading -> Ready
///                          \----------\-----------\-> Failed
///
/// 重新提交会把 Ready / Failed 拉回 Queued
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum AssetState {
    /// 初始状态，尚未请求加载
    #[default]
    Unloaded,
    /// 已进入 WorkQueue，等待分配 worker
    Queued,
    /// worker 线程正在读取文件或进行 CPU 解码
    Loading,
    /// CPU 端已完成，等待 GPU 线程创建设备资源
    Uploading,
    /// 设备资源就绪
    Ready,
    /// 解码或上传失败
    Failed,
}

impl AssetState {
    /// 是否已经有了最终结果
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, AssetState::Ready | AssetState::Failed)
    }

    /// 是否正在流水线中
    #[inline]
    pub fn is_in_flight(self) -> bool {
        matches!(self, AssetState::Queued | AssetState::Loading | AssetState::Uploading)
    }

    pub(crate) fn load_status(self) -> LoadStatus {
        match self {
            AssetState::Ready => LoadStatus::Success,
            AssetState::Failed => LoadStatus::Error,
            _ => LoadStatus::None,
        }
    }
}
