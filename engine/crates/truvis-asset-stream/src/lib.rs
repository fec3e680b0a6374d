//! 后台资产流式加载
//!
//! 把资产加载拆成两段流水线：
//! 1. 固定数量的 IO worker 线程负责读取文件和 CPU 解码；
//! 2. 唯一的 GPU 线程（上传阶段）负责创建设备资源。
//!
//! 调用方创建一个空的 [`Asset`]，通过 [`AssetStreamManager`] 提交加载请求，
//! 之后既可以注册回调，也可以阻塞等待结果。资源未就绪时可以用
//! [`AssetStreamManager::resolve`] 拿到同类的占位资源，渲染循环不会被阻塞。
//!
//! # 使用示例
//! ```ignore
//! let manager = AssetStreamManager::new(StreamConfig::default());
//! manager.register_loader(AssetKind::Image, Arc::new(MyImageLoader));
//! manager.start(4)?;
//!
//! let texture = Asset::new_handle("uv_checker", AssetKind::Image);
//! texture.on_loaded(|asset| log::info!("{} is ready", asset.name()));
//! manager.submit_path("resources/uv_checker.png", AssetKind::Image, texture.clone());
//! ```

pub mod asset;
pub mod config;
pub mod handle;
pub mod loader;
pub mod manager;
pub mod signal;
pub mod stats;
pub mod upload;
pub mod work_item;
pub mod work_queue;
pub mod worker;

mod dispatcher;

#[cfg(test)]
mod test_utils;

pub use asset::{Asset, AssetHandle};
pub use config::{AssignExhaustedPolicy, StreamConfig};
pub use handle::{AssetKind, AssetState, LoadStatus};
pub use loader::{AssetLoader, LoaderHandle, LoaderRegistry};
pub use manager::AssetStreamManager;
pub use signal::Signal;
pub use stats::StatsSnapshot;
pub use upload::UploadStage;
pub use work_item::{LoadSource, WorkItem};
