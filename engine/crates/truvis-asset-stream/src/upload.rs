use crate::asset::Asset;
use crate::loader::AssetLoader;
use crate::manager::PipelineShared;
use crate::worker::CompletedLoad;
use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use crossbeam_utils::Backoff;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 上传阶段：流水线的第二段，负责创建设备资源
///
/// worker 解码完成后，通过 channel 把结果发到这里。
/// `UploadStage` 是这个 channel 唯一的消费者，并且不能跨线程移动（`!Send`），
/// 所以创建它的线程就是唯一允许创建设备资源的线程。
///
/// - `AssetStreamManager::start` 模式下，它在 dispatcher 线程内部创建和驱动；
/// - `AssetStreamManager::start_with_upload_stage` 模式下，它返回给调用线程，
///   由调用线程（通常是渲染线程）每帧调用 `pump()`。
pub struct UploadStage {
    completions: Receiver<CompletedLoad>,
    shared: Arc<PipelineShared>,
    closed: bool,

    _not_send: PhantomData<*const ()>,
}
// new & init
impl UploadStage {
    pub(crate) fn new(completions: Receiver<CompletedLoad>, shared: Arc<PipelineShared>) -> Self {
        Self {
            completions,
            shared,
            closed: false,
            _not_send: PhantomData,
        }
    }
}
// getters
impl UploadStage {
    /// 还未处理的完成消息数量
    #[inline]
    pub fn pending(&self) -> usize {
        self.completions.len()
    }

    /// 所有 worker 都已退出，并且完成消息已经全部处理
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
// tools
impl UploadStage {
    /// 处理当前所有已到达的完成消息，不阻塞
    ///
    /// 返回处理的数量。
    pub fn pump(&mut self) -> usize {
        let _span = tracy_client::span!("UploadStage::pump");
        let mut processed = 0;
        loop {
            match self.completions.try_recv() {
                Ok(completed) => {
                    self.process(completed);
                    processed += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
        processed
    }

    /// 最多等待 `timeout` 直到第一条完成消息到达，然后处理所有已到达的消息
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        match self.completions.recv_timeout(timeout) {
            Ok(completed) => {
                self.process(completed);
                1 + self.pump()
            }
            Err(RecvTimeoutError::Timeout) => 0,
            Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                0
            }
        }
    }

    /// 一直处理，直到所有 worker 退出（channel 断开）
    pub(crate) fn drain_until_closed(&mut self) {
        while let Ok(completed) = self.completions.recv() {
            self.process(completed);
        }
        self.closed = true;
    }

    fn process(&mut self, completed: CompletedLoad) {
        let _span = tracy_client::span!("UploadStage::process");
        let CompletedLoad { worker, item, result } = completed;
        let (loader, asset) = item.into_parts();

        let outcome = result.and_then(|()| self.create_device_resource(loader.as_ref(), &asset));
        // 先释放 CPU 临时数据再通知等待者，被唤醒的调用方可以立即重新提交
        loader.release(&asset);
        match outcome {
            Ok(()) => {
                log::info!("Upload finished for '{}'", asset.name());
                asset.complete_success();
                self.shared.stats.on_loaded();
            }
            Err(e) => {
                log::error!("Failed to load '{}': {:#}", asset.name(), e);
                asset.complete_error(e);
                self.shared.stats.on_failed();
            }
        }

        worker.clear_busy();
        self.shared.work_available.set();
    }

    fn create_device_resource(&self, loader: &dyn AssetLoader, asset: &Asset) -> anyhow::Result<()> {
        loader
            .create_device_resource(asset)
            .with_context(|| format!("Failed to create device resource for '{}'", asset.name()))?;

        // loader 负责翻转 uploaded_to_device，这里有限地等待一下
        let deadline = Instant::now() + self.shared.config.upload_wait_timeout();
        let backoff = Backoff::new();
        while !asset.is_uploaded_to_device() {
            if Instant::now() >= deadline {
                anyhow::bail!("Loader '{}' did not mark '{}' as uploaded to device", loader.name(), asset.name());
            }
            if backoff.is_completed() {
                thread::sleep(Duration::from_millis(1));
            } else {
                backoff.snooze();
            }
        }
        Ok(())
    }
}

impl Drop for UploadStage {
    fn drop(&mut self) {
        // 没人再创建设备资源了，剩下的完成消息全部走失败路径
        while let Ok(CompletedLoad { worker, item, .. }) = self.completions.try_recv() {
            let name = item.asset().name().to_string();
            log::warn!("Upload stage dropped with '{}' pending", name);
            self.shared.fail_item(item, anyhow::anyhow!("upload stage was dropped before '{}' was uploaded", name));
            worker.clear_busy();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::asset::Asset;
    use crate::config::StreamConfig;
    use crate::handle::{AssetKind, AssetState, LoadStatus};
    use crate::loader::LoaderHandle;
    use crate::manager::AssetStreamManager;
    use crate::test_utils::{StubLoader, wait_for};
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> StreamConfig {
        StreamConfig {
            worker_count: 2,
            poll_interval_ms: 5,
            upload_wait_timeout_ms: 50,
            ..StreamConfig::default()
        }
    }

    #[test]
    fn test_device_resources_are_created_on_the_pumping_thread() {
        let stub = Arc::new(StubLoader::new());
        let manager = AssetStreamManager::new(config());
        manager.register_loader(AssetKind::Image, stub.clone());

        let mut stage = manager.start_with_upload_stage(2).unwrap();
        let assets: Vec<_> = (0..4)
            .map(|i| {
                let asset = Asset::new_handle(format!("tex{i}"), AssetKind::Image);
                manager.submit_memory(vec![i as u8; 16], AssetKind::Image, asset.clone());
                asset
            })
            .collect();

        assert!(wait_for(Duration::from_secs(2), || {
            stage.pump();
            assets.iter().all(|a| a.is_finished())
        }));

        let this_thread = std::thread::current().id();
        assert!(stub.upload_threads().iter().all(|id| *id == this_thread));
        assert!(assets.iter().all(|a| a.state() == AssetState::Ready));

        manager.shutdown();
        stage.pump();
    }

    #[test]
    fn test_missing_uploaded_flag_routes_to_error_path() {
        let stub = Arc::new(StubLoader::new().forgetting_upload_flag());
        let loader: LoaderHandle = stub.clone();
        let manager = AssetStreamManager::new(config());
        manager.register_loader(AssetKind::Mesh, loader);

        let mut stage = manager.start_with_upload_stage(1).unwrap();
        let asset = Asset::new_handle("mesh", AssetKind::Mesh);
        manager.submit_path("meshes/a.obj", AssetKind::Mesh, asset.clone());

        assert!(wait_for(Duration::from_secs(2), || {
            stage.pump();
            asset.is_finished()
        }));
        assert_eq!(asset.wait_until_loaded(), LoadStatus::Error);
        assert!(asset.last_error().unwrap().contains("did not mark"));
        // 失败路径也会释放 CPU 临时数据
        assert_eq!(stub.releases(), 1);

        manager.shutdown();
    }

    #[test]
    fn test_stage_closes_after_shutdown() {
        let manager = AssetStreamManager::new(config());
        manager.register_loader(AssetKind::Blob, Arc::new(StubLoader::new()));

        let mut stage = manager.start_with_upload_stage(2).unwrap();
        assert!(!stage.is_closed());

        manager.shutdown();
        assert_eq!(stage.pump(), 0);
        assert!(stage.is_closed());
    }
}
