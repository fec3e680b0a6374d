use crate::asset::AssetHandle;
use crate::config::StreamConfig;
use crate::dispatcher::Dispatcher;
use crate::handle::AssetKind;
use crate::loader::{LoaderHandle, LoaderRegistry};
use crate::signal::Signal;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::upload::UploadStage;
use crate::work_item::{LoadSource, WorkItem};
use crate::work_queue::WorkQueue;
use crate::worker::{CompletedLoad, Worker, WorkerState};
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

/// dispatcher、worker、上传阶段共享的状态
pub(crate) struct PipelineShared {
    pub config: StreamConfig,
    pub queue: WorkQueue,
    pub work_available: Signal,
    pub stats: Arc<PipelineStats>,
    active: AtomicBool,
}

impl PipelineShared {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 让 item 直接走失败路径
    pub fn fail_item(&self, item: WorkItem, error: anyhow::Error) {
        let (loader, asset) = item.into_parts();
        loader.release(&asset);
        asset.complete_error(error);
        self.stats.on_failed();
    }
}

struct PoolThreads {
    workers: Vec<Worker>,
    dispatcher: JoinHandle<()>,
    /// dispatcher 和所有 worker 的线程 id
    thread_ids: Vec<ThreadId>,
}

/// 资产流式加载管理器
///
/// 整个后台加载系统的入口，显式创建并持有，不是全局单例。
/// 职责:
/// 1. 维护 WorkQueue、固定数量的 worker 线程和唯一的 dispatcher 线程；
/// 2. 提供统一的提交接口 (submit_path / submit_memory)；
/// 3. 维护 AssetKind -> Loader 的注册表；
/// 4. 提供 Placeholder 机制 (资源未就绪时返回占位资源)。
///
/// # 线程模型
/// - worker 线程 `Asset-Loader-{i}`：执行 IO 和 CPU 解码；
/// - dispatcher 线程 `AssetDispatchThread`：分配任务；
/// - 上传阶段：`start` 模式下运行在 dispatcher 线程，
///   `start_with_upload_stage` 模式下运行在调用线程。
///
/// # 生命周期
/// `shutdown` (或 Drop) 时:
/// 1. 清除 active，kill `work_available` 和每个 worker 的唤醒信号；
/// 2. join 所有 worker 线程，正在解码的 item 会先跑完；
/// 3. join dispatcher 线程；
/// 4. 队列中剩余的 item 全部走失败路径，释放占位资源。
pub struct AssetStreamManager {
    shared: Arc<PipelineShared>,
    loaders: LoaderRegistry,
    placeholders: Mutex<HashMap<AssetKind, AssetHandle>>,
    pool: Mutex<Option<PoolThreads>>,

    /// 提交与关闭之间的栅栏：持读锁提交，持写锁关闭
    closed: RwLock<bool>,
}
// new & init
impl AssetStreamManager {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            shared: Arc::new(PipelineShared {
                config,
                queue: WorkQueue::new(),
                work_available: Signal::new(),
                stats: Arc::new(PipelineStats::default()),
                active: AtomicBool::new(false),
            }),
            loaders: LoaderRegistry::new(),
            placeholders: Mutex::new(HashMap::new()),
            pool: Mutex::new(None),
            closed: RwLock::new(false),
        }
    }

    /// 启动 worker 池和 dispatcher，设备资源在 dispatcher 线程上创建
    pub fn start(&self, worker_count: usize) -> anyhow::Result<()> {
        self.start_pool(worker_count, false)?;
        Ok(())
    }

    /// 启动 worker 池和 dispatcher，设备资源在当前线程上创建
    ///
    /// 调用线程需要持有返回的 `UploadStage` 并定期调用 `pump()`（例如每帧一次）。
    pub fn start_with_upload_stage(&self, worker_count: usize) -> anyhow::Result<UploadStage> {
        let completions = self
            .start_pool(worker_count, true)?
            .ok_or_else(|| anyhow::anyhow!("Upload stage channel was not created"))?;
        Ok(UploadStage::new(completions, self.shared.clone()))
    }

    fn start_pool(&self, worker_count: usize, external_upload: bool) -> anyhow::Result<Option<Receiver<CompletedLoad>>> {
        anyhow::ensure!(worker_count > 0, "AssetStreamManager needs at least one worker");
        self.shared.config.validate()?;
        anyhow::ensure!(!*self.closed.read(), "AssetStreamManager has already been shut down");

        let mut pool = self.pool.lock();
        anyhow::ensure!(pool.is_none(), "AssetStreamManager is already started");

        let (completion_tx, completion_rx) = crossbeam_channel::unbounded::<CompletedLoad>();

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            match Worker::spawn(id, completion_tx.clone(), self.shared.stats.clone()) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    Self::stop_workers(workers);
                    return Err(e);
                }
            }
        }
        // 只有 worker 持有 sender，worker 全部退出时 channel 自然断开
        drop(completion_tx);

        let slots = workers.iter().map(|worker| worker.slot().clone()).collect();
        let (dispatcher_rx, external_rx) =
            if external_upload { (None, Some(completion_rx)) } else { (Some(completion_rx), None) };

        self.shared.active.store(true, Ordering::Release);
        let dispatcher = match Dispatcher::spawn(self.shared.clone(), slots, dispatcher_rx) {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                self.shared.active.store(false, Ordering::Release);
                Self::stop_workers(workers);
                return Err(e);
            }
        };

        log::info!(
            "AssetStreamManager started with {} workers, upload on {}",
            worker_count,
            if external_upload { "external thread" } else { "dispatch thread" }
        );
        let thread_ids = workers
            .iter()
            .filter_map(|worker| worker.thread_id())
            .chain(std::iter::once(dispatcher.thread().id()))
            .collect();
        *pool = Some(PoolThreads {
            workers,
            dispatcher,
            thread_ids,
        });
        Ok(external_rx)
    }
}
// destroy
impl AssetStreamManager {
    /// 关闭流水线，幂等
    ///
    /// 不能在流水线自己的线程上调用（例如在 `on_loaded` 回调里），否则会 join 自己；
    /// 这种调用会被忽略并记录错误。
    pub fn shutdown(&self) {
        if self.is_pipeline_thread() {
            log::error!(
                "AssetStreamManager::shutdown called from pipeline thread {:?}, ignored",
                thread::current().name().unwrap_or("<unnamed>")
            );
            return;
        }
        {
            let mut closed = self.closed.write();
            if *closed {
                return;
            }
            *closed = true;
        }
        let _span = tracy_client::span!("AssetStreamManager::shutdown");
        log::info!("AssetStreamManager is shutting down, waiting for workers to finish...");

        self.shared.active.store(false, Ordering::Release);
        self.shared.work_available.kill();

        let pool = self.pool.lock().take();
        let mut stranded = Vec::new();
        if let Some(PoolThreads { workers, dispatcher, .. }) = pool {
            let slots: Vec<_> = workers.iter().map(|worker| worker.slot().clone()).collect();
            Self::stop_workers(workers);
            if dispatcher.join().is_err() {
                log::error!("Failed to join asset dispatch thread");
            }
            stranded.extend(slots.iter().filter_map(|slot| slot.take_stranded()));
        }

        let mut drained = self.shared.queue.drain();
        drained.append(&mut stranded);
        if !drained.is_empty() {
            log::warn!("{} queued items are discarded by shutdown", drained.len());
        }
        for item in drained {
            let name = item.asset().name().to_string();
            self.shared.fail_item(item, anyhow::anyhow!("pipeline shut down before '{}' was loaded", name));
        }

        let placeholders: Vec<_> = self.placeholders.lock().drain().collect();
        for (kind, asset) in placeholders {
            match self.loaders.get(kind) {
                Some(loader) => {
                    loader.release_device_resource(&asset);
                    loader.release(&asset);
                }
                None => {
                    asset.drop_device_resource();
                    asset.clear_cpu_data();
                }
            }
        }

        log::info!("AssetStreamManager shut down.");
    }

    fn is_pipeline_thread(&self) -> bool {
        let current = thread::current().id();
        self.pool.lock().as_ref().is_some_and(|pool| pool.thread_ids.contains(&current))
    }

    fn stop_workers(workers: Vec<Worker>) {
        for worker in &workers {
            worker.slot().begin_shutdown();
        }
        for worker in workers {
            worker.join();
        }
    }
}
impl Drop for AssetStreamManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
// loaders & placeholders
impl AssetStreamManager {
    pub fn register_loader(&self, kind: AssetKind, loader: LoaderHandle) {
        self.loaders.register(kind, loader);
    }

    pub fn loader(&self, kind: AssetKind) -> Option<LoaderHandle> {
        self.loaders.get(kind)
    }

    /// 注册某类资产的占位资源，在 shutdown 之前一直保留
    pub fn register_placeholder(&self, asset: AssetHandle) {
        log::info!("Register placeholder '{}' for {} assets", asset.name(), asset.kind());
        self.placeholders.lock().insert(asset.kind(), asset);
    }

    pub fn placeholder(&self, kind: AssetKind) -> Option<AssetHandle> {
        self.placeholders.lock().get(&kind).cloned()
    }

    /// 资源已就绪时返回它本身，否则返回同类的占位资源
    ///
    /// 这保证了渲染循环不会因为资源未就绪而阻塞。
    pub fn resolve(&self, asset: &AssetHandle) -> Option<AssetHandle> {
        if asset.is_loaded() { Some(asset.clone()) } else { self.placeholder(asset.kind()) }
    }
}
// submit
impl AssetStreamManager {
    /// 提交一个加载请求，非阻塞
    ///
    /// 结果只通过 asset 的回调和完成信号通知，没有同步的错误返回。
    /// 如果 asset 已经上传过设备资源，旧的设备资源会先被释放。
    pub fn submit(&self, item: WorkItem) {
        let _span = tracy_client::span!("AssetStreamManager::submit");
        self.shared.stats.on_submitted();

        let closed = self.closed.read();
        if *closed {
            log::error!("Submit '{}' after shutdown", item.asset().name());
            if item.asset().is_uploaded_to_device() {
                item.loader().release_device_resource(item.asset());
            }
            let name = item.asset().name().to_string();
            self.shared.fail_item(item, anyhow::anyhow!("pipeline has been shut down, '{}' is not loaded", name));
            return;
        }

        let asset = item.asset();
        if asset.state().is_in_flight() {
            log::warn!("'{}' is submitted again while still in flight", asset.name());
        }
        if asset.is_uploaded_to_device() {
            log::info!("Reload '{}', release previous device resource", asset.name());
            item.loader().release_device_resource(asset);
        }
        asset.mark_queued();

        log::info!("Request load {} '{}': {}", item.kind(), asset.name(), item.source());
        self.shared.queue.push(item);
        self.shared.work_available.set();
        drop(closed);
    }

    pub fn submit_path(&self, path: impl Into<PathBuf>, kind: AssetKind, asset: AssetHandle) {
        self.submit_source(LoadSource::Path(path.into()), kind, asset);
    }

    pub fn submit_memory(&self, bytes: impl Into<Arc<[u8]>>, kind: AssetKind, asset: AssetHandle) {
        self.submit_source(LoadSource::Memory(bytes.into()), kind, asset);
    }

    fn submit_source(&self, source: LoadSource, kind: AssetKind, asset: AssetHandle) {
        match self.loaders.get(kind) {
            Some(loader) => self.submit(WorkItem::new(source, kind, loader, asset)),
            None => {
                log::error!("No loader registered for {} assets, '{}' is not loaded", kind, asset.name());
                self.shared.stats.on_submitted();
                self.shared.stats.on_failed();
                // 没有 loader 可以释放旧的设备资源，直接丢弃
                if asset.drop_device_resource() {
                    log::warn!("Previous device resource of '{}' dropped without a loader", asset.name());
                }
                asset.clear_cpu_data();
                asset.complete_error(anyhow::anyhow!("no loader registered for {} assets", kind));
            }
        }
    }
}
// getters
impl AssetStreamManager {
    #[inline]
    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }
    #[inline]
    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }
    #[inline]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
    #[inline]
    pub fn queued_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn worker_count(&self) -> usize {
        self.pool.lock().as_ref().map_or(0, |pool| pool.workers.len())
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.pool
            .lock()
            .as_ref()
            .map(|pool| pool.workers.iter().map(|worker| worker.slot().state()).collect())
            .unwrap_or_default()
    }
}
