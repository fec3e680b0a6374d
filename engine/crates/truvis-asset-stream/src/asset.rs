use crate::handle::{AssetKind, AssetState, LoadStatus};
use crate::signal::Signal;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

pub type AssetHandle = Arc<Asset>;

type LoadedCallback = Arc<dyn Fn(&Asset) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&Asset, &anyhow::Error) + Send + Sync>;

/// 所有可流式加载内容的公共实体
///
/// 调用方先创建一个空的 Asset（占位状态），再提交给 `AssetStreamManager`。
///
/// 数据归属:
/// - CPU 数据槽只由解码它的那一个 worker 线程写入；
/// - 设备资源槽只由上传阶段（GPU 线程）写入；
/// - 回调由上传阶段所在的线程调用，调用方不应假设具体是哪个线程。
pub struct Asset {
    name: String,
    kind: AssetKind,

    uploaded_to_device: AtomicBool,
    loaded: AtomicBool,
    state: Mutex<AssetState>,
    finished: Signal,
    /// 每次进入队列加一，用来识别回调里发起的重新提交
    generation: AtomicU64,
    last_error: Mutex<Option<String>>,

    on_loaded: Mutex<Vec<LoadedCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,

    /// 解码后的 CPU 数据，由 Loader 决定具体类型
    cpu_data: Mutex<Option<Box<dyn Any + Send>>>,
    /// 设备资源，由 Loader 决定具体类型
    device_resource: Mutex<Option<Box<dyn Any + Send>>>,
}
// new & init
impl Asset {
    pub fn new(name: impl Into<String>, kind: AssetKind) -> Self {
        Self {
            name: name.into(),
            kind,
            uploaded_to_device: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            state: Mutex::new(AssetState::Unloaded),
            finished: Signal::new(),
            generation: AtomicU64::new(0),
            last_error: Mutex::new(None),
            on_loaded: Mutex::new(Vec::new()),
            on_error: Mutex::new(None),
            cpu_data: Mutex::new(None),
            device_resource: Mutex::new(None),
        }
    }

    pub fn new_handle(name: impl Into<String>, kind: AssetKind) -> AssetHandle {
        Arc::new(Self::new(name, kind))
    }
}
// getters
impl Asset {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn kind(&self) -> AssetKind {
        self.kind
    }
    #[inline]
    pub fn state(&self) -> AssetState {
        *self.state.lock()
    }
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }
    #[inline]
    pub fn is_uploaded_to_device(&self) -> bool {
        self.uploaded_to_device.load(Ordering::Acquire)
    }
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished.is_set()
    }
    /// 最近一次失败的错误信息
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }
}
// callbacks & wait
impl Asset {
    /// 注册加载成功回调，可以注册多个，每次加载成功都会按注册顺序调用
    pub fn on_loaded(&self, callback: impl Fn(&Asset) + Send + Sync + 'static) {
        self.on_loaded.lock().push(Arc::new(callback));
    }

    /// 设置加载失败回调，只保留最后一次设置的
    pub fn on_error(&self, callback: impl Fn(&Asset, &anyhow::Error) + Send + Sync + 'static) {
        *self.on_error.lock() = Some(Arc::new(callback));
    }

    /// 阻塞直到本次加载结束（成功或失败）
    pub fn wait_until_loaded(&self) -> LoadStatus {
        self.finished.wait();
        self.state().load_status()
    }

    /// 带超时的 `wait_until_loaded`，超时返回 `None`
    pub fn wait_until_loaded_timeout(&self, timeout: Duration) -> Option<LoadStatus> {
        self.finished.wait_timeout(timeout).then(|| self.state().load_status())
    }
}
// payload
impl Asset {
    /// 写入解码后的 CPU 数据，覆盖之前的数据
    pub fn store_cpu_data<T: Any + Send>(&self, data: T) {
        *self.cpu_data.lock() = Some(Box::new(data));
    }

    /// 取出 CPU 数据；类型不匹配时数据保持原样并返回 `None`
    pub fn take_cpu_data<T: Any + Send>(&self) -> Option<T> {
        let mut slot = self.cpu_data.lock();
        let boxed = slot.take()?;
        match boxed.downcast::<T>() {
            Ok(data) => Some(*data),
            Err(boxed) => {
                *slot = Some(boxed);
                None
            }
        }
    }

    pub fn with_cpu_data<T: Any + Send, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let slot = self.cpu_data.lock();
        slot.as_ref().and_then(|data| data.downcast_ref::<T>()).map(f)
    }

    #[inline]
    pub fn has_cpu_data(&self) -> bool {
        self.cpu_data.lock().is_some()
    }

    pub fn clear_cpu_data(&self) {
        self.cpu_data.lock().take();
    }

    /// 写入设备资源，并标记为已上传
    ///
    /// 只应该在 GPU 线程上，由 `AssetLoader::create_device_resource` 调用。
    pub fn set_device_resource<T: Any + Send>(&self, resource: T) {
        *self.device_resource.lock() = Some(Box::new(resource));
        self.uploaded_to_device.store(true, Ordering::Release);
    }

    pub fn with_device_resource<T: Any + Send, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let slot = self.device_resource.lock();
        slot.as_ref().and_then(|resource| resource.downcast_ref::<T>()).map(f)
    }

    /// 释放设备资源，返回之前是否存在
    pub fn drop_device_resource(&self) -> bool {
        self.uploaded_to_device.store(false, Ordering::Release);
        // 先从锁里取出来，再 drop，避免资源的 Drop 里回调到 asset
        let resource = self.device_resource.lock().take();
        resource.is_some()
    }
}
// pipeline 内部的状态流转
impl Asset {
    pub(crate) fn set_state(&self, state: AssetState) {
        *self.state.lock() = state;
    }

    pub(crate) fn mark_queued(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.loaded.store(false, Ordering::Release);
        self.last_error.lock().take();
        self.finished.reset();
        self.set_state(AssetState::Queued);
    }

    /// 成功路径：回调 -> loaded -> finished
    ///
    /// 回调里重新提交了这个 asset 时，本次结果不再写回，等待者等的是新的一次加载。
    pub(crate) fn complete_success(&self) {
        let generation = self.generation.load(Ordering::Acquire);
        let callbacks = self.on_loaded.lock().clone();
        for callback in &callbacks {
            callback(self);
        }

        if self.generation.load(Ordering::Acquire) != generation {
            log::debug!("'{}' was resubmitted from on_loaded, skip finishing this load", self.name);
            return;
        }
        self.loaded.store(true, Ordering::Release);
        self.set_state(AssetState::Ready);
        self.finished.set();
    }

    /// 失败路径：finished -> on_error
    pub(crate) fn complete_error(&self, error: anyhow::Error) {
        *self.last_error.lock() = Some(format!("{error:#}"));
        self.loaded.store(false, Ordering::Release);
        self.set_state(AssetState::Failed);
        self.finished.set();

        let callback = self.on_error.lock().clone();
        if let Some(callback) = callback {
            callback(self, &error);
        }
    }
}

impl Drop for Asset {
    fn drop(&mut self) {
        // 设备资源必须先于其他数据释放
        if self.device_resource.get_mut().take().is_some() {
            log::debug!("Asset '{}' dropped, device resource released", self.name);
        }
        self.uploaded_to_device.store(false, Ordering::Release);
        self.cpu_data.get_mut().take();
    }
}

impl std::fmt::Debug for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Asset")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("loaded", &self.is_loaded())
            .field("uploaded_to_device", &self.is_uploaded_to_device())
            .finish()
    }
}
