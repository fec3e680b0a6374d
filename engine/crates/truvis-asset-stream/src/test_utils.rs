use crate::asset::Asset;
use crate::loader::AssetLoader;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// 轮询直到条件成立或超时
pub fn wait_for(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if f() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

/// 测试用的设备资源，drop 时减少存活计数
pub struct StubDeviceResource {
    pub id: usize,
    live: Option<Arc<AtomicUsize>>,
}
impl StubDeviceResource {
    pub fn untracked(id: usize) -> Self {
        Self { id, live: None }
    }
}
impl Drop for StubDeviceResource {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// 记录所有调用的 loader
#[derive(Default)]
pub struct StubLoader {
    decode_delay: Duration,
    release_delay: Duration,
    fail_decode: bool,
    fail_upload: bool,
    forget_upload_flag: bool,

    memory_loads: AtomicUsize,
    path_loads: AtomicUsize,
    uploads: AtomicUsize,
    releases: AtomicUsize,
    device_releases: AtomicUsize,

    loading_now: AtomicUsize,
    peak_loading: AtomicUsize,

    next_resource_id: AtomicUsize,
    live_resources: Arc<AtomicUsize>,

    upload_threads: Mutex<Vec<ThreadId>>,
    events: Mutex<Vec<String>>,
}
// new & init
impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    pub fn with_release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = delay;
        self
    }

    pub fn failing_decode(mut self) -> Self {
        self.fail_decode = true;
        self
    }

    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    /// create_device_resource 返回 Ok 但不设置 uploaded_to_device
    pub fn forgetting_upload_flag(mut self) -> Self {
        self.forget_upload_flag = true;
        self
    }
}
// getters
impl StubLoader {
    pub fn memory_loads(&self) -> usize {
        self.memory_loads.load(Ordering::SeqCst)
    }
    pub fn path_loads(&self) -> usize {
        self.path_loads.load(Ordering::SeqCst)
    }
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
    pub fn device_releases(&self) -> usize {
        self.device_releases.load(Ordering::SeqCst)
    }
    pub fn loading_now(&self) -> usize {
        self.loading_now.load(Ordering::SeqCst)
    }
    pub fn peak_loading(&self) -> usize {
        self.peak_loading.load(Ordering::SeqCst)
    }
    pub fn live_device_resources(&self) -> usize {
        self.live_resources.load(Ordering::SeqCst)
    }
    pub fn upload_threads(&self) -> Vec<ThreadId> {
        self.upload_threads.lock().clone()
    }
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}
// tools
impl StubLoader {
    fn record(&self, event: String) {
        self.events.lock().push(event);
    }

    fn decode(&self, asset: &Asset, bytes: Vec<u8>) -> anyhow::Result<()> {
        self.record(format!("load:{}", asset.name()));
        let now = self.loading_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_loading.fetch_max(now, Ordering::SeqCst);

        if !self.decode_delay.is_zero() {
            thread::sleep(self.decode_delay);
        }
        self.loading_now.fetch_sub(1, Ordering::SeqCst);

        anyhow::ensure!(!self.fail_decode, "stub decode failure for '{}'", asset.name());
        asset.store_cpu_data(bytes);
        Ok(())
    }
}
impl AssetLoader for StubLoader {
    fn name(&self) -> &str {
        "StubLoader"
    }

    fn load_from_path(&self, asset: &Asset, path: &Path) -> anyhow::Result<()> {
        self.path_loads.fetch_add(1, Ordering::SeqCst);
        self.decode(asset, path.to_string_lossy().into_owned().into_bytes())
    }

    fn load_from_memory(&self, asset: &Asset, data: &[u8]) -> anyhow::Result<()> {
        self.memory_loads.fetch_add(1, Ordering::SeqCst);
        self.decode(asset, data.to_vec())
    }

    fn create_device_resource(&self, asset: &Asset) -> anyhow::Result<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.upload_threads.lock().push(thread::current().id());
        self.record(format!("upload:{}", asset.name()));

        anyhow::ensure!(!self.fail_upload, "stub upload failure for '{}'", asset.name());
        anyhow::ensure!(asset.has_cpu_data(), "'{}' has no cpu data to upload", asset.name());

        if !self.forget_upload_flag {
            self.live_resources.fetch_add(1, Ordering::SeqCst);
            asset.set_device_resource(StubDeviceResource {
                id: self.next_resource_id.fetch_add(1, Ordering::SeqCst) + 1,
                live: Some(self.live_resources.clone()),
            });
        }
        Ok(())
    }

    fn release(&self, asset: &Asset) {
        if !self.release_delay.is_zero() {
            thread::sleep(self.release_delay);
        }
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.record(format!("release:{}", asset.name()));
        asset.clear_cpu_data();
    }

    fn release_device_resource(&self, asset: &Asset) {
        self.device_releases.fetch_add(1, Ordering::SeqCst);
        self.record(format!("release_device:{}", asset.name()));
        asset.drop_device_resource();
    }
}
