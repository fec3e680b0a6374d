use crate::handle::{AssetState, LoadStatus};
use crate::signal::Signal;
use crate::stats::PipelineStats;
use crate::work_item::WorkItem;
use anyhow::Context;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Worker 状态机
///
/// WaitingForWork -> Loading -> AwaitingUpload -> WaitingForWork
///        \-> Shutdown
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WorkerState {
    WaitingForWork,
    Loading,
    AwaitingUpload,
    Shutdown,
}

/// worker 解码完成后发给上传阶段的消息
pub(crate) struct CompletedLoad {
    pub worker: Arc<WorkerSlot>,
    pub item: WorkItem,
    pub result: anyhow::Result<()>,
}

/// worker 线程与 dispatcher / 上传阶段共享的部分
///
/// busy 由 dispatcher 置位、由上传阶段清除；
/// last_status 只由 worker 线程自己写入。
pub struct WorkerSlot {
    id: usize,
    wake: Signal,

    busy: Mutex<bool>,
    busy_cleared: Condvar,
    pending_upload: AtomicBool,
    shutting_down: AtomicBool,

    state: Mutex<WorkerState>,
    last_status: Mutex<LoadStatus>,

    /// 容量为 1 的信箱，item 通过它移动到 worker 线程
    mailbox: Sender<WorkItem>,
    inbox: Receiver<WorkItem>,
}
// getters
impl WorkerSlot {
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }
    #[inline]
    pub fn is_busy(&self) -> bool {
        *self.busy.lock()
    }
    #[inline]
    pub fn is_pending_upload(&self) -> bool {
        self.pending_upload.load(Ordering::Acquire)
    }
    #[inline]
    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }
    #[inline]
    pub fn last_status(&self) -> LoadStatus {
        *self.last_status.lock()
    }
}
// tools
impl WorkerSlot {
    /// 把 item 交给这个 worker（dispatcher 线程调用）
    ///
    /// worker 忙时阻塞调用方，直到 busy 被清除。
    /// worker 正在关闭时把 item 原样还给调用方。
    pub fn submit_item_to_load(&self, item: WorkItem) -> Result<(), WorkItem> {
        let mut busy = self.busy.lock();
        while *busy && !self.shutting_down.load(Ordering::Acquire) {
            self.busy_cleared.wait(&mut busy);
        }
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(item);
        }
        *busy = true;
        drop(busy);

        // busy 保证了信箱一定是空的
        if let Err(e) = self.mailbox.try_send(item) {
            *self.busy.lock() = false;
            return Err(match e {
                TrySendError::Full(item) | TrySendError::Disconnected(item) => item,
            });
        }

        self.wake.set();
        Ok(())
    }

    /// 上传阶段处理完完成消息后调用
    pub(crate) fn clear_busy(&self) {
        self.pending_upload.store(false, Ordering::Release);
        self.set_state(WorkerState::WaitingForWork);

        let mut busy = self.busy.lock();
        *busy = false;
        self.busy_cleared.notify_all();
    }

    pub(crate) fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.wake.kill();

        // 持锁通知，避免和 submit_item_to_load 里的检查错过
        let _busy = self.busy.lock();
        self.busy_cleared.notify_all();
    }

    /// 取出已经分配、但 worker 退出前没来得及处理的 item
    ///
    /// 只在 worker 线程和 dispatcher 线程都 join 之后调用。
    pub(crate) fn take_stranded(&self) -> Option<WorkItem> {
        self.inbox.try_recv().ok()
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
    }
}

/// 一个专用的加载线程
///
/// 每次被唤醒只处理一个 item，处理完把结果交给上传阶段，然后继续等待。
pub struct Worker {
    slot: Arc<WorkerSlot>,
    thread: Option<JoinHandle<()>>,
}
// new & init
impl Worker {
    pub(crate) fn spawn(
        id: usize,
        completions: Sender<CompletedLoad>,
        stats: Arc<PipelineStats>,
    ) -> anyhow::Result<Self> {
        let (mailbox_tx, mailbox_rx) = crossbeam_channel::bounded::<WorkItem>(1);
        let slot = Arc::new(WorkerSlot {
            id,
            wake: Signal::new(),
            busy: Mutex::new(false),
            busy_cleared: Condvar::new(),
            pending_upload: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            state: Mutex::new(WorkerState::WaitingForWork),
            last_status: Mutex::new(LoadStatus::None),
            mailbox: mailbox_tx,
            inbox: mailbox_rx,
        });

        let thread = {
            let slot = slot.clone();
            thread::Builder::new()
                .name(format!("Asset-Loader-{}", id))
                .spawn(move || worker_main(slot, completions, stats))
                .with_context(|| format!("Failed to spawn asset loader thread {}", id))?
        };

        Ok(Self {
            slot,
            thread: Some(thread),
        })
    }
}
// getters
impl Worker {
    #[inline]
    pub fn slot(&self) -> &Arc<WorkerSlot> {
        &self.slot
    }
    #[inline]
    pub(crate) fn thread_id(&self) -> Option<thread::ThreadId> {
        self.thread.as_ref().map(|thread| thread.thread().id())
    }
}
// destroy
impl Worker {
    /// 需要先调用 `WorkerSlot::begin_shutdown`，否则会一直阻塞
    pub(crate) fn join(mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("Failed to join asset loader thread {}", self.slot.id);
        }
    }
}

fn worker_main(slot: Arc<WorkerSlot>, completions: Sender<CompletedLoad>, stats: Arc<PipelineStats>) {
    loop {
        slot.wake.wait();
        slot.wake.reset();
        if slot.shutting_down.load(Ordering::Acquire) {
            break;
        }

        let Ok(item) = slot.inbox.try_recv() else {
            continue;
        };

        let _span = tracy_client::span!("Worker::load");
        slot.set_state(WorkerState::Loading);
        item.asset().set_state(AssetState::Loading);
        stats.begin_loading();
        log::debug!("Worker {} loading '{}' from {}", slot.id, item.asset().name(), item.source());

        let result = match std::panic::catch_unwind(AssertUnwindSafe(|| item.decode())) {
            Ok(result) => result,
            Err(_) => {
                log::error!(
                    "Loader '{}' panicked while loading '{}', aborting",
                    item.loader().name(),
                    item.asset().name()
                );
                std::process::abort();
            }
        };
        stats.end_loading();

        let status = if result.is_ok() { LoadStatus::Success } else { LoadStatus::Error };
        *slot.last_status.lock() = status;
        if status == LoadStatus::Success {
            item.asset().set_state(AssetState::Uploading);
        }

        slot.pending_upload.store(true, Ordering::Release);
        slot.set_state(WorkerState::AwaitingUpload);

        let completed = CompletedLoad {
            worker: slot.clone(),
            item,
            result,
        };
        if let Err(e) = completions.send(completed) {
            // 上传阶段已经不存在了，只能就地失败
            let CompletedLoad { worker, item, .. } = e.into_inner();
            let (loader, asset) = item.into_parts();
            log::error!("Upload stage is gone, '{}' can not be uploaded", asset.name());
            loader.release(&asset);
            asset.complete_error(anyhow::anyhow!("upload stage was dropped before '{}' was uploaded", asset.name()));
            stats.on_failed();
            worker.clear_busy();
        }
    }

    slot.set_state(WorkerState::Shutdown);
    log::debug!("Worker {} exit", slot.id);
}
