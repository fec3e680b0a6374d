use crate::config::AssignExhaustedPolicy;
use crate::manager::PipelineShared;
use crate::upload::UploadStage;
use crate::work_item::WorkItem;
use crate::worker::{CompletedLoad, WorkerSlot};
use anyhow::Context;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 调度线程
///
/// 职责:
/// 1. 从 WorkQueue 取出 item，分配给空闲的 worker；
/// 2. 有 worker 在忙时按固定间隔轮询，驱动上传阶段（如果上传阶段归 dispatcher 所有）；
/// 3. 所有 worker 空闲时阻塞在 `work_available` 上。
///
/// 整个进程只有一个 dispatcher 线程。
pub(crate) struct Dispatcher {
    shared: Arc<PipelineShared>,
    workers: Vec<Arc<WorkerSlot>>,
    /// `None` 表示上传阶段由外部线程驱动
    upload_stage: Option<UploadStage>,
}
// new & init
impl Dispatcher {
    pub(crate) fn spawn(
        shared: Arc<PipelineShared>,
        workers: Vec<Arc<WorkerSlot>>,
        completions: Option<Receiver<CompletedLoad>>,
    ) -> anyhow::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("AssetDispatchThread".to_string())
            .spawn(move || {
                // UploadStage 在本线程内创建，因此被固定在 dispatcher 线程上
                let upload_stage = completions.map(|rx| UploadStage::new(rx, shared.clone()));
                let mut dispatcher = Self {
                    shared,
                    workers,
                    upload_stage,
                };
                dispatcher.run();
            })
            .context("Failed to spawn asset dispatch thread")
    }
}
// main loop
impl Dispatcher {
    fn run(&mut self) {
        while self.shared.is_active() {
            while self.any_worker_busy() && self.shared.is_active() {
                self.wait_for_uploadable_data();
                self.check_for_items_to_load();
            }

            self.shared.work_available.wait();
            self.shared.work_available.reset();
            if !self.shared.is_active() {
                break;
            }
            self.check_for_items_to_load();
        }

        // worker 在关闭期间仍可能送来完成消息，处理到 channel 断开为止
        if let Some(stage) = self.upload_stage.as_mut() {
            stage.drain_until_closed();
        }
        log::info!("Asset dispatch thread exit");
    }

    fn any_worker_busy(&self) -> bool {
        self.workers.iter().any(|worker| worker.is_busy())
    }

    /// 等待最多一个轮询间隔
    ///
    /// 上传阶段归 dispatcher 所有时，在完成消息到达时提前返回并处理；
    /// 否则等待外部上传阶段通过 `work_available` 唤醒。
    fn wait_for_uploadable_data(&mut self) {
        let poll_interval = self.shared.config.poll_interval();
        match self.upload_stage.as_mut() {
            Some(stage) => {
                stage.pump_timeout(poll_interval);
            }
            None => {
                if self.shared.work_available.wait_timeout(poll_interval) {
                    self.shared.work_available.reset();
                }
            }
        }
    }
}
// assignment
impl Dispatcher {
    fn check_for_items_to_load(&mut self) {
        let _span = tracy_client::span!("Dispatcher::check_for_items_to_load");
        while let Some(item) = self.shared.queue.try_pop() {
            let Some(worker) = self.find_idle_worker() else {
                self.on_assign_exhausted(item);
                break;
            };

            log::debug!("Assign '{}' to worker {}", item.asset().name(), worker.id());
            if let Err(item) = worker.submit_item_to_load(item) {
                // worker 正在关闭，留给 shutdown 统一处理
                self.shared.queue.push_front(item);
                break;
            }
        }
    }

    /// 线性扫描空闲 worker，找不到时按配置有限次重试
    fn find_idle_worker(&self) -> Option<Arc<WorkerSlot>> {
        let retry_count = self.shared.config.assign_retry_count;
        let retry_interval = self.shared.config.assign_retry_interval();

        for attempt in 0..=retry_count {
            if let Some(worker) = self.workers.iter().find(|worker| !worker.is_busy()) {
                return Some(worker.clone());
            }
            if attempt < retry_count {
                thread::sleep(retry_interval);
            }
        }
        None
    }

    fn on_assign_exhausted(&self, item: WorkItem) {
        match self.shared.config.assign_exhausted_policy {
            AssignExhaustedPolicy::Requeue => {
                log::debug!("No idle worker for '{}', requeue", item.asset().name());
                self.shared.stats.on_requeued();
                self.shared.queue.push_front(item);
            }
            AssignExhaustedPolicy::Drop => {
                log::error!(
                    "No idle worker for '{}' after {} retries, dropping it",
                    item.asset().name(),
                    self.shared.config.assign_retry_count
                );
                self.shared.stats.on_dropped();
                let name = item.asset().name().to_string();
                self.shared.fail_item(item, anyhow::anyhow!("no idle worker available for '{}'", name));
            }
        }
    }
}
