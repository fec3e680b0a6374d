use std::sync::atomic::{AtomicUsize, Ordering};

/// 流水线计数器，所有线程共享
#[derive(Default, Debug)]
pub struct PipelineStats {
    submitted: AtomicUsize,
    loaded: AtomicUsize,
    failed: AtomicUsize,
    dropped: AtomicUsize,
    requeued: AtomicUsize,
    loading_now: AtomicUsize,
    peak_loading: AtomicUsize,
}

/// 某一时刻的计数器快照
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct StatsSnapshot {
    pub submitted: usize,
    pub loaded: usize,
    pub failed: usize,
    /// 因为没有空闲 worker 被丢弃的 item
    pub dropped: usize,
    /// 因为没有空闲 worker 被放回队首的次数
    pub requeued: usize,
    /// 正处于 Loading 状态的 item 数
    pub loading_now: usize,
    /// 同时处于 Loading 状态的历史峰值
    pub peak_loading: usize,
}

impl StatsSnapshot {
    /// 已经有结果的 item 数量
    #[inline]
    pub fn finished(&self) -> usize {
        self.loaded + self.failed
    }
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            loaded: self.loaded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            loading_now: self.loading_now.load(Ordering::Relaxed),
            peak_loading: self.peak_loading.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn on_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn on_loaded(&self) {
        self.loaded.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn on_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn on_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn on_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn begin_loading(&self) {
        let now = self.loading_now.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_loading.fetch_max(now, Ordering::AcqRel);
    }
    pub(crate) fn end_loading(&self) {
        self.loading_now.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_maximum_concurrency() {
        let stats = PipelineStats::default();
        stats.begin_loading();
        stats.begin_loading();
        stats.end_loading();
        stats.begin_loading();
        stats.end_loading();
        stats.end_loading();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.loading_now, 0);
        assert_eq!(snapshot.peak_loading, 2);
    }
}
