use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 所有 worker 都忙、重试次数用完时如何处理已经出队的 item
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignExhaustedPolicy {
    /// 放回队首，下一轮再分配
    #[default]
    Requeue,
    /// 丢弃，并让该 asset 走失败路径
    Drop,
}

/// 流式加载配置
///
/// 可以从 TOML 中读取，缺省字段使用默认值：
/// ```toml
/// worker_count = 4
/// poll_interval_ms = 80
/// assign_exhausted_policy = "requeue"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// IO worker 线程数量
    pub worker_count: usize,
    /// 有 worker 在忙时，dispatcher 的轮询间隔
    pub poll_interval_ms: u64,
    /// 找不到空闲 worker 时的重试次数
    pub assign_retry_count: u32,
    /// 两次重试之间的间隔
    pub assign_retry_interval_ms: u64,
    /// `create_device_resource` 返回后，等待 `uploaded_to_device` 翻转的最长时间
    pub upload_wait_timeout_ms: u64,
    pub assign_exhausted_policy: AssignExhaustedPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).clamp(1, 8);
        Self {
            worker_count,
            poll_interval_ms: 80,
            assign_retry_count: 3,
            assign_retry_interval_ms: 2,
            upload_wait_timeout_ms: 5000,
            assign_exhausted_policy: AssignExhaustedPolicy::Requeue,
        }
    }
}
// load
impl StreamConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read stream config: {:?}", path.as_ref()))?;

        Self::from_toml_str(&content).with_context(|| format!("Failed to parse stream config: {:?}", path.as_ref()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: StreamConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.worker_count > 0, "worker_count must be at least 1");
        anyhow::ensure!(self.poll_interval_ms > 0, "poll_interval_ms must be at least 1");
        Ok(())
    }
}
// getters
impl StreamConfig {
    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    #[inline]
    pub fn assign_retry_interval(&self) -> Duration {
        Duration::from_millis(self.assign_retry_interval_ms)
    }
    #[inline]
    pub fn upload_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_wait_timeout_ms)
    }
}
