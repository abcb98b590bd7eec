use crate::core::{PlayerError, Result, SyncMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放内核配置
///
/// 所有字段都有默认值，JSON 里只需写要覆盖的项。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 音频包队列字节上限
    pub audio_queue_limit: usize,
    /// 视频包队列字节上限
    pub video_queue_limit: usize,
    /// 视频帧环形缓冲容量
    pub picture_queue_size: usize,
    /// 显示提前量（秒）
    pub display_threshold: f64,
    pub sync_mode: SyncMode,
    /// 队列超限时的等待时长
    pub backpressure_wait_ms: u64,
    /// 阻塞读包时检查退出标志的间隔
    pub queue_poll_ms: u64,
    /// 环形缓冲满时生产者的检查间隔
    pub picture_poll_ms: u64,
    /// 读包失败（EOF）后的休眠
    pub eof_poll_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            audio_queue_limit: 5 * 16 * 1024,
            video_queue_limit: 5 * 256 * 1024,
            picture_queue_size: 50,
            display_threshold: 0.03,
            sync_mode: SyncMode::Auto,
            backpressure_wait_ms: 10,
            queue_poll_ms: 10,
            picture_poll_ms: 1,
            eof_poll_ms: 10,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文件加载并校验
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.picture_queue_size == 0 {
            return Err(PlayerError::ConfigError("picture_queue_size 必须大于 0".to_string()));
        }
        if self.audio_queue_limit == 0 || self.video_queue_limit == 0 {
            return Err(PlayerError::ConfigError("包队列上限必须大于 0".to_string()));
        }
        if !(self.display_threshold >= 0.0) {
            return Err(PlayerError::ConfigError(format!(
                "display_threshold 无效: {}",
                self.display_threshold
            )));
        }
        if self.queue_poll_ms == 0
            || self.picture_poll_ms == 0
            || self.eof_poll_ms == 0
            || self.backpressure_wait_ms == 0
        {
            return Err(PlayerError::ConfigError("轮询间隔必须大于 0".to_string()));
        }
        Ok(())
    }

    pub fn backpressure_wait(&self) -> Duration {
        Duration::from_millis(self.backpressure_wait_ms)
    }

    pub fn queue_poll(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }

    pub fn picture_poll(&self) -> Duration {
        Duration::from_millis(self.picture_poll_ms)
    }

    pub fn eof_poll(&self) -> Duration {
        Duration::from_millis(self.eof_poll_ms)
    }
}
