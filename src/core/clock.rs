use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// 外部时钟 - 可暂停的单调时钟，没有音频时作为主时钟
pub struct ExternalClock {
    inner: Mutex<ClockInner>,
}

struct ClockInner {
    base_instant: Instant,      // 基准时刻
    base_offset: Duration,      // 基准时刻对应的播放位置
    paused_at: Duration,        // 暂停时的位置
    paused: bool,
}

impl ExternalClock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClockInner {
                base_instant: Instant::now(),
                base_offset: Duration::ZERO,
                paused_at: Duration::ZERO,
                paused: false,
            }),
        }
    }

    /// 当前时间（微秒）
    pub fn get(&self) -> u64 {
        let inner = self.inner.lock();
        Self::now_unlocked(&inner).as_micros() as u64
    }

    /// 当前时间（秒）
    pub fn seconds(&self) -> f64 {
        let inner = self.inner.lock();
        Self::now_unlocked(&inner).as_secs_f64()
    }

    /// 设置播放位置（微秒），保持暂停状态不变
    pub fn set(&self, time_us: u64) {
        let mut inner = self.inner.lock();
        let position = Duration::from_micros(time_us);
        inner.base_instant = Instant::now();
        inner.base_offset = position;
        inner.paused_at = position;
    }

    /// 暂停 / 恢复
    pub fn set_paused(&self, paused: bool) {
        let mut inner = self.inner.lock();
        if inner.paused == paused {
            return;
        }
        if paused {
            inner.paused_at = inner.base_offset + inner.base_instant.elapsed();
        } else {
            inner.base_instant = Instant::now();
            inner.base_offset = inner.paused_at;
        }
        inner.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    fn now_unlocked(inner: &ClockInner) -> Duration {
        if inner.paused {
            inner.paused_at
        } else {
            inner.base_offset + inner.base_instant.elapsed()
        }
    }
}

impl Default for ExternalClock {
    fn default() -> Self {
        Self::new()
    }
}

/// 同步模式（配置项）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// 根据存在的流自动选择
    #[default]
    Auto,
    Video,
    Audio,
    External,
}

/// 主时钟来源，每个会话只选一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterClock {
    /// 最近显示帧的时间戳
    Video,
    /// 音频解码器报告的播放位置
    Audio,
    /// 外部墙钟
    External,
}

impl MasterClock {
    /// 选择主时钟：只有视频或强制视频 → 视频；有音频 → 音频；否则外部时钟
    pub fn select(mode: SyncMode, has_video: bool, has_audio: bool) -> Self {
        match mode {
            SyncMode::Video if has_video => MasterClock::Video,
            SyncMode::Audio if has_audio => MasterClock::Audio,
            SyncMode::External => MasterClock::External,
            _ => {
                if has_video && !has_audio {
                    MasterClock::Video
                } else if has_audio {
                    MasterClock::Audio
                } else {
                    MasterClock::External
                }
            }
        }
    }
}
