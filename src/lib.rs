//! 过场动画播放内核
//!
//! 解封装线程 → 包队列 → 视频解码线程 → 帧环形缓冲 → 驱动线程的 `update()`，
//! 音频解码由宿主注入的 [`player::AudioFactory`] 负责。

pub mod core;
pub mod player;

pub use crate::core::{
    BufferStatus, MasterClock, MediaInfo, PlaybackState, PlayerConfig, PlayerError, Result, SyncMode,
    VideoFrame, VideoImage,
};
pub use crate::player::VideoState;
