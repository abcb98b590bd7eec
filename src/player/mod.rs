// 播放器核心模块

pub mod audio;
pub mod demuxer_source;  // Demuxer / 解码器抽象接口
pub mod packet_queue;
pub mod picture_queue;
pub mod sink;
pub mod synthetic;       // 测试图样容器
pub mod video_state;

mod demuxer_thread;
mod video_thread;

#[cfg(feature = "ffmpeg")]
pub mod decoder;
#[cfg(feature = "ffmpeg")]
pub mod demuxer;

pub use audio::{AudioDecoder, AudioFactory, AudioPacketReader, AudioStreamContext};
pub use demuxer_source::{ContainerOpener, DemuxerSource, MediaInput, VideoCodec};
pub use packet_queue::{PacketQueue, QueueGet};
pub use picture_queue::PictureQueue;
pub use sink::{ChannelSink, VideoSink};
pub use synthetic::{CodecEvent, CodecEventLog, SyntheticOpener, SyntheticSource};
pub use video_state::{clamp_seek_target, VideoState};

#[cfg(feature = "ffmpeg")]
pub use decoder::SoftwareVideoDecoder;
#[cfg(feature = "ffmpeg")]
pub use demuxer::{Demuxer, FfmpegOpener};

use std::{process, thread};

/// 日志上下文：进程号 + 线程号
pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
