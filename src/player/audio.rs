use crate::core::{Result, StreamInfo};
use crate::player::packet_queue::{PacketQueue, QueueGet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 音频包读取端，交给外部音频解码器使用
///
/// 与视频解码线程遵循同样的约定：读到 `QueuedPacket::Flush` 时必须丢弃
/// 解码器内部状态，并把音频时钟重置为标记携带的时间戳。
pub struct AudioPacketReader {
    queue: Arc<PacketQueue>,
    quit: Arc<AtomicBool>,
}

impl AudioPacketReader {
    pub(crate) fn new(queue: Arc<PacketQueue>, quit: Arc<AtomicBool>) -> Self {
        Self { queue, quit }
    }

    /// 阻塞读取下一个包，语义同 `PacketQueue::get`
    pub fn next(&self) -> QueueGet {
        self.queue.get(&self.quit)
    }

    pub fn is_quitting(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }
}

/// 创建音频解码器时提供的会话上下文
pub struct AudioStreamContext {
    pub stream: StreamInfo,
    pub packets: AudioPacketReader,
    paused: Arc<AtomicBool>,
}

impl AudioStreamContext {
    pub(crate) fn new(stream: StreamInfo, packets: AudioPacketReader, paused: Arc<AtomicBool>) -> Self {
        Self { stream, packets, paused }
    }

    /// 播放是否处于暂停（音频输出自行决定如何暂停）
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// 外部音频解码器
///
/// 解码与输出在它自己的线程里完成；播放内核只查询音频时钟。
/// 实例在会话关闭时被 drop，drop 时应当结束并 join 自己的线程。
pub trait AudioDecoder: Send {
    /// 当前音频播放位置（秒）
    fn audio_clock(&self) -> f64;

    fn set_paused(&mut self, _paused: bool) {}
}

/// 音频解码器工厂，由宿主程序在 `init` 之前注入
pub trait AudioFactory: Send + Sync {
    fn create_decoder(&self, context: AudioStreamContext) -> Result<Box<dyn AudioDecoder>>;
}
