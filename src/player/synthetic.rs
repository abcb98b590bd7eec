//! 确定性的测试图样容器与解码器
//!
//! 不依赖 FFmpeg：按固定帧率生成视频包（可选交错的音频包），
//! 解码器把帧序号编码进像素颜色，并记录收到的包和 flush 事件。

use crate::core::{
    FrameInfo, MediaPacket, PlayerError, Rational, Result, RgbaImage, StreamInfo, StreamKind,
};
use crate::player::demuxer_source::{ContainerOpener, DemuxerSource, MediaInput, VideoCodec};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const AUDIO_TIME_BASE: Rational = Rational::new(1, 1000);
const AUDIO_PACKET_SIZE: usize = 256;

/// 解码器观察到的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecEvent {
    Packet { pts: Option<i64> },
    Flush,
}

pub type CodecEventLog = Arc<Mutex<Vec<CodecEvent>>>;

/// 测试图样容器
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    duration: f64,
    fps: u32,
    width: u32,
    height: u32,
    packet_size: usize,
    decode_delay: Duration,
    has_video: bool,
    has_audio: bool,
    failing_seek: bool,
    /// 第 n 次读取（从 0 计）返回一次错误
    read_error_at: Option<usize>,
    /// 该帧的视频包被截断，解码时出错
    corrupt_frame: Option<usize>,
    reads: usize,
    event_log: Option<CodecEventLog>,
    streams: Vec<StreamInfo>,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    /// 下一个要读的帧序号
    position: usize,
    /// 刚读完视频包，下一个是同一时刻的音频包
    pending_audio: bool,
}

impl SyntheticSource {
    pub fn new(duration: f64, fps: u32) -> Self {
        let mut source = Self {
            duration,
            fps: fps.max(1),
            width: 16,
            height: 8,
            packet_size: 1024,
            decode_delay: Duration::ZERO,
            has_video: true,
            has_audio: false,
            failing_seek: false,
            read_error_at: None,
            corrupt_frame: None,
            reads: 0,
            event_log: None,
            streams: Vec::new(),
            video_index: None,
            audio_index: None,
            position: 0,
            pending_audio: false,
        };
        source.rebuild_streams();
        source
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self.rebuild_streams();
        self
    }

    /// 追加一条交错的音频流（时间基 1/1000）
    pub fn with_audio(mut self) -> Self {
        self.has_audio = true;
        self.rebuild_streams();
        self
    }

    pub fn without_video(mut self) -> Self {
        self.has_video = false;
        self.rebuild_streams();
        self
    }

    /// 每个视频包的字节数
    pub fn with_packet_size(mut self, size: usize) -> Self {
        self.packet_size = size.max(8);
        self
    }

    /// 每个包的模拟解码耗时
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    pub fn with_event_log(mut self, log: CodecEventLog) -> Self {
        self.event_log = Some(log);
        self
    }

    pub fn with_failing_seek(mut self) -> Self {
        self.failing_seek = true;
        self
    }

    /// 第 `n` 次调用 `read_packet` 时返回一次读取错误，之后照常读取
    pub fn with_read_error_at(mut self, n: usize) -> Self {
        self.read_error_at = Some(n);
        self
    }

    /// 指定帧的视频包只有几个字节，解码器会拒绝它
    pub fn with_corrupt_packet_at(mut self, frame: usize) -> Self {
        self.corrupt_frame = Some(frame);
        self
    }

    pub fn frame_count(&self) -> usize {
        (self.duration * self.fps as f64).round().max(0.0) as usize
    }

    fn rebuild_streams(&mut self) {
        self.streams.clear();
        self.video_index = None;
        self.audio_index = None;

        if self.has_video {
            self.video_index = Some(self.streams.len());
            self.streams.push(StreamInfo {
                index: self.streams.len(),
                kind: StreamKind::Video,
                time_base: Rational::new(1, self.fps as i32),
                frame_rate: Rational::new(self.fps as i32, 1),
                codec_name: "testsrc".to_string(),
                width: self.width,
                height: self.height,
                sample_rate: 0,
                channels: 0,
            });
        }
        if self.has_audio {
            self.audio_index = Some(self.streams.len());
            self.streams.push(StreamInfo {
                index: self.streams.len(),
                kind: StreamKind::Audio,
                time_base: AUDIO_TIME_BASE,
                frame_rate: Rational::new(0, 0),
                codec_name: "pcm_s16le".to_string(),
                width: 0,
                height: 0,
                sample_rate: 48_000,
                channels: 2,
            });
        }
    }

    fn video_packet(&self, stream_index: usize, frame: usize) -> MediaPacket {
        let mut data = vec![0u8; self.packet_size];
        data[..8].copy_from_slice(&(frame as u64).to_le_bytes());
        if self.corrupt_frame == Some(frame) {
            data.truncate(4);
        }
        MediaPacket {
            stream_index,
            pts: Some(frame as i64),
            dts: Some(frame as i64),
            duration: 1,
            data,
        }
    }

    fn audio_packet(&self, stream_index: usize, frame: usize) -> MediaPacket {
        let pts = frame as i64 * 1000 / self.fps as i64;
        MediaPacket {
            stream_index,
            pts: Some(pts),
            dts: Some(pts),
            duration: 1000 / self.fps as i64,
            data: vec![0u8; AUDIO_PACKET_SIZE],
        }
    }
}

impl DemuxerSource for SyntheticSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        let read = self.reads;
        self.reads += 1;
        if self.read_error_at == Some(read) {
            return Err(PlayerError::IoError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "测试图样模拟读取失败",
            )));
        }

        if self.pending_audio {
            self.pending_audio = false;
            if let Some(audio) = self.audio_index {
                return Ok(Some(self.audio_packet(audio, self.position - 1)));
            }
        }
        if self.position >= self.frame_count() {
            return Ok(None);
        }

        let frame = self.position;
        self.position += 1;
        match (self.video_index, self.audio_index) {
            (Some(video), audio) => {
                self.pending_audio = audio.is_some();
                Ok(Some(self.video_packet(video, frame)))
            }
            (None, Some(audio)) => Ok(Some(self.audio_packet(audio, frame))),
            (None, None) => Ok(None),
        }
    }

    fn seek(&mut self, timestamp_us: i64) -> Result<()> {
        if self.failing_seek {
            return Err(PlayerError::IoError(io::Error::new(
                io::ErrorKind::Unsupported,
                "测试图样不支持 seek",
            )));
        }
        // 向下取整：落在目标之前最近的帧
        let frame = (timestamp_us.max(0) as i128 * self.fps as i128 / 1_000_000) as usize;
        self.position = frame.min(self.frame_count());
        self.pending_audio = false;
        Ok(())
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn open_video_codec(&self, stream_index: usize) -> Result<Box<dyn VideoCodec>> {
        if Some(stream_index) != self.video_index {
            return Err(PlayerError::UnsupportedCodec(format!("流 #{} 不是视频流", stream_index)));
        }
        Ok(Box::new(SyntheticCodec {
            width: self.width,
            height: self.height,
            decode_delay: self.decode_delay,
            event_log: self.event_log.clone(),
            pending: VecDeque::new(),
            current: 0,
        }))
    }

    fn description(&self) -> String {
        format!(
            "testsrc {}x{} @ {}fps, {:.2}s{}",
            self.width,
            self.height,
            self.fps,
            self.duration,
            if self.has_audio { " + audio" } else { "" }
        )
    }
}

/// 测试图样解码器：一包一帧，帧序号写进像素颜色
pub struct SyntheticCodec {
    width: u32,
    height: u32,
    decode_delay: Duration,
    event_log: Option<CodecEventLog>,
    pending: VecDeque<(u64, Option<i64>)>,
    current: u64,
}

impl SyntheticCodec {
    fn record(&self, event: CodecEvent) {
        if let Some(log) = &self.event_log {
            log.lock().push(event);
        }
    }

    /// 帧序号对应的像素颜色
    pub fn color_of(frame: u64) -> [u8; 4] {
        [frame as u8, (frame >> 8) as u8, (frame * 37) as u8, 255]
    }
}

impl VideoCodec for SyntheticCodec {
    fn send_packet(&mut self, packet: &MediaPacket) -> Result<()> {
        if packet.data.len() < 8 {
            return Err(PlayerError::DecodeError(format!(
                "包太短: {} 字节",
                packet.data.len()
            )));
        }
        self.record(CodecEvent::Packet { pts: packet.pts });
        if !self.decode_delay.is_zero() {
            thread::sleep(self.decode_delay);
        }

        let mut index = [0u8; 8];
        index.copy_from_slice(&packet.data[..8]);
        self.pending.push_back((u64::from_le_bytes(index), packet.pts));
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<FrameInfo>> {
        Ok(self.pending.pop_front().map(|(index, pts)| {
            self.current = index;
            FrameInfo {
                width: self.width,
                height: self.height,
                timestamp: pts,
                repeat_pict: 0,
            }
        }))
    }

    fn convert_frame(&mut self, target: &mut RgbaImage) -> Result<()> {
        target.set_dimensions(self.width, self.height);
        let color = Self::color_of(self.current);
        for pixel in target.data.chunks_exact_mut(4) {
            pixel.copy_from_slice(&color);
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.record(CodecEvent::Flush);
    }
}

/// 忽略输入字节流，总是返回同一个测试图样
pub struct SyntheticOpener {
    source: SyntheticSource,
}

impl SyntheticOpener {
    pub fn new(source: SyntheticSource) -> Self {
        Self { source }
    }
}

impl ContainerOpener for SyntheticOpener {
    fn open(&self, _input: Box<dyn MediaInput>, _name: &str) -> Result<Box<dyn DemuxerSource>> {
        Ok(Box::new(self.source.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaved_packets() {
        let mut source = SyntheticSource::new(0.2, 10).with_audio();
        let mut order = Vec::new();
        while let Some(packet) = source.read_packet().unwrap() {
            order.push((packet.stream_index, packet.pts));
        }
        assert_eq!(order, vec![(0, Some(0)), (1, Some(0)), (0, Some(1)), (1, Some(100))]);
    }

    #[test]
    fn test_seek_lands_on_or_before_target() {
        let mut source = SyntheticSource::new(2.0, 10);
        source.seek(1_049_000).unwrap();
        assert_eq!(source.read_packet().unwrap().unwrap().pts, Some(10));
        source.seek(99_000_000).unwrap();
        assert!(source.read_packet().unwrap().is_none());
    }

    #[test]
    fn test_codec_encodes_frame_index() {
        let mut source = SyntheticSource::new(1.0, 10).with_size(2, 1);
        let mut codec = source.open_video_codec(0).unwrap();
        source.read_packet().unwrap();
        let packet = source.read_packet().unwrap().unwrap();
        codec.send_packet(&packet).unwrap();
        let frame = codec.receive_frame().unwrap().unwrap();
        assert_eq!(frame.timestamp, Some(1));
        assert!(codec.receive_frame().unwrap().is_none());

        let mut image = RgbaImage::default();
        codec.convert_frame(&mut image).unwrap();
        assert_eq!(&image.data[..4], &SyntheticCodec::color_of(1));
        assert_eq!(image.data.len(), 8);
    }

    #[test]
    fn test_read_error_is_transient() {
        let mut source = SyntheticSource::new(0.3, 10).with_read_error_at(1);
        assert_eq!(source.read_packet().unwrap().unwrap().pts, Some(0));
        assert!(matches!(source.read_packet(), Err(PlayerError::IoError(_))));
        assert_eq!(source.read_packet().unwrap().unwrap().pts, Some(1));
        assert_eq!(source.read_packet().unwrap().unwrap().pts, Some(2));
        assert!(source.read_packet().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_packet_is_rejected_by_codec() {
        let mut source = SyntheticSource::new(0.3, 10).with_corrupt_packet_at(1);
        let mut codec = source.open_video_codec(0).unwrap();
        codec.send_packet(&source.read_packet().unwrap().unwrap()).unwrap();
        let corrupt = source.read_packet().unwrap().unwrap();
        assert!(matches!(codec.send_packet(&corrupt), Err(PlayerError::DecodeError(_))));
    }

    #[test]
    fn test_audio_only_source() {
        let mut source = SyntheticSource::new(0.3, 10).with_audio().without_video();
        assert_eq!(source.streams().len(), 1);
        assert_eq!(source.streams()[0].kind, StreamKind::Audio);
        assert!(source.open_video_codec(0).is_err());
        let mut count = 0;
        while let Some(packet) = source.read_packet().unwrap() {
            assert_eq!(packet.stream_index, 0);
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
