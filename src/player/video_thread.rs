use crate::core::{FrameInfo, MediaPacket, PlayerError, QueuedPacket, Result, RgbaImage, StreamInfo};
use crate::player::demuxer_source::VideoCodec;
use crate::player::log_ctx;
use crate::player::packet_queue::QueueGet;
use crate::player::video_state::{QuitGuard, Shared};
use log::{debug, error, info};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

// seek 后判断帧是否早于目标时间的容差（秒）
const SEEK_EPSILON: f64 = 1e-6;

/// 视频解码线程
///
/// 从视频包队列取包 → 解码 → 计算显示时间戳 → 转 RGBA 放入环形缓冲。
/// 独占视频解码器；线程结束时把解码器交还给 join 方。
pub(crate) struct VideoThread {
    shared: Arc<Shared>,
    codec: Box<dyn VideoCodec>,
    stream: StreamInfo,
    frame_duration: f64,
    /// 下一帧的预计时间戳（秒），帧没有时间戳时沿用
    video_clock: f64,
    /// seek 后早于该时间的帧不显示
    skip_before: Option<f64>,
    spare: RgbaImage,
    frame_count: usize,
}

impl VideoThread {
    pub fn new(shared: Arc<Shared>, codec: Box<dyn VideoCodec>) -> Result<Self> {
        let stream = shared
            .video_stream
            .clone()
            .ok_or_else(|| PlayerError::WorkerError("会话没有视频流".to_string()))?;
        Ok(Self {
            frame_duration: stream.frame_duration(),
            stream,
            shared,
            codec,
            video_clock: 0.0,
            skip_before: None,
            spare: RgbaImage::default(),
            frame_count: 0,
        })
    }

    pub fn spawn(shared: Arc<Shared>, codec: Box<dyn VideoCodec>) -> Result<JoinHandle<Box<dyn VideoCodec>>> {
        let mut worker = VideoThread::new(shared, codec)?;
        thread::Builder::new()
            .name("video-decode".to_string())
            .spawn(move || {
                let _guard = QuitGuard::new(worker.shared.quit.clone());
                info!("{} 🎬 视频解码线程启动", log_ctx());
                if let Err(e) = worker.run() {
                    error!("{} ❌ 播放视频时出错: {}", log_ctx(), e);
                }
                info!("{} 🎬 视频解码线程结束（共 {} 帧）", log_ctx(), worker.frame_count);
                worker.codec
            })
            .map_err(|e| PlayerError::WorkerError(format!("无法启动视频解码线程: {}", e)))
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            match self.shared.videoq.get(&self.shared.quit) {
                QueueGet::Packet(QueuedPacket::Flush { pts }) => self.handle_flush(pts),
                QueueGet::Packet(QueuedPacket::Data(packet)) => {
                    if !self.decode_packet(&packet)? {
                        break;
                    }
                }
                QueueGet::Flushed | QueueGet::Stopped => break,
            }
        }
        Ok(())
    }

    /// flush 标记：丢弃解码器缓存，清空环形缓冲，视频时钟对齐到标记时间
    fn handle_flush(&mut self, pts: i64) {
        let secs = self.stream.time_base.ticks_to_secs(pts);
        debug!("{} 🧹 视频解码线程收到 flush 标记: {:.3}s", log_ctx(), secs);
        self.codec.flush();
        self.shared.pictq.reset(secs);
        self.video_clock = secs;
        self.skip_before = Some(secs);
    }

    /// 送入一个包并取出它产出的全部帧；返回 false 表示需要退出
    fn decode_packet(&mut self, packet: &MediaPacket) -> Result<bool> {
        self.codec.send_packet(packet)?;

        while let Some(frame) = self.codec.receive_frame()? {
            let pts = self.synchronize_video(&frame);

            if let Some(target) = self.skip_before {
                if pts + SEEK_EPSILON < target {
                    debug!("🎬 跳过 seek 目标之前的帧: {:.3}s < {:.3}s", pts, target);
                    continue;
                }
                self.skip_before = None;
            }

            let codec = &mut self.codec;
            let queued = self.shared.pictq.queue_picture(
                pts,
                &self.shared.quit,
                &mut self.spare,
                |image| codec.convert_frame(image),
            )?;
            if !queued {
                return Ok(false);
            }
            self.frame_count += 1;
        }
        Ok(true)
    }

    /// 计算帧的显示时间戳：有时间戳就用并校准视频时钟，没有就沿用视频时钟；
    /// 然后按标称帧间隔（考虑重复场）推进视频时钟
    fn synchronize_video(&mut self, frame: &FrameInfo) -> f64 {
        let pts = match frame.timestamp {
            Some(ts) => {
                let pts = self.stream.time_base.ticks_to_secs(ts);
                self.video_clock = pts;
                pts
            }
            None => self.video_clock,
        };

        let mut frame_delay = self.frame_duration;
        frame_delay += frame.repeat_pict as f64 * (frame_delay * 0.5);
        self.video_clock += frame_delay;
        pts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PlayerConfig, StreamKind};
    use crate::player::demuxer_source::DemuxerSource;
    use crate::player::synthetic::{CodecEvent, CodecEventLog, SyntheticSource};

    fn worker_for(source: &SyntheticSource) -> VideoThread {
        let video = source.streams().iter().find(|s| s.kind == StreamKind::Video).cloned();
        let shared = Arc::new(Shared::new(PlayerConfig::default(), video, None, source.duration()));
        let codec = source.open_video_codec(0).unwrap();
        VideoThread::new(shared, codec).unwrap()
    }

    #[test]
    fn test_decoded_frames_reach_picture_queue() {
        let mut source = SyntheticSource::new(1.0, 10);
        let mut worker = worker_for(&source);
        for _ in 0..3 {
            let packet = source.read_packet().unwrap().unwrap();
            assert!(worker.decode_packet(&packet).unwrap());
        }
        assert_eq!(worker.shared.pictq.len(), 3);
        let shown = worker.shared.pictq.refresh(None, 0.03, |_| {});
        assert_eq!(shown, Some(0.0));
    }

    #[test]
    fn test_flush_resets_ring_and_clock() {
        let mut source = SyntheticSource::new(2.0, 10);
        let mut worker = worker_for(&source);
        for _ in 0..5 {
            let packet = source.read_packet().unwrap().unwrap();
            worker.decode_packet(&packet).unwrap();
        }
        assert_eq!(worker.shared.pictq.len(), 5);

        worker.handle_flush(12);
        assert_eq!(worker.shared.pictq.len(), 0);
        assert!((worker.shared.pictq.frame_last_pts() - 1.2).abs() < 1e-9);
        assert!((worker.video_clock - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_frames_before_seek_target_are_skipped() {
        let mut source = SyntheticSource::new(2.0, 10);
        let mut worker = worker_for(&source);
        worker.handle_flush(5);

        // 解码器从更早的关键帧开始吐帧
        for _ in 0..7 {
            let packet = source.read_packet().unwrap().unwrap();
            worker.decode_packet(&packet).unwrap();
        }
        assert_eq!(worker.shared.pictq.len(), 2);
        assert_eq!(worker.shared.pictq.refresh(None, 0.03, |_| {}), Some(0.5));
    }

    #[test]
    fn test_missing_timestamp_carries_clock_forward() {
        let source = SyntheticSource::new(1.0, 10);
        let mut worker = worker_for(&source);
        let frame = |timestamp, repeat_pict| FrameInfo {
            width: 2,
            height: 2,
            timestamp,
            repeat_pict,
        };

        let first = worker.synchronize_video(&frame(Some(3), 0));
        assert!((first - 0.3).abs() < 1e-9);
        let next = worker.synchronize_video(&frame(None, 0));
        assert!((next - 0.4).abs() < 1e-9);
        // 重复场：下一帧多推进半个帧间隔
        let repeated = worker.synchronize_video(&frame(None, 1));
        assert!((repeated - 0.5).abs() < 1e-9);
        let after = worker.synchronize_video(&frame(None, 0));
        assert!((after - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_flush_reaches_codec() {
        let log = CodecEventLog::default();
        let mut source = SyntheticSource::new(1.0, 10).with_event_log(log.clone());
        let mut worker = worker_for(&source);
        let packet = source.read_packet().unwrap().unwrap();
        worker.decode_packet(&packet).unwrap();
        worker.handle_flush(0);

        let events = log.lock().clone();
        assert_eq!(events, vec![CodecEvent::Packet { pts: Some(0) }, CodecEvent::Flush]);
    }

    #[test]
    fn test_decode_error_is_fatal() {
        let mut source = SyntheticSource::new(1.0, 10);
        let mut worker = worker_for(&source);
        let mut packet = source.read_packet().unwrap().unwrap();
        packet.data.clear();
        assert!(worker.decode_packet(&packet).is_err());
    }
}
