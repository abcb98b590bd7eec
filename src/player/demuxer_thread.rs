use crate::core::{MediaPacket, PlayerError, QueuedPacket, Rational, Result};
use crate::player::demuxer_source::DemuxerSource;
use crate::player::log_ctx;
use crate::player::video_state::{QuitGuard, Shared};
use log::{debug, error, info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

// 日志采样：前 N 个包和之后每 100 个包打印一次
const LOG_FIRST_N: usize = 5;

/// 解封装线程
///
/// 独占容器上下文：处理 seek 请求、按队列上限限流、读包并按流分发。
/// 线程结束时把 Demuxer 交还给 join 方，由会话统一释放。
pub(crate) struct ParseThread<'a> {
    shared: &'a Shared,
    demuxer: &'a mut dyn DemuxerSource,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    read_failed: bool,
    video_packet_count: usize,
    audio_packet_count: usize,
}

impl<'a> ParseThread<'a> {
    pub fn spawn(
        shared: Arc<Shared>,
        mut demuxer: Box<dyn DemuxerSource>,
    ) -> Result<JoinHandle<Box<dyn DemuxerSource>>> {
        thread::Builder::new()
            .name("demux".to_string())
            .spawn(move || {
                // 无论正常结束、出错还是 panic，都通知其它线程退出
                let _guard = QuitGuard::new(shared.quit.clone());
                let mut parser = ParseThread::new(&shared, demuxer.as_mut());
                if let Err(e) = parser.run() {
                    error!("{} ❌ 播放视频时出错: {}", log_ctx(), e);
                }
                demuxer
            })
            .map_err(|e| PlayerError::WorkerError(format!("无法启动解封装线程: {}", e)))
    }

    fn new(shared: &'a Shared, demuxer: &'a mut dyn DemuxerSource) -> Self {
        Self {
            video_index: shared.video_stream.as_ref().map(|s| s.index),
            audio_index: shared.audio_stream.as_ref().map(|s| s.index),
            shared,
            demuxer,
            read_failed: false,
            video_packet_count: 0,
            audio_packet_count: 0,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        if self.video_index.is_none() && self.audio_index.is_none() {
            return Err(PlayerError::NoStreams);
        }

        info!("{} 🎬 Demuxer 线程启动: {}", log_ctx(), self.demuxer.description());
        let shared = self.shared;
        let config = &shared.config;

        while !shared.is_quitting() {
            if let Some(target) = shared.pending_seek() {
                self.apply_seek(target);
            }

            // 队列超过上限：等消费者取走一些再读，防止内存无限增长
            if self.audio_index.is_some() && shared.audioq.byte_size() > config.audio_queue_limit {
                shared
                    .audioq
                    .wait_for_space(config.audio_queue_limit, config.backpressure_wait());
                continue;
            }
            if self.video_index.is_some() && shared.videoq.byte_size() > config.video_queue_limit {
                shared
                    .videoq
                    .wait_for_space(config.video_queue_limit, config.backpressure_wait());
                continue;
            }

            match self.demuxer.read_packet() {
                Ok(Some(packet)) => {
                    self.read_failed = false;
                    shared.video_ended.store(false, Ordering::SeqCst);
                    self.route(packet);
                }
                Ok(None) => {
                    if !self.read_failed {
                        info!("{} 📄 Demuxer 到达文件末尾，等待缓冲播放完毕", log_ctx());
                    }
                    self.on_read_failure();
                }
                Err(e) => {
                    if !self.read_failed {
                        warn!("{} ⚠ 读取包失败: {}", log_ctx(), e);
                    }
                    self.on_read_failure();
                }
            }
        }

        info!(
            "{} 🛑 Demuxer 线程退出（共读取 {} 视频包，{} 音频包）",
            log_ctx(),
            self.video_packet_count,
            self.audio_packet_count
        );
        Ok(())
    }

    fn route(&mut self, packet: MediaPacket) {
        let index = packet.stream_index;
        if Some(index) == self.video_index {
            self.video_packet_count += 1;
            if self.video_packet_count <= LOG_FIRST_N || self.video_packet_count % 100 == 0 {
                debug!("{} 📦 Demuxer 读取视频包 #{}", log_ctx(), self.video_packet_count);
            }
            self.shared.videoq.put(QueuedPacket::Data(packet));
        } else if Some(index) == self.audio_index {
            self.audio_packet_count += 1;
            if self.audio_packet_count <= LOG_FIRST_N || self.audio_packet_count % 100 == 0 {
                debug!("{} 🔊 Demuxer 读取音频包 #{}", log_ctx(), self.audio_packet_count);
            }
            self.shared.audioq.put(QueuedPacket::Data(packet));
        }
        // 其它流的包直接丢弃
    }

    /// 读不到包时：所有缓冲都放空了才算播放结束，然后继续轮询
    fn on_read_failure(&mut self) {
        self.read_failed = true;
        if self.shared.videoq.is_idle()
            && self.shared.audioq.is_idle()
            && self.shared.pictq.is_empty()
            && self.shared.mark_ended()
        {
            info!("{} ✅ 播放结束", log_ctx());
        }
        thread::sleep(self.shared.config.eof_poll());
    }

    fn apply_seek(&mut self, target: f64) {
        let seek_us = (target * 1_000_000.0) as i64;
        info!("{} ⏩ Demuxer 线程处理 Seek: {:.3}s", log_ctx(), target);

        // 向后偏向：落在目标之前的关键帧上，之后正常解码即可
        match self.demuxer.seek(seek_us) {
            Err(e) => {
                warn!("{} ❌ Seek 失败 {}: {}", log_ctx(), self.demuxer.description(), e);
            }
            Ok(()) => {
                // 清空包队列，放入携带新时间基准的 flush 标记
                if let Some(audio) = &self.shared.audio_stream {
                    self.shared.audioq.clear();
                    self.shared.audioq.put(QueuedPacket::Flush {
                        pts: audio.time_base.rescale(seek_us, Rational::MICROS),
                    });
                }
                if let Some(video) = &self.shared.video_stream {
                    self.shared.videoq.clear();
                    // 先挡住旧帧再放标记，解码线程处理标记时解除
                    self.shared.pictq.clear(true);
                    self.shared.videoq.put(QueuedPacket::Flush {
                        pts: video.time_base.rescale(seek_us, Rational::MICROS),
                    });
                } else {
                    self.shared.pictq.clear(false);
                }
                self.shared.external_clock.set(seek_us.max(0) as u64);
                self.shared.video_ended.store(false, Ordering::SeqCst);
                self.read_failed = false;
            }
        }
        self.shared.complete_seek(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PlayerConfig, StreamKind};
    use crate::player::packet_queue::QueueGet;
    use crate::player::synthetic::SyntheticSource;
    use std::sync::atomic::AtomicBool;

    fn shared_for(source: &SyntheticSource, config: PlayerConfig) -> Arc<Shared> {
        let video = source.streams().iter().find(|s| s.kind == StreamKind::Video).cloned();
        let audio = source.streams().iter().find(|s| s.kind == StreamKind::Audio).cloned();
        Arc::new(Shared::new(config, video, audio, source.duration()))
    }

    fn drain(shared: &Shared, audio: bool) -> Vec<QueuedPacket> {
        let quit = AtomicBool::new(false);
        let queue = if audio { &shared.audioq } else { &shared.videoq };
        let mut out = Vec::new();
        while !queue.is_empty() {
            if let QueueGet::Packet(p) = queue.get(&quit) {
                out.push(p);
            }
        }
        out
    }

    #[test]
    fn test_seek_injects_one_flush_per_queue() {
        let mut source = SyntheticSource::new(2.0, 10).with_audio();
        let shared = shared_for(&source, PlayerConfig::default());
        let mut parser = ParseThread::new(&shared, &mut source);

        for _ in 0..6 {
            let packet = parser.demuxer.read_packet().unwrap().unwrap();
            parser.route(packet);
        }
        assert_eq!(shared.videoq.len(), 3);
        assert_eq!(shared.audioq.len(), 3);

        shared.request_seek(1.0);
        parser.apply_seek(1.0);
        assert!(shared.pending_seek().is_none());

        let video = drain(&shared, false);
        assert_eq!(video.len(), 1);
        assert!(matches!(video[0], QueuedPacket::Flush { pts: 10 }));

        let audio = drain(&shared, true);
        assert_eq!(audio.len(), 1);
        assert!(matches!(audio[0], QueuedPacket::Flush { pts: 1000 }));

        let next = parser.demuxer.read_packet().unwrap().unwrap();
        assert_eq!(next.pts, Some(10));
        let external = shared.external_clock.seconds();
        assert!((1.0..1.5).contains(&external), "external = {}", external);
    }

    #[test]
    fn test_failed_seek_keeps_queues() {
        let mut source = SyntheticSource::new(1.0, 10).with_failing_seek();
        let shared = shared_for(&source, PlayerConfig::default());
        let mut parser = ParseThread::new(&shared, &mut source);
        let packet = parser.demuxer.read_packet().unwrap().unwrap();
        parser.route(packet);

        shared.request_seek(0.5);
        parser.apply_seek(0.5);
        assert_eq!(shared.videoq.len(), 1);
        assert!(shared.pending_seek().is_none());
    }

    #[test]
    fn test_newer_seek_request_survives() {
        let mut source = SyntheticSource::new(2.0, 10);
        let shared = shared_for(&source, PlayerConfig::default());
        let mut parser = ParseThread::new(&shared, &mut source);
        shared.request_seek(0.5);
        let target = shared.pending_seek().unwrap();
        shared.request_seek(1.5);
        parser.apply_seek(target);
        assert_eq!(shared.pending_seek(), Some(1.5));
    }

    #[test]
    fn test_seek_after_end_restarts_playback() {
        let mut source = SyntheticSource::new(0.2, 10);
        let shared = shared_for(&source, PlayerConfig::default());
        let mut parser = ParseThread::new(&shared, &mut source);
        // 队列与图像环都为空
        parser.on_read_failure();
        assert!(shared.is_ended());

        shared.request_seek(0.1);
        assert!(!shared.is_ended());
        // 请求挂起期间再次读失败也不能判定结束
        parser.on_read_failure();
        assert!(!shared.is_ended());

        shared.video_ended.store(true, Ordering::SeqCst);
        parser.apply_seek(0.1);
        assert!(!shared.is_ended());
        assert!(shared.pending_seek().is_none());
    }

    #[test]
    fn test_unselected_streams_are_discarded() {
        let mut source = SyntheticSource::new(1.0, 10).with_audio();
        let video = source.streams()[0].clone();
        let shared = Arc::new(Shared::new(PlayerConfig::default(), Some(video), None, 1.0));
        let mut parser = ParseThread::new(&shared, &mut source);
        for _ in 0..4 {
            let packet = parser.demuxer.read_packet().unwrap().unwrap();
            parser.route(packet);
        }
        assert_eq!(shared.videoq.len(), 2);
        assert_eq!(shared.audioq.len(), 0);
    }

    #[test]
    fn test_no_streams_is_fatal() {
        let mut source = SyntheticSource::new(1.0, 10);
        let shared = Arc::new(Shared::new(PlayerConfig::default(), None, None, 1.0));
        let mut parser = ParseThread::new(&shared, &mut source);
        assert!(matches!(parser.run(), Err(PlayerError::NoStreams)));
    }
}
