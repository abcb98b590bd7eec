use crate::core::{
    BufferStatus, ExternalClock, MasterClock, MediaInfo, PlaybackState, PlayerConfig, PlayerError,
    Result, StreamInfo, StreamKind,
};
use crate::player::audio::{AudioDecoder, AudioFactory, AudioPacketReader, AudioStreamContext};
use crate::player::demuxer_source::{ContainerOpener, DemuxerSource, MediaInput, VideoCodec};
use crate::player::demuxer_thread::ParseThread;
use crate::player::log_ctx;
use crate::player::packet_queue::PacketQueue;
use crate::player::picture_queue::PictureQueue;
use crate::player::sink::VideoSink;
use crate::player::video_thread::VideoThread;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// 跨线程共享的标志位与队列，音频解码器也持有其中一部分
pub(crate) struct SessionHandles {
    pub quit: Arc<AtomicBool>,
    pub paused: Arc<AtomicBool>,
    pub videoq: Arc<PacketQueue>,
    pub audioq: Arc<PacketQueue>,
}

impl SessionHandles {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            quit: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            videoq: Arc::new(PacketQueue::new(config.queue_poll())),
            audioq: Arc::new(PacketQueue::new(config.queue_poll())),
        }
    }
}

/// 一个播放会话中各线程共享的状态
pub(crate) struct Shared {
    pub config: PlayerConfig,
    pub quit: Arc<AtomicBool>,
    pub paused: Arc<AtomicBool>,
    pub videoq: Arc<PacketQueue>,
    pub audioq: Arc<PacketQueue>,
    pub pictq: PictureQueue,
    pub external_clock: ExternalClock,
    pub video_stream: Option<StreamInfo>,
    pub audio_stream: Option<StreamInfo>,
    pub duration: f64,
    pub video_ended: AtomicBool,
    seek_target: Mutex<Option<f64>>,
}

impl Shared {
    #[cfg(test)]
    pub fn new(
        config: PlayerConfig,
        video_stream: Option<StreamInfo>,
        audio_stream: Option<StreamInfo>,
        duration: f64,
    ) -> Self {
        let handles = SessionHandles::new(&config);
        Self::with_handles(config, handles, video_stream, audio_stream, duration)
    }

    pub fn with_handles(
        config: PlayerConfig,
        handles: SessionHandles,
        video_stream: Option<StreamInfo>,
        audio_stream: Option<StreamInfo>,
        duration: f64,
    ) -> Self {
        Self {
            pictq: PictureQueue::new(config.picture_queue_size, config.picture_poll()),
            external_clock: ExternalClock::new(),
            quit: handles.quit,
            paused: handles.paused,
            videoq: handles.videoq,
            audioq: handles.audioq,
            video_stream,
            audio_stream,
            duration,
            video_ended: AtomicBool::new(false),
            seek_target: Mutex::new(None),
            config,
        }
    }

    /// 登记 seek 请求；解封装线程下一轮处理，期间的新请求覆盖旧请求
    /// 结束标志在同一把锁内清除，结束后 seek 可以重新开始播放
    pub fn request_seek(&self, target: f64) {
        let mut pending = self.seek_target.lock();
        *pending = Some(target);
        self.video_ended.store(false, Ordering::SeqCst);
    }

    /// 置位结束标志，有待处理的 seek 时不置位；返回是否是这次置位的
    pub fn mark_ended(&self) -> bool {
        let pending = self.seek_target.lock();
        if pending.is_some() {
            return false;
        }
        !self.video_ended.swap(true, Ordering::SeqCst)
    }

    pub fn pending_seek(&self) -> Option<f64> {
        *self.seek_target.lock()
    }

    /// 处理完 `target` 后清除请求；处理期间来了新请求则保留
    pub fn complete_seek(&self, target: f64) {
        let mut pending = self.seek_target.lock();
        if *pending == Some(target) {
            *pending = None;
        }
    }

    pub fn is_quitting(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    pub fn is_ended(&self) -> bool {
        self.video_ended.load(Ordering::SeqCst)
    }
}

/// 工作线程退出（含 panic）时置位退出标志，保证其它线程能解除阻塞
pub(crate) struct QuitGuard(Arc<AtomicBool>);

impl QuitGuard {
    pub fn new(quit: Arc<AtomicBool>) -> Self {
        Self(quit)
    }
}

impl Drop for QuitGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// 把 seek 目标限制在 [0, duration]；时长未知时只限制下界
pub fn clamp_seek_target(time: f64, duration: f64) -> f64 {
    let time = if time.is_nan() { 0.0 } else { time };
    let time = time.max(0.0);
    if duration > 0.0 {
        time.min(duration)
    } else {
        time
    }
}

/// 一次 init 到 deinit 之间的资源
struct Session {
    shared: Arc<Shared>,
    master: MasterClock,
    media_info: MediaInfo,
    audio_decoder: Option<Box<dyn AudioDecoder>>,
    parse_thread: Option<JoinHandle<Box<dyn DemuxerSource>>>,
    video_thread: Option<JoinHandle<Box<dyn VideoCodec>>>,
}

impl Session {
    /// 停止所有线程并按顺序释放资源：
    /// 先 join 全部线程，再释放解码器，最后释放容器和图像缓冲
    fn shutdown(&mut self) {
        let shared = &self.shared;
        shared.quit.store(true, Ordering::SeqCst);
        shared.videoq.flush();
        shared.audioq.flush();

        // 音频解码器自己的线程在 drop 时结束
        self.audio_decoder = None;

        let demuxer = self.parse_thread.take().and_then(|handle| match handle.join() {
            Ok(demuxer) => Some(demuxer),
            Err(_) => {
                error!("{} ❌ 解封装线程异常退出", log_ctx());
                None
            }
        });
        let codec = self.video_thread.take().and_then(|handle| match handle.join() {
            Ok(codec) => Some(codec),
            Err(_) => {
                error!("{} ❌ 视频解码线程异常退出", log_ctx());
                None
            }
        });

        drop(codec);
        drop(demuxer);
        shared.videoq.clear();
        shared.audioq.clear();
        shared.pictq.release_images();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 播放控制器
///
/// 驱动线程（渲染 / UI）周期调用 `update`，其余操作都不阻塞：
/// seek 只登记请求，由解封装线程异步处理。
pub struct VideoState {
    config: PlayerConfig,
    opener: Option<Arc<dyn ContainerOpener>>,
    audio_factory: Option<Arc<dyn AudioFactory>>,
    sink: Option<Box<dyn VideoSink>>,
    session: Option<Session>,
    state: PlaybackState,
}

impl VideoState {
    pub fn new(config: PlayerConfig) -> Self {
        #[cfg(feature = "ffmpeg")]
        let opener: Option<Arc<dyn ContainerOpener>> = Some(Arc::new(crate::player::demuxer::FfmpegOpener));
        #[cfg(not(feature = "ffmpeg"))]
        let opener: Option<Arc<dyn ContainerOpener>> = None;

        Self {
            config,
            opener,
            audio_factory: None,
            sink: None,
            session: None,
            state: PlaybackState::Uninitialized,
        }
    }

    /// 替换容器解析器（测试图样、自定义格式等）
    pub fn with_opener(mut self, opener: Arc<dyn ContainerOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    /// 注入音频解码器工厂，需在 `init` 之前调用
    pub fn set_audio_factory(&mut self, factory: Arc<dyn AudioFactory>) {
        self.audio_factory = Some(factory);
    }

    pub fn set_video_sink(&mut self, sink: Box<dyn VideoSink>) {
        self.sink = Some(sink);
    }

    /// 从字节流打开容器并启动播放线程
    pub fn init(&mut self, input: Box<dyn MediaInput>, name: &str) -> Result<()> {
        let opener = self
            .opener
            .clone()
            .ok_or_else(|| PlayerError::OpenError(format!("{}: 没有可用的容器解析器", name)))?;
        info!("📂 打开媒体: {}", name);
        let demuxer = opener.open(input, name)?;
        self.attach_demuxer(demuxer)
    }

    /// 用已打开的容器建立会话
    pub fn attach_demuxer(&mut self, demuxer: Box<dyn DemuxerSource>) -> Result<()> {
        if self.session.is_some() {
            self.deinit();
        }
        self.config.validate()?;

        let description = demuxer.description();
        let media_info = demuxer.media_info();
        let duration = demuxer.duration();
        let handles = SessionHandles::new(&self.config);

        let mut audio_stream = demuxer.streams().iter().find(|s| s.kind == StreamKind::Audio).cloned();
        let mut video_stream = demuxer.streams().iter().find(|s| s.kind == StreamKind::Video).cloned();

        let audio_decoder = match (&audio_stream, &self.audio_factory) {
            (Some(stream), Some(factory)) => {
                let context = AudioStreamContext::new(
                    stream.clone(),
                    AudioPacketReader::new(handles.audioq.clone(), handles.quit.clone()),
                    handles.paused.clone(),
                );
                match factory.create_decoder(context) {
                    Ok(decoder) => {
                        info!("🔊 音频流 #{} ({}) 已打开", stream.index, stream.codec_name);
                        Some(decoder)
                    }
                    Err(e) => {
                        warn!("⚠ 音频解码器创建失败，禁用音频: {}", e);
                        None
                    }
                }
            }
            (Some(_), None) => {
                warn!("⚠ 未设置音频解码器工厂，禁用音频");
                None
            }
            (None, _) => None,
        };
        if audio_decoder.is_none() {
            audio_stream = None;
        }

        let codec = match &video_stream {
            Some(stream) => match demuxer.open_video_codec(stream.index) {
                Ok(codec) => {
                    info!(
                        "🎬 视频流 #{} ({} {}x{}) 已打开",
                        stream.index, stream.codec_name, stream.width, stream.height
                    );
                    Some(codec)
                }
                Err(e) => {
                    warn!("⚠ 视频解码器打开失败: {}", e);
                    None
                }
            },
            None => None,
        };
        if codec.is_none() {
            video_stream = None;
        }

        if video_stream.is_none() && audio_stream.is_none() {
            error!("❌ {} 中没有可解码的音视频流", description);
            return Err(PlayerError::NoStreams);
        }

        let master = MasterClock::select(self.config.sync_mode, video_stream.is_some(), audio_stream.is_some());
        let shared = Arc::new(Shared::with_handles(
            self.config.clone(),
            handles,
            video_stream,
            audio_stream,
            duration,
        ));
        shared.external_clock.set(0);

        let mut session = Session {
            shared: shared.clone(),
            master,
            media_info,
            audio_decoder,
            parse_thread: None,
            video_thread: None,
        };

        // 失败时 session 被 drop，已启动的线程随之停止
        if let Some(codec) = codec {
            session.video_thread = Some(VideoThread::spawn(shared.clone(), codec)?);
        }
        session.parse_thread = Some(ParseThread::spawn(shared, demuxer)?);

        info!(
            "{} ✅ 播放会话已建立: {} (时长 {:.2}s, 主时钟 {:?})",
            log_ctx(),
            description,
            duration,
            master
        );
        self.session = Some(session);
        self.state = PlaybackState::Open;
        Ok(())
    }

    /// 驱动一步：按主时钟从环形缓冲取帧显示。返回 false 表示播放已结束
    pub fn update(&mut self) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        let shared = &session.shared;

        if self.state == PlaybackState::Open {
            self.state = PlaybackState::Playing;
        }

        if !shared.paused.load(Ordering::SeqCst) {
            let master = match session.master {
                MasterClock::Video => None,
                MasterClock::Audio => Some(
                    session
                        .audio_decoder
                        .as_ref()
                        .map(|decoder| decoder.audio_clock())
                        .unwrap_or(0.0),
                ),
                MasterClock::External => Some(shared.external_clock.seconds()),
            };

            let sink = &mut self.sink;
            shared.pictq.refresh(master, shared.config.display_threshold, |image| {
                if let Some(sink) = sink.as_deref_mut() {
                    sink.display(image);
                }
            });
        }

        !(shared.is_ended() || shared.is_quitting())
    }

    /// 异步 seek（秒），目标会被限制在 [0, duration]
    pub fn seek_to(&mut self, time: f64) {
        let Some(session) = self.session.as_ref() else {
            warn!("⚠ 播放会话未初始化，忽略 seek");
            return;
        };
        let target = clamp_seek_target(time, session.shared.duration);
        info!("⏩ 请求 Seek: {:.3}s (原始 {:.3}s)", target, time);
        session.shared.request_seek(target);
    }

    pub fn set_paused(&mut self, paused: bool) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.shared.paused.store(paused, Ordering::SeqCst);
        session.shared.external_clock.set_paused(paused);
        if let Some(decoder) = session.audio_decoder.as_mut() {
            decoder.set_paused(paused);
        }
        self.state = if paused { PlaybackState::Paused } else { PlaybackState::Playing };
        info!("{} 播放", if paused { "⏸ 暂停" } else { "▶ 继续" });
    }

    /// 总时长（秒），未初始化时为 0
    pub fn duration(&self) -> f64 {
        self.session.as_ref().map(|s| s.shared.duration).unwrap_or(0.0)
    }

    /// 当前视频位置：最近显示帧的时间戳
    pub fn position(&self) -> f64 {
        self.session.as_ref().map(|s| s.shared.pictq.frame_last_pts()).unwrap_or(0.0)
    }

    /// 停止所有线程并释放会话资源；可重复调用
    pub fn deinit(&mut self) {
        if let Some(mut session) = self.session.take() {
            info!("🛑 关闭播放会话");
            session.shutdown();
            if let Some(sink) = self.sink.as_deref_mut() {
                sink.release();
            }
            self.state = PlaybackState::Closed;
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn master_clock(&self) -> Option<MasterClock> {
        self.session.as_ref().map(|s| s.master)
    }

    pub fn media_info(&self) -> Option<&MediaInfo> {
        self.session.as_ref().map(|s| &s.media_info)
    }

    pub fn buffer_status(&self) -> BufferStatus {
        match &self.session {
            Some(session) => {
                let shared = &session.shared;
                BufferStatus {
                    video_packets: shared.videoq.len(),
                    video_bytes: shared.videoq.byte_size(),
                    audio_packets: shared.audioq.len(),
                    audio_bytes: shared.audioq.byte_size(),
                    video_frames: shared.pictq.len(),
                }
            }
            None => BufferStatus::default(),
        }
    }

    /// 是否还有未被解封装线程处理的 seek 请求
    pub fn seek_pending(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.shared.pending_seek().is_some())
            .unwrap_or(false)
    }

    pub fn is_ended(&self) -> bool {
        self.session.as_ref().map(|s| s.shared.is_ended()).unwrap_or(false)
    }
}

impl Drop for VideoState {
    fn drop(&mut self) {
        self.deinit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::synthetic::{SyntheticOpener, SyntheticSource};
    use std::io::Cursor;

    #[test]
    fn test_clamp_seek_target() {
        assert_eq!(clamp_seek_target(-5.0, 2.0), 0.0);
        assert_eq!(clamp_seek_target(102.0, 2.0), 2.0);
        assert_eq!(clamp_seek_target(1.5, 2.0), 1.5);
        assert_eq!(clamp_seek_target(7.0, 0.0), 7.0);
        assert_eq!(clamp_seek_target(f64::NAN, 2.0), 0.0);
        assert_eq!(clamp_seek_target(f64::INFINITY, 2.0), 2.0);
        assert_eq!(clamp_seek_target(f64::NEG_INFINITY, 2.0), 0.0);
    }

    #[test]
    fn test_quit_guard_sets_flag_on_panic() {
        let quit = Arc::new(AtomicBool::new(false));
        let flag = quit.clone();
        let result = std::thread::spawn(move || {
            let _guard = QuitGuard::new(flag);
            panic!("worker failure");
        })
        .join();
        assert!(result.is_err());
        assert!(quit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_update_before_init() {
        let mut state = VideoState::new(PlayerConfig::default());
        assert!(!state.update());
        assert_eq!(state.state(), PlaybackState::Uninitialized);
        assert_eq!(state.duration(), 0.0);
        state.seek_to(1.0);
        assert!(!state.seek_pending());
    }

    #[test]
    fn test_init_through_opener() {
        let source = SyntheticSource::new(1.0, 10).with_size(4, 2);
        let mut state =
            VideoState::new(PlayerConfig::default()).with_opener(Arc::new(SyntheticOpener::new(source)));
        state.init(Box::new(Cursor::new(Vec::new())), "pattern").unwrap();

        assert_eq!(state.state(), PlaybackState::Open);
        assert_eq!(state.master_clock(), Some(MasterClock::Video));
        assert_eq!(state.duration(), 1.0);
        let info = state.media_info().unwrap();
        assert_eq!((info.width, info.height), (4, 2));
        assert_eq!(info.fps, 10.0);

        assert!(state.update());
        assert_eq!(state.state(), PlaybackState::Playing);

        state.deinit();
        assert_eq!(state.state(), PlaybackState::Closed);
        assert!(!state.update());
        // 重复关闭无副作用
        state.deinit();
    }

    #[test]
    fn test_invalid_config_rejected_at_init() {
        let config = PlayerConfig {
            picture_queue_size: 0,
            ..PlayerConfig::default()
        };
        let mut state = VideoState::new(config);
        let err = state.attach_demuxer(Box::new(SyntheticSource::new(1.0, 10))).unwrap_err();
        assert!(matches!(err, PlayerError::ConfigError(_)));
        assert_eq!(state.state(), PlaybackState::Uninitialized);
    }

    #[test]
    fn test_external_master_when_forced() {
        let config = PlayerConfig {
            sync_mode: crate::core::SyncMode::External,
            ..PlayerConfig::default()
        };
        let mut state = VideoState::new(config);
        state.attach_demuxer(Box::new(SyntheticSource::new(1.0, 10))).unwrap();
        assert_eq!(state.master_clock(), Some(MasterClock::External));
    }
}
