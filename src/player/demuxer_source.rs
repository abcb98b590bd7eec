use crate::core::{FrameInfo, MediaInfo, MediaPacket, Result, RgbaImage, StreamInfo, StreamKind};
use std::io::{Read, Seek};

/// 可 seek 的只读字节流（写入不支持）
pub trait MediaInput: Read + Seek + Send {}

impl<T: Read + Seek + Send> MediaInput for T {}

/// Demuxer 数据源抽象接口
///
/// 容器层的实现（FFmpeg、测试图样等）都实现这个 trait。
/// 实例归解封装线程独占。
pub trait DemuxerSource: Send {
    /// 容器中所有流，下标即 stream_index
    fn streams(&self) -> &[StreamInfo];

    /// 读取下一个媒体包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误
    fn read_packet(&mut self) -> Result<Option<MediaPacket>>;

    /// Seek 到指定位置（微秒），落点不晚于目标时间
    fn seek(&mut self, timestamp_us: i64) -> Result<()>;

    /// 总时长（秒）
    fn duration(&self) -> f64;

    /// 为指定视频流创建解码器
    fn open_video_codec(&self, stream_index: usize) -> Result<Box<dyn VideoCodec>>;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;

    /// 获取媒体信息
    fn media_info(&self) -> MediaInfo {
        let mut info = MediaInfo {
            duration: self.duration(),
            ..MediaInfo::default()
        };
        if let Some(video) = self.streams().iter().find(|s| s.kind == StreamKind::Video) {
            info.width = video.width;
            info.height = video.height;
            info.fps = if video.frame_rate.is_valid() {
                video.frame_rate.to_f64()
            } else {
                0.0
            };
            info.video_codec = video.codec_name.clone();
        }
        if let Some(audio) = self.streams().iter().find(|s| s.kind == StreamKind::Audio) {
            info.audio_codec = audio.codec_name.clone();
            info.sample_rate = audio.sample_rate;
            info.channels = audio.channels;
        }
        info
    }
}

/// 视频解码器 + 像素格式转换
///
/// 调用约定：`send_packet` 之后反复 `receive_frame` 直到返回 None；
/// `convert_frame` 转换最近一次收到的帧。实例归视频解码线程独占。
pub trait VideoCodec: Send {
    fn send_packet(&mut self, packet: &MediaPacket) -> Result<()>;

    fn receive_frame(&mut self) -> Result<Option<FrameInfo>>;

    /// 把最近收到的帧转换为 RGBA；源尺寸或格式变化时重建转换上下文
    fn convert_frame(&mut self, target: &mut RgbaImage) -> Result<()>;

    /// 丢弃解码器内部缓存的帧（seek 后）
    fn flush(&mut self);
}

/// 根据输入流创建 Demuxer
pub trait ContainerOpener: Send + Sync {
    fn open(&self, input: Box<dyn MediaInput>, name: &str) -> Result<Box<dyn DemuxerSource>>;
}
