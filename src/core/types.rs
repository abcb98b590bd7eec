use serde::{Deserialize, Serialize};

/// 时间基（分数），与容器里的 time_base 含义相同
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 微秒时间基（AV_TIME_BASE_Q）
    pub const MICROS: Rational = Rational::new(1, 1_000_000);

    /// 转为浮点（分母为 0 时返回 0）
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    pub fn is_valid(self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// 把以 `from` 为单位的时间戳换算到当前时间基，四舍五入
    pub fn rescale(self, value: i64, from: Rational) -> i64 {
        if !self.is_valid() || !from.is_valid() {
            return value;
        }
        let num = value as i128 * from.num as i128 * self.den as i128;
        let den = from.den as i128 * self.num as i128;
        let half = den / 2;
        let rounded = if num >= 0 { (num + half) / den } else { (num - half) / den };
        rounded as i64
    }

    /// 以当前时间基表示的时间戳 → 秒
    pub fn ticks_to_secs(self, ticks: i64) -> f64 {
        ticks as f64 * self.to_f64()
    }
}

/// 媒体流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

/// 容器中单条流的描述
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub time_base: Rational,
    /// 平均帧率，未知时为 0/0
    pub frame_rate: Rational,
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamInfo {
    /// 标称帧间隔（秒）：优先用帧率，帧率未知时退回时间基
    pub fn frame_duration(&self) -> f64 {
        if self.frame_rate.is_valid() {
            self.frame_rate.den as f64 / self.frame_rate.num as f64
        } else {
            self.time_base.to_f64()
        }
    }
}

/// 解封装得到的压缩数据包
#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub data: Vec<u8>,
}

impl MediaPacket {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// 包队列中的元素：真实数据包，或 seek 后注入的 flush 标记
///
/// flush 标记自带新的基准时间戳（以所属流的时间基表示），每个队列各持一份。
#[derive(Debug, Clone)]
pub enum QueuedPacket {
    Data(MediaPacket),
    Flush { pts: i64 },
}

impl QueuedPacket {
    pub fn size(&self) -> usize {
        match self {
            QueuedPacket::Data(packet) => packet.size(),
            QueuedPacket::Flush { .. } => 0,
        }
    }

    pub fn is_flush(&self) -> bool {
        matches!(self, QueuedPacket::Flush { .. })
    }
}

/// 解码器吐出的一帧的元信息（像素数据留在解码器内部，按需转换）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    /// best-effort 时间戳（流时间基）
    pub timestamp: Option<i64>,
    /// 重复场计数（repeat_pict）
    pub repeat_pict: i32,
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
}

/// 可直接显示的 RGBA 图像缓冲，尺寸不变时复用内存
#[derive(Debug, Clone, Default)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbaImage {
    /// 调整尺寸；只有尺寸变化时才重新分配
    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        if self.width == width && self.height == height && !self.data.is_empty() {
            return;
        }
        self.width = width;
        self.height = height;
        self.data = vec![0u8; width as usize * height as usize * 4];
    }

    pub fn stride(&self) -> usize {
        self.width as usize * 4
    }

    pub fn is_allocated(&self) -> bool {
        !self.data.is_empty()
    }
}

/// 交给渲染端的图像描述（借用环形缓冲区里的数据）
#[derive(Debug, Clone, Copy)]
pub struct VideoImage<'a> {
    pub pts: f64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

/// 视频帧数据（渲染端拷贝出来的独立副本）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFrame {
    pub pts: f64,           // 显示时间戳（秒）
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl From<VideoImage<'_>> for VideoFrame {
    fn from(image: VideoImage<'_>) -> Self {
        Self {
            pts: image.pts,
            width: image.width,
            height: image.height,
            format: image.format,
            data: image.data.to_vec(),
        }
    }
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Uninitialized,
    Open,
    Playing,
    Paused,
    Closed,
}

/// 媒体信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: f64,          // 总时长（秒）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// 缓冲状态信息（用于监控和调试）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStatus {
    /// 视频数据包队列长度
    pub video_packets: usize,

    /// 视频数据包队列字节数
    pub video_bytes: usize,

    /// 音频数据包队列长度
    pub audio_packets: usize,

    /// 音频数据包队列字节数
    pub audio_bytes: usize,

    /// 待显示的视频帧数
    pub video_frames: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_micros_to_stream() {
        let tb = Rational::new(1, 10);
        assert_eq!(tb.rescale(1_000_000, Rational::MICROS), 10);
        assert_eq!(tb.rescale(1_049_999, Rational::MICROS), 10);
        assert_eq!(Rational::new(1, 90_000).rescale(500_000, Rational::MICROS), 45_000);
    }

    #[test]
    fn test_frame_duration_falls_back_to_time_base() {
        let mut info = StreamInfo {
            index: 0,
            kind: StreamKind::Video,
            time_base: Rational::new(1, 25),
            frame_rate: Rational::new(0, 0),
            codec_name: String::new(),
            width: 0,
            height: 0,
            sample_rate: 0,
            channels: 0,
        };
        assert!((info.frame_duration() - 0.04).abs() < 1e-9);
        info.frame_rate = Rational::new(30000, 1001);
        assert!((info.frame_duration() - 1001.0 / 30000.0).abs() < 1e-9);
    }

    #[test]
    fn test_image_reallocates_only_on_resize() {
        let mut image = RgbaImage::default();
        image.set_dimensions(4, 2);
        assert_eq!(image.data.len(), 32);
        image.data[0] = 7;
        image.set_dimensions(4, 2);
        assert_eq!(image.data[0], 7);
        image.set_dimensions(2, 2);
        assert_eq!(image.data.len(), 16);
        assert_eq!(image.data[0], 0);
    }
}
