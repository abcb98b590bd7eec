use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("无法打开媒体: {0}")]
    OpenError(String),

    #[error("没有可解码的音视频流")]
    NoStreams,

    #[error("不支持的编解码器: {0}")]
    UnsupportedCodec(String),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("像素格式转换错误: {0}")]
    ConversionError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("配置解析错误: {0}")]
    ConfigParseError(#[from] serde_json::Error),

    #[error("工作线程错误: {0}")]
    WorkerError(String),

    #[error("播放会话未初始化")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, PlayerError>;
