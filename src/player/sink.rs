use crate::core::{VideoFrame, VideoImage};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use log::debug;

/// 渲染端：每次成功消费一帧时收到该帧的图像描述
///
/// 图像数据借用自环形缓冲，需要保留就自行拷贝。
pub trait VideoSink: Send {
    fn display(&mut self, image: VideoImage<'_>);

    /// 会话关闭时调用，释放纹理等渲染资源
    fn release(&mut self) {}
}

/// 把显示的帧拷贝后发送到通道，供其它线程（UI / 测试）消费
pub struct ChannelSink {
    tx: Sender<VideoFrame>,
}

impl ChannelSink {
    pub fn unbounded() -> (Self, Receiver<VideoFrame>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    /// 有界通道：接收端跟不上时丢帧，不阻塞驱动线程
    pub fn bounded(capacity: usize) -> (Self, Receiver<VideoFrame>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl VideoSink for ChannelSink {
    fn display(&mut self, image: VideoImage<'_>) {
        match self.tx.try_send(VideoFrame::from(image)) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                debug!("渲染通道已满，丢弃帧 pts={:.3}", frame.pts);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PixelFormat;

    fn image(pts: f64, data: &[u8]) -> VideoImage<'_> {
        VideoImage {
            pts,
            width: 1,
            height: 1,
            format: PixelFormat::RGBA,
            data,
        }
    }

    #[test]
    fn test_channel_sink_copies_frames() {
        let (mut sink, rx) = ChannelSink::unbounded();
        let pixels = [1u8, 2, 3, 4];
        sink.display(image(0.5, &pixels));
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.pts, 0.5);
        assert_eq!(frame.data, pixels.to_vec());
    }

    #[test]
    fn test_bounded_sink_drops_when_full() {
        let (mut sink, rx) = ChannelSink::bounded(1);
        let pixels = [0u8; 4];
        sink.display(image(0.0, &pixels));
        sink.display(image(0.1, &pixels));
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.try_recv().unwrap().pts, 0.0);
    }
}
