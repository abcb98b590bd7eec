use crate::core::{FrameInfo, MediaPacket, PlayerError, Result, RgbaImage};
use crate::player::demuxer_source::VideoCodec;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, software, util};
use log::debug;

/// 软件视频解码器 + RGBA 转换
pub struct SoftwareVideoDecoder {
    decoder: codec::decoder::Video,
    frame: util::frame::Video,
    rgba_frame: util::frame::Video,
    scaler: Option<software::scaling::Context>,
    /// 当前 scaler 对应的源格式与尺寸
    scaler_source: Option<(util::format::Pixel, u32, u32)>,
}

// SwsContext 本身不是 Send，但每个解码器实例只在解码线程中使用
unsafe impl Send for SoftwareVideoDecoder {}

impl SoftwareVideoDecoder {
    /// 从视频流创建软件解码器
    pub fn from_stream(stream: format::stream::Stream) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| PlayerError::UnsupportedCodec(format!("{:?}: {}", stream.parameters().id(), e)))?;

        debug!(
            "软件解码器: {}x{}, 格式: {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self {
            decoder,
            frame: util::frame::Video::empty(),
            rgba_frame: util::frame::Video::empty(),
            scaler: None,
            scaler_source: None,
        })
    }
}

impl VideoCodec for SoftwareVideoDecoder {
    fn send_packet(&mut self, packet: &MediaPacket) -> Result<()> {
        let mut av_packet = ffmpeg::Packet::copy(&packet.data);
        av_packet.set_pts(packet.pts);
        av_packet.set_dts(packet.dts);
        av_packet.set_duration(packet.duration);

        match self.decoder.send_packet(&av_packet) {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Eof) => {
                debug!("视频解码器收到 EOF（send_packet），忽略本次包");
                Ok(())
            }
            Err(e) => Err(PlayerError::DecodeError(e.to_string())),
        }
    }

    fn receive_frame(&mut self) -> Result<Option<FrameInfo>> {
        match self.decoder.receive_frame(&mut self.frame) {
            Ok(()) => Ok(Some(FrameInfo {
                width: self.frame.width(),
                height: self.frame.height(),
                timestamp: self.frame.timestamp(),
                repeat_pict: self.frame.repeat() as i32,
            })),
            Err(ffmpeg::Error::Other { errno: 11 }) => Ok(None), // EAGAIN
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(PlayerError::DecodeError(e.to_string())),
        }
    }

    fn convert_frame(&mut self, target: &mut RgbaImage) -> Result<()> {
        let width = self.frame.width();
        let height = self.frame.height();
        let source = (self.frame.format(), width, height);

        // 源尺寸或格式变化时重建 scaler（YUV -> RGBA）
        if self.scaler.is_none() || self.scaler_source != Some(source) {
            debug!("重建像素格式转换: {:?} {}x{}", source.0, width, height);
            let scaler = software::scaling::Context::get(
                source.0,
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| PlayerError::ConversionError(e.to_string()))?;
            self.scaler = Some(scaler);
            self.scaler_source = Some(source);
        }

        let Some(scaler) = self.scaler.as_mut() else {
            return Err(PlayerError::ConversionError("像素格式转换未初始化".to_string()));
        };
        scaler
            .run(&self.frame, &mut self.rgba_frame)
            .map_err(|e| PlayerError::ConversionError(e.to_string()))?;

        // 按行拷贝（源 stride 可能带填充）
        target.set_dimensions(width, height);
        let row_size = target.stride();
        let stride = self.rgba_frame.stride(0);
        let frame_data = self.rgba_frame.data(0);
        for y in 0..height as usize {
            let src_offset = y * stride;
            let dst_offset = y * row_size;
            target.data[dst_offset..dst_offset + row_size]
                .copy_from_slice(&frame_data[src_offset..src_offset + row_size]);
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}
