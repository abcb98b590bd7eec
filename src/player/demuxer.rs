use crate::core::{MediaPacket, PlayerError, Rational, Result, StreamInfo, StreamKind};
use crate::player::decoder::SoftwareVideoDecoder;
use crate::player::demuxer_source::{ContainerOpener, DemuxerSource, MediaInput, VideoCodec};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, ffi, format, media};
use log::{debug, info};
use std::ffi::{c_int, c_void, CString};
use std::io::SeekFrom;
use std::mem::ManuallyDrop;
use std::ptr;

const AVIO_BUFFER_SIZE: usize = 32 * 1024;

/// AVIO 读回调：从宿主字节流读取
unsafe extern "C" fn read_input(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    let input = &mut *(opaque as *mut Box<dyn MediaInput>);
    let slice = std::slice::from_raw_parts_mut(buf, buf_size.max(0) as usize);
    match input.read(slice) {
        Ok(0) => ffi::AVERROR_EOF,
        Ok(n) => n as c_int,
        Err(_) => ffi::AVERROR_EXTERNAL,
    }
}

/// AVIO seek 回调，支持 AVSEEK_SIZE 查询总长度
unsafe extern "C" fn seek_input(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    let input = &mut *(opaque as *mut Box<dyn MediaInput>);

    if whence & ffi::AVSEEK_SIZE as c_int != 0 {
        let Ok(current) = input.stream_position() else {
            return -1;
        };
        let size = input.seek(SeekFrom::End(0));
        if input.seek(SeekFrom::Start(current)).is_err() {
            return -1;
        }
        return size.map(|s| s as i64).unwrap_or(-1);
    }

    let pos = match whence & !(ffi::AVSEEK_FORCE as c_int) {
        0 => SeekFrom::Start(offset.max(0) as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    input.seek(pos).map(|p| p as i64).unwrap_or(-1)
}

/// 释放 AVIO 上下文及其缓冲（缓冲可能已被 FFmpeg 换过，要从上下文里取）
unsafe fn free_avio(mut avio: *mut ffi::AVIOContext) {
    if avio.is_null() {
        return;
    }
    ffi::av_freep(&mut (*avio).buffer as *mut *mut u8 as *mut c_void);
    ffi::avio_context_free(&mut avio);
}

/// 解封装器 - 通过自定义 AVIO 从任意字节流读取容器
pub struct Demuxer {
    input_ctx: ManuallyDrop<format::context::Input>,
    avio: *mut ffi::AVIOContext,
    opaque: *mut Box<dyn MediaInput>,
    streams: Vec<StreamInfo>,
    duration: f64,
    source_name: String,
}

// 原始指针只在持有 Demuxer 的单个线程里使用
unsafe impl Send for Demuxer {}

impl Demuxer {
    /// 打开字节流并探测流信息
    pub fn open(input: Box<dyn MediaInput>, name: &str) -> Result<Self> {
        ffmpeg::init().map_err(|e| PlayerError::OpenError(format!("FFmpeg 初始化失败: {}", e)))?;
        info!("正在打开: {}", name);

        let c_name = CString::new(name.replace('\0', "")).unwrap_or_default();

        unsafe {
            let buffer = ffi::av_malloc(AVIO_BUFFER_SIZE) as *mut u8;
            if buffer.is_null() {
                return Err(PlayerError::OpenError("无法分配 AVIO 缓冲".to_string()));
            }

            let opaque = Box::into_raw(Box::new(input));
            let avio = ffi::avio_alloc_context(
                buffer,
                AVIO_BUFFER_SIZE as c_int,
                0, // 只读
                opaque as *mut c_void,
                Some(read_input),
                None,
                Some(seek_input),
            );
            if avio.is_null() {
                ffi::av_free(buffer as *mut c_void);
                drop(Box::from_raw(opaque));
                return Err(PlayerError::OpenError("无法创建 AVIO 上下文".to_string()));
            }

            let mut ctx = ffi::avformat_alloc_context();
            if ctx.is_null() {
                free_avio(avio);
                drop(Box::from_raw(opaque));
                return Err(PlayerError::OpenError("无法分配容器上下文".to_string()));
            }
            (*ctx).pb = avio;
            (*ctx).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as c_int;

            // 失败时 FFmpeg 会释放 ctx
            let ret = ffi::avformat_open_input(&mut ctx, c_name.as_ptr(), ptr::null_mut(), ptr::null_mut());
            if ret < 0 {
                free_avio(avio);
                drop(Box::from_raw(opaque));
                return Err(PlayerError::OpenError(format!("{}: {}", name, ffmpeg::Error::from(ret))));
            }

            let ret = ffi::avformat_find_stream_info(ctx, ptr::null_mut());
            if ret < 0 {
                ffi::avformat_close_input(&mut ctx);
                free_avio(avio);
                drop(Box::from_raw(opaque));
                return Err(PlayerError::OpenError(format!(
                    "{}: 无法获取流信息: {}",
                    name,
                    ffmpeg::Error::from(ret)
                )));
            }

            let input_ctx = format::context::Input::wrap(ctx);
            let streams: Vec<StreamInfo> = input_ctx.streams().map(|s| probe_stream(&s)).collect();
            let duration = if input_ctx.duration() > 0 {
                input_ctx.duration() as f64 / f64::from(ffi::AV_TIME_BASE)
            } else {
                0.0
            };

            for stream in &streams {
                debug!(
                    "流 #{}: {:?} {} tb={}/{}",
                    stream.index, stream.kind, stream.codec_name, stream.time_base.num, stream.time_base.den
                );
            }

            Ok(Self {
                input_ctx: ManuallyDrop::new(input_ctx),
                avio,
                opaque,
                streams,
                duration,
                source_name: name.to_string(),
            })
        }
    }
}

/// 读取单条流的参数
fn probe_stream(stream: &format::stream::Stream) -> StreamInfo {
    let parameters = stream.parameters();
    let kind = match parameters.medium() {
        media::Type::Video => StreamKind::Video,
        media::Type::Audio => StreamKind::Audio,
        _ => StreamKind::Other,
    };
    let time_base = stream.time_base();
    let frame_rate = stream.avg_frame_rate();
    let mut info = StreamInfo {
        index: stream.index(),
        kind,
        time_base: Rational::new(time_base.numerator(), time_base.denominator()),
        frame_rate: Rational::new(frame_rate.numerator(), frame_rate.denominator()),
        codec_name: parameters.id().name().to_string(),
        width: 0,
        height: 0,
        sample_rate: 0,
        channels: 0,
    };

    if let Ok(context) = codec::context::Context::from_parameters(parameters) {
        match kind {
            StreamKind::Video => {
                if let Ok(video) = context.decoder().video() {
                    info.width = video.width();
                    info.height = video.height();
                }
            }
            StreamKind::Audio => {
                if let Ok(audio) = context.decoder().audio() {
                    info.sample_rate = audio.rate();
                    info.channels = audio.channels();
                }
            }
            StreamKind::Other => {}
        }
    }
    info
}

impl DemuxerSource for Demuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input_ctx) {
            Ok(()) => Ok(Some(MediaPacket {
                stream_index: packet.stream(),
                pts: packet.pts(),
                dts: packet.dts(),
                duration: packet.duration(),
                data: packet.data().map(|d| d.to_vec()).unwrap_or_default(),
            })),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn seek(&mut self, timestamp_us: i64) -> Result<()> {
        // 最大值取目标本身：落点不会晚于目标
        self.input_ctx.seek(timestamp_us, ..timestamp_us)?;
        Ok(())
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn open_video_codec(&self, stream_index: usize) -> Result<Box<dyn VideoCodec>> {
        let stream = self
            .input_ctx
            .stream(stream_index)
            .ok_or_else(|| PlayerError::UnsupportedCodec(format!("流 #{} 不存在", stream_index)))?;
        Ok(Box::new(SoftwareVideoDecoder::from_stream(stream)?))
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_name)
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        // 顺序：容器 → AVIO → 宿主字节流
        unsafe {
            ManuallyDrop::drop(&mut self.input_ctx);
            free_avio(self.avio);
            drop(Box::from_raw(self.opaque));
        }
    }
}

/// 通过 FFmpeg 打开容器
pub struct FfmpegOpener;

impl ContainerOpener for FfmpegOpener {
    fn open(&self, input: Box<dyn MediaInput>, name: &str) -> Result<Box<dyn DemuxerSource>> {
        Ok(Box::new(Demuxer::open(input, name)?))
    }
}
