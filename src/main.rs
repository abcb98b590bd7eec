use anyhow::{Context, Result};
use clap::Parser;
use cutscene_player::core::{PlayerConfig, VideoImage};
use cutscene_player::player::{VideoSink, VideoState};
use log::info;
use std::fs::File;
use std::io::BufReader;
use std::thread;
use std::time::{Duration, Instant};

const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

/// 只记录显示帧的渲染端
struct LogSink {
    frames: usize,
}

impl VideoSink for LogSink {
    fn display(&mut self, image: VideoImage<'_>) {
        self.frames += 1;
        if self.frames <= 5 || self.frames % 100 == 0 {
            info!(
                "🖼 显示第 {} 帧: pts={:.3}s {}x{}",
                self.frames, image.pts, image.width, image.height
            );
        }
    }

    fn release(&mut self) {
        info!("🖼 共显示 {} 帧", self.frames);
    }
}

/// 无界面过场动画播放器
#[derive(Parser, Debug)]
#[command(name = "cutscene_player")]
#[command(about = "通过 FFmpeg 播放媒体文件，按 60Hz 驱动 update() 并记录显示的帧")]
struct Args {
    /// 媒体文件路径
    path: String,

    /// JSON 配置文件
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// 打开后立即 seek 到指定秒数
    #[arg(long, value_name = "SECS", allow_negative_numbers = true)]
    seek: Option<f64>,
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => PlayerConfig::from_json_file(path).with_context(|| format!("无法加载配置 {}", path))?,
        None => PlayerConfig::default(),
    };

    let file = File::open(&args.path).with_context(|| format!("无法打开文件 {}", args.path))?;
    let mut state = VideoState::new(config);
    state.set_video_sink(Box::new(LogSink { frames: 0 }));
    state.init(Box::new(BufReader::new(file)), &args.path)?;

    if let Some(info) = state.media_info() {
        info!(
            "📋 {}x{} @ {:.2}fps, 时长 {:.2}s, 视频 {}, 音频 {}",
            info.width, info.height, info.fps, info.duration, info.video_codec, info.audio_codec
        );
    }
    if let Some(seek) = args.seek {
        state.seek_to(seek);
    }

    // 60Hz 驱动
    let started = Instant::now();
    let mut next_tick = Instant::now();
    while state.update() {
        next_tick += FRAME_INTERVAL;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }

    info!("✅ 播放结束，用时 {:.2}s", started.elapsed().as_secs_f64());
    state.deinit();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_path_config_and_seek() {
        let args = Args::try_parse_from(["cutscene_player", "intro.bik", "--config", "cfg.json", "--seek", "1.5"]).unwrap();
        assert_eq!(args.path, "intro.bik");
        assert_eq!(args.config.as_deref(), Some("cfg.json"));
        assert_eq!(args.seek, Some(1.5));
    }

    #[test]
    fn test_rejects_missing_path_and_bad_seek() {
        assert!(Args::try_parse_from(["cutscene_player"]).is_err());
        assert!(Args::try_parse_from(["cutscene_player", "a.mp4", "--seek", "abc"]).is_err());
        let args = Args::try_parse_from(["cutscene_player", "a.mp4", "--seek", "-2"]).unwrap();
        assert_eq!(args.seek, Some(-2.0));
    }
}
