//! 终端视频播放引擎
//!
//! 解封装、音视频解码、以音频为主时钟的同步，
//! 通过 Kitty 图形协议把视频帧绘制到终端，并叠加圆形头像和 GIF 角标。

pub mod core;
pub mod overlay;
pub mod player;
pub mod renderer;

pub use crate::core::{EngineConfig, PlayerError, PlayerStatus, Result};
pub use crate::overlay::{GifAnimation, GifSlot, GifTracker, ProfileOverlay};
pub use crate::player::{Player, PlaybackSession, SessionConfig, SessionStats};
pub use crate::renderer::{KittyRenderer, TerminalGeometry};

use std::sync::Once;

static INIT: Once = Once::new();

/// 初始化 FFmpeg（进程内只执行一次）
///
/// FFmpeg 自己的日志会直接写到 stderr，和终端图形输出混在一起，所以这里关掉。
pub fn init() {
    INIT.call_once(|| {
        if let Err(e) = ffmpeg_next::init() {
            log::error!("FFmpeg 初始化失败: {}", e);
            return;
        }
        ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Quiet);
        log::info!("✅ FFmpeg 初始化成功");
    });
}
