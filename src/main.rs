use anyhow::{bail, Result};
use log::info;
use reels_player::{Player, TerminalGeometry};

fn main() -> Result<()> {
    // 初始化日志（图像写到 stdout，日志走 stderr）
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let Some(video) = args.next() else {
        bail!("用法: reels-player <视频文件> [头像图片]");
    };
    let image = args.next();

    info!("🎬 Reels Player 启动: {}", video);
    reels_player::init();

    let player = Player::new();
    if let Some(geometry) = TerminalGeometry::query() {
        // 默认占终端高度的 80%，按 9:16 竖屏比例
        let height = geometry.height_px * 4 / 5;
        player.set_size(height * 9 / 16, height);
        player.set_terminal_geometry(geometry);
    }

    let result = player.play(&video, image.as_deref());
    player.close();
    result?;

    info!("✅ 播放结束");
    Ok(())
}
