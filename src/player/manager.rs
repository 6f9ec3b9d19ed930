use crate::core::{log_ctx, EngineConfig, PlayerStatus, Result};
use crate::overlay::{GifSlot, GifTracker};
use crate::player::session::{PlaybackSession, SessionConfig, SessionControl};
use crate::renderer::{KittyRenderer, TerminalGeometry};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 播放器 - 长期存在的协调者
///
/// 所有方法都只需要 `&self`，可以放进 `Arc` 在 UI 线程和播放线程之间共享。
/// `play` 会阻塞调用线程并循环播放，直到 `stop` / `close`。
pub struct Player {
    config: EngineConfig,
    playing: AtomicBool,
    paused: AtomicBool,
    muted: AtomicBool,
    use_shm: Mutex<Option<bool>>, // None 表示按终端探测结果
    volume: Mutex<f32>,
    size: Mutex<(u32, u32)>,
    geometry: Mutex<Option<TerminalGeometry>>,
    renderer: Mutex<Option<Arc<KittyRenderer>>>,
    pending_output: Mutex<Option<Box<dyn Write + Send>>>,
    gifs: Arc<Mutex<GifTracker>>,
    session: Mutex<Option<Arc<SessionControl>>>, // 当前会话的控制句柄
    play_lock: Mutex<()>,
}

impl Player {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        info!("{} 🎮 创建播放器", log_ctx());
        Self {
            config,
            playing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            use_shm: Mutex::new(None),
            volume: Mutex::new(1.0),
            size: Mutex::new((0, 0)),
            geometry: Mutex::new(None),
            renderer: Mutex::new(None),
            pending_output: Mutex::new(None),
            gifs: Arc::new(Mutex::new(GifTracker::new())),
            session: Mutex::new(None),
            play_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 循环播放 `video_path`，直到调用 `stop`
    ///
    /// 打开失败或会话出错时返回错误；正常停止返回 Ok。
    pub fn play(&self, video_path: &str, image_path: Option<&str>) -> Result<()> {
        self.play_loop(|config| PlaybackSession::open(video_path, image_path, config))
    }

    fn play_loop<F>(&self, mut open: F) -> Result<()>
    where
        F: FnMut(SessionConfig) -> Result<PlaybackSession>,
    {
        let _guard = self.play_lock.lock();
        self.playing.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);

        let renderer = self.renderer();
        let mut iteration = 0u64;

        while self.playing.load(Ordering::SeqCst) {
            iteration += 1;
            let control = Arc::new(SessionControl::new(
                self.paused.load(Ordering::SeqCst),
                self.muted.load(Ordering::SeqCst),
                *self.volume.lock(),
            ));
            let (max_width, max_height) = *self.size.lock();
            let stored = *self.geometry.lock();
            let geometry = stored.or_else(TerminalGeometry::query);

            let config = SessionConfig {
                engine: self.config.clone(),
                max_width,
                max_height,
                geometry,
                sink: renderer.clone(),
                gifs: self.gifs.clone(),
                control: control.clone(),
            };

            let mut session = match open(config) {
                Ok(session) => session,
                Err(e) => {
                    warn!("{} ❌ 打开会话失败: {}", log_ctx(), e);
                    self.playing.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            };

            {
                let mut current = self.session.lock();
                if !self.playing.load(Ordering::SeqCst) {
                    break;
                }
                *current = Some(control.clone());
            }

            debug!("{} 🔁 第 {} 次播放", log_ctx(), iteration);
            let result = session.run();
            session.cleanup();
            self.clear_session(&control);

            if let Err(e) = result {
                self.playing.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        info!("{} ⏹️ 播放结束，共 {} 次", log_ctx(), iteration);
        Ok(())
    }

    fn clear_session(&self, control: &Arc<SessionControl>) {
        let mut current = self.session.lock();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, control)) {
            *current = None;
        }
    }

    fn with_session(&self, f: impl FnOnce(&SessionControl)) {
        if let Some(control) = self.session.lock().as_ref() {
            f(control);
        }
    }

    /// 渲染器在第一次需要时创建，之后每次播放复用
    fn renderer(&self) -> Arc<KittyRenderer> {
        let mut slot = self.renderer.lock();
        if let Some(renderer) = slot.as_ref() {
            return renderer.clone();
        }
        let renderer = match self.pending_output.lock().take() {
            Some(out) => KittyRenderer::new(out),
            None => KittyRenderer::stdout(),
        };
        match *self.use_shm.lock() {
            Some(enabled) => renderer.set_use_shared_memory(enabled),
            None => {
                renderer.detect_shared_memory();
            }
        }
        let renderer = Arc::new(renderer);
        *slot = Some(renderer.clone());
        renderer
    }

    /// 停止播放（可以重复调用）
    pub fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
        self.with_session(|s| s.stop());
    }

    /// 切换暂停
    pub fn pause(&self) {
        let paused = !self.paused.fetch_xor(true, Ordering::SeqCst);
        info!("{} {}", log_ctx(), if paused { "⏸️ 暂停" } else { "▶️ 继续" });
        self.with_session(|s| s.set_paused(paused));
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// 切换静音
    pub fn mute(&self) {
        let muted = !self.muted.fetch_xor(true, Ordering::SeqCst);
        self.with_session(|s| s.set_muted(muted));
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        *self.volume.lock() = volume;
        self.with_session(|s| s.set_volume(volume));
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    /// 设置视频显示区域（像素），正在播放时不重启会话
    pub fn set_size(&self, width: u32, height: u32) {
        *self.size.lock() = (width, height);
        self.with_session(|s| s.request_size(width, height));
    }

    /// 终端尺寸变化时由外部调用；未设置时每次播放前自动查询
    pub fn set_terminal_geometry(&self, geometry: TerminalGeometry) {
        *self.geometry.lock() = Some(geometry);
        self.with_session(|s| s.set_geometry(geometry));
    }

    pub fn set_output(&self, out: Box<dyn Write + Send>) {
        match self.renderer.lock().as_ref() {
            Some(renderer) => renderer.set_output(out),
            None => *self.pending_output.lock() = Some(out),
        }
    }

    /// 显式开关共享内存传输；从未调用时由渲染器探测终端决定
    pub fn set_use_shared_memory(&self, enabled: bool) {
        *self.use_shm.lock() = Some(enabled);
        if let Some(renderer) = self.renderer.lock().as_ref() {
            renderer.set_use_shared_memory(enabled);
        }
    }

    /// 替换可见的 GIF 角标，保留仍在显示的动画进度
    pub fn set_visible_gifs(&self, slots: Vec<GifSlot>) -> Result<()> {
        let renderer = self.renderer();
        self.gifs.lock().set_slots(slots, renderer.as_ref())
    }

    pub fn clear_gifs(&self) -> Result<()> {
        let renderer = self.renderer();
        self.gifs.lock().clear(renderer.as_ref())
    }

    /// 停止并等待正在进行的 `play` 返回，然后清除终端图像和共享内存文件
    pub fn close(&self) {
        self.stop();
        let _guard = self.play_lock.lock();

        let renderer = self.renderer.lock().take();
        if let Some(renderer) = renderer {
            if let Err(e) = self.gifs.lock().clear(renderer.as_ref()) {
                warn!("{} 清除 GIF 失败: {}", log_ctx(), e);
            }
            if let Err(e) = renderer.clear() {
                warn!("{} 清除终端图像失败: {}", log_ctx(), e);
            }
            renderer.cleanup_shared_memory();
        }
        info!("{} 🧹 播放器已关闭", log_ctx());
    }

    pub fn status(&self) -> PlayerStatus {
        let (width, height) = *self.size.lock();
        let shared_memory = match self.renderer.lock().as_ref() {
            Some(renderer) => renderer.uses_shared_memory(),
            None => self.use_shm.lock().unwrap_or(false),
        };
        PlayerStatus {
            playing: self.playing.load(Ordering::SeqCst),
            paused: self.is_paused(),
            muted: self.is_muted(),
            volume: self.volume() as f64,
            width,
            height,
            shared_memory,
        }
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::GifAnimation;
    use crate::player::session::SessionParts;
    use crate::player::testing::{FakeDecoder, FakeSource, RecordingSink};
    use crate::PlayerError;
    use std::io;
    use std::sync::atomic::{AtomicU64, AtomicUsize};
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct SharedOutput(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedOutput {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn player_with_output() -> (Player, SharedOutput) {
        let player = Player::new();
        let out = SharedOutput::default();
        player.set_output(Box::new(out.clone()));
        player.set_terminal_geometry(TerminalGeometry::new(80, 24, 800, 480));
        (player, out)
    }

    fn fake_session(config: SessionConfig, frames: i64) -> Result<PlaybackSession> {
        Ok(PlaybackSession::from_parts(SessionParts {
            source: Box::new(FakeSource::video_only(frames)),
            video: Box::new(FakeDecoder::new(Arc::new(AtomicUsize::new(0)))),
            audio: None,
            profile: None,
            config,
        }))
    }

    #[test]
    fn toggles_and_clamps() {
        let player = Player::new();
        assert!(!player.is_paused());
        player.pause();
        assert!(player.is_paused());
        player.pause();
        assert!(!player.is_paused());

        player.mute();
        assert!(player.is_muted());
        player.mute();
        assert!(!player.is_muted());

        player.set_volume(1.7);
        assert_eq!(player.volume(), 1.0);
        player.set_volume(-0.3);
        assert_eq!(player.volume(), 0.0);
        player.set_volume(0.25);
        assert_eq!(player.volume(), 0.25);
    }

    #[test]
    fn status_reflects_settings() {
        let player = Player::new();
        player.set_size(270, 480);
        player.set_volume(0.5);
        player.mute();
        let status = player.status();
        assert_eq!(
            status,
            PlayerStatus {
                playing: false,
                paused: false,
                muted: true,
                volume: 0.5,
                width: 270,
                height: 480,
                shared_memory: false,
            }
        );
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"muted\":true"));
    }

    #[test]
    fn shared_memory_defaults_to_detection() {
        // 未显式设置：自定义输出不探测终端，保持直接传输
        let (player, _out) = player_with_output();
        player.set_visible_gifs(Vec::new()).unwrap();
        assert!(!player.status().shared_memory);

        // 显式设置优先，渲染器创建前就反映在状态里
        let player = Player::new();
        player.set_use_shared_memory(true);
        assert!(player.status().shared_memory);
        player.set_use_shared_memory(false);
        assert!(!player.status().shared_memory);
    }

    #[test]
    fn missing_file_returns_error_and_stops() {
        let (player, _out) = player_with_output();
        let result = player.play("/nonexistent/clip.mp4", None);
        assert!(matches!(result, Err(PlayerError::OpenError(_))));
        assert!(!player.status().playing);
    }

    #[test]
    fn loops_until_stopped() {
        let (player, out) = player_with_output();
        let player = Arc::new(player);
        let opened = Arc::new(AtomicU64::new(0));

        let stopper = {
            let player = player.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(700));
                player.stop();
            })
        };

        let started = Instant::now();
        let counter = opened.clone();
        // 每次播放 9 帧（0.3 秒）
        player
            .play_loop(|config| {
                counter.fetch_add(1, Ordering::SeqCst);
                fake_session(config, 9)
            })
            .unwrap();
        stopper.join().unwrap();

        assert!(opened.load(Ordering::SeqCst) >= 2);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!player.status().playing);
        assert!(player.session.lock().is_none());
        assert!(String::from_utf8_lossy(&out.0.lock()).contains("\x1b_Ga=T,f=24,s=4,v=2,i=1,"));
    }

    #[test]
    fn controls_reach_the_live_session() {
        let (player, _out) = player_with_output();
        let player = Arc::new(player);
        let sink = Arc::new(RecordingSink::default());

        let controller = {
            let player = player.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(150));
                player.set_size(8, 8);
                thread::sleep(Duration::from_millis(300));
                player.stop();
                player.stop();
            })
        };

        let recording = sink.clone();
        player
            .play_loop(|mut config| {
                config.sink = recording.clone();
                fake_session(config, 300)
            })
            .unwrap();
        controller.join().unwrap();

        let rendered = sink.rendered.lock().clone();
        assert_eq!((rendered[0].1, rendered[0].2), (4, 2));
        assert_eq!(rendered.last().map(|r| (r.1, r.2)), Some((8, 4)));
    }

    #[test]
    fn close_waits_for_play_and_clears_images() {
        let (player, out) = player_with_output();
        let player = Arc::new(player);

        let anim = Arc::new(GifAnimation {
            frames: vec![vec![1, 2, 3, 255]],
            delays: vec![Duration::from_millis(100)],
            width: 1,
            height: 1,
        });
        player.set_visible_gifs(vec![GifSlot::new(anim, 2, 2)]).unwrap();

        let playing = {
            let player = player.clone();
            thread::spawn(move || player.play_loop(|config| fake_session(config, 3000)))
        };
        thread::sleep(Duration::from_millis(200));
        player.close();
        assert!(playing.join().unwrap().is_ok());

        let text = String::from_utf8_lossy(&out.0.lock()).to_string();
        assert!(text.contains("\x1b_Ga=d,d=i,i=1,q=2\x1b\\"));
        assert!(text.contains("\x1b_Ga=d,d=i,i=200,q=2\x1b\\"));
        assert!(player.renderer.lock().is_none());
    }
}
