use crate::core::{log_ctx, EngineConfig, MasterClock, PixelFormat, PlayerError, Result, WallClock};
use crate::overlay::{GifTracker, ProfileOverlay};
use crate::player::audio_output::{AudioOutput, SampleBuffer};
use crate::player::decoder::{AudioDecoder, AudioPacketDecoder, VideoDecoder, VideoFrameDecoder};
use crate::player::demuxer::Demuxer;
use crate::player::demuxer_source::{MediaPacket, PacketKind, PacketSource};
use crate::renderer::{fit_size, ImagePlacement, ImageSink, TerminalGeometry, PROFILE_IMAGE_ID, VIDEO_IMAGE_ID};
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use ffmpeg_next::Packet;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 几何未知时假定的字符格高度（像素）
const DEFAULT_CELL_HEIGHT: u32 = 20;

/// 停止信号
///
/// `trigger` 可以调用任意多次；第一次调用时丢弃发送端，
/// 所有在 `receiver()` 上等待的 `select!` / `recv_timeout` 立即返回。
pub struct StopSignal {
    stopped: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            stopped: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    pub fn trigger(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if self.tx.lock().take().is_some() {
            debug!("{} ⏹️ 停止信号已触发", log_ctx());
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// 最多等待 `timeout`，期间被停止则提前返回 true
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_stopped(),
            _ => true,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// 播放器与正在运行的会话之间的控制通道
///
/// 播放器持有 `Arc<SessionControl>`，所有方法都可以在任意线程调用；
/// 会话的渲染循环在每个包之前读取这些状态。
pub struct SessionControl {
    stop: StopSignal,
    paused: AtomicBool,
    muted: AtomicBool,
    volume: Mutex<f32>,
    pending_size: Mutex<Option<(u32, u32)>>,
    pending_geometry: Mutex<Option<TerminalGeometry>>,
    audio: Mutex<Option<Arc<SampleBuffer>>>,
    clock: Mutex<Option<Arc<dyn MasterClock>>>,
}

impl SessionControl {
    pub fn new(paused: bool, muted: bool, volume: f32) -> Self {
        Self {
            stop: StopSignal::new(),
            paused: AtomicBool::new(paused),
            muted: AtomicBool::new(muted),
            volume: Mutex::new(volume.clamp(0.0, 1.0)),
            pending_size: Mutex::new(None),
            pending_geometry: Mutex::new(None),
            audio: Mutex::new(None),
            clock: Mutex::new(None),
        }
    }

    pub fn stop(&self) {
        self.stop.trigger();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// 暂停状态直接转给会话的主时钟，音频输出立即静音
    pub fn set_paused(&self, paused: bool) {
        let clock = self.clock.lock();
        self.paused.store(paused, Ordering::SeqCst);
        if let Some(clock) = clock.as_ref() {
            clock.set_paused(paused);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        if let Some(buffer) = self.audio.lock().as_ref() {
            buffer.set_muted(muted);
        }
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        *self.volume.lock() = volume;
        if let Some(buffer) = self.audio.lock().as_ref() {
            buffer.set_volume(volume);
        }
    }

    /// 请求新的显示尺寸，渲染循环在下一个包之前应用
    pub fn request_size(&self, width: u32, height: u32) {
        *self.pending_size.lock() = Some((width, height));
    }

    pub fn set_geometry(&self, geometry: TerminalGeometry) {
        *self.pending_geometry.lock() = Some(geometry);
    }

    fn take_pending_size(&self) -> Option<(u32, u32)> {
        self.pending_size.lock().take()
    }

    fn take_pending_geometry(&self) -> Option<TerminalGeometry> {
        self.pending_geometry.lock().take()
    }

    /// 接入会话的采样缓冲区，并套用当前的音量和静音状态
    fn attach_audio(&self, buffer: Arc<SampleBuffer>) {
        buffer.set_volume(*self.volume.lock());
        buffer.set_muted(self.muted.load(Ordering::SeqCst));
        *self.audio.lock() = Some(buffer);
    }

    /// 接入会话的主时钟，并套用当前的暂停状态
    fn attach_clock(&self, clock: Arc<dyn MasterClock>) {
        let mut slot = self.clock.lock();
        clock.set_paused(self.paused.load(Ordering::SeqCst));
        *slot = Some(clock);
    }

    fn detach(&self) {
        self.audio.lock().take();
        self.clock.lock().take();
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new(false, false, 1.0)
    }
}

/// 会话参数：由播放器在每次播放前组装
pub struct SessionConfig {
    pub engine: EngineConfig,
    /// 视频显示区域（像素），按宽高比缩放进去；0 表示使用源尺寸
    pub max_width: u32,
    pub max_height: u32,
    pub geometry: Option<TerminalGeometry>,
    pub sink: Arc<dyn ImageSink>,
    pub gifs: Arc<Mutex<GifTracker>>,
    pub control: Arc<SessionControl>,
}

/// 已解码好的会话组件（测试或其它数据源可以直接组装）
pub struct SessionParts {
    pub source: Box<dyn PacketSource>,
    pub video: Box<dyn VideoFrameDecoder>,
    /// 音频解码器和它写入的采样缓冲区；None 时使用墙钟
    pub audio: Option<(Box<dyn AudioPacketDecoder>, Arc<SampleBuffer>)>,
    pub profile: Option<ProfileOverlay>,
    pub config: SessionConfig,
}

/// 一次播放的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// 送入视频解码器的包
    pub packets_decoded: u64,
    /// 预缓冲结束后解码出的帧
    pub frames_decoded: u64,
    pub frames_rendered: u64,
    /// 落后于时钟被丢弃的帧
    pub frames_dropped: u64,
    /// 预缓冲期间解码后丢弃的帧
    pub frames_discarded_prebuffer: u64,
}

/// 音视频同步决策
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncAction {
    Render,
    /// 视频超前：先按比例休眠再渲染
    SleepThenRender(Duration),
    /// 视频落后：丢弃本帧
    Drop,
}

/// `diff = pts - clock`；超前超过阈值时只修正 `correction` 比例，落后超过阈值则丢帧
pub fn sync_action(pts: f64, clock: f64, threshold: f64, correction: f64) -> SyncAction {
    let diff = pts - clock;
    if diff > threshold {
        SyncAction::SleepThenRender(Duration::from_secs_f64(diff * correction))
    } else if diff < -threshold {
        SyncAction::Drop
    } else {
        SyncAction::Render
    }
}

/// 音频队列中的包：克隆自解封装出的包，带上已换算好的时间戳
struct AudioPacket {
    packet: Packet,
    pts: f64,
}

/// 视频和头像在终端上的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    width: u32,
    height: u32,
    video_pos: (u32, u32),
    profile_pos: Option<(u32, u32)>,
}

impl Layout {
    fn compute(source: (u32, u32), bounds: (u32, u32), geometry: Option<&TerminalGeometry>) -> Self {
        let (width, height) = fit_size(source.0, source.1, bounds.0, bounds.1);
        let video_pos = geometry.and_then(|g| g.center_position(width, height)).unwrap_or((0, 0));
        let profile_pos = geometry.and_then(|g| g.overlay_position(width, height));
        Self { width, height, video_pos, profile_pos }
    }
}

/// 一次播放：解封装、音频解码、渲染三个活动，两条有界队列
///
/// 状态：构造 → 预缓冲 → 播放 → 停止 → 清理。每次循环播放都创建新的会话。
pub struct PlaybackSession {
    source: Box<dyn PacketSource>,
    video: Box<dyn VideoFrameDecoder>,
    audio: Option<(Box<dyn AudioPacketDecoder>, Arc<SampleBuffer>)>,
    output: Option<&'static AudioOutput>,
    clock: Arc<dyn MasterClock>,
    profile: Option<ProfileOverlay>,
    config: SessionConfig,
    layout: Layout,
    cleaned_up: bool,
}

impl PlaybackSession {
    /// 打开媒体文件并准备好所有组件
    pub fn open(video_path: &str, image_path: Option<&str>, config: SessionConfig) -> Result<Self> {
        crate::init();
        info!("{} 🎬 打开会话: {}", log_ctx(), video_path);

        let demuxer = Demuxer::open(video_path)?;
        let video = VideoDecoder::new(
            demuxer.video_parameters()?,
            demuxer.video_time_base(),
            config.engine.hardware_decode,
        )?;
        info!("{} 视频解码器: {}", log_ctx(), video.info());

        let audio = match demuxer.audio_parameters() {
            Some(params) => Self::open_audio(params, &config.engine),
            None => {
                info!("{} 无音轨，使用墙钟", log_ctx());
                None
            }
        };
        let output = audio.as_ref().map(|(_, output)| *output);
        let audio = audio.map(|((decoder, buffer), _)| (decoder, buffer));

        let profile = image_path.and_then(|path| {
            let cell_height = config.geometry.and_then(|g| g.cell_height()).unwrap_or(DEFAULT_CELL_HEIGHT);
            match ProfileOverlay::load(path, cell_height) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!("{} 头像加载失败，不显示头像: {}", log_ctx(), e);
                    None
                }
            }
        });

        let mut session = Self::from_parts(SessionParts {
            source: Box::new(demuxer),
            video: Box::new(video),
            audio,
            profile,
            config,
        });
        session.output = output;
        Ok(session)
    }

    /// 音频设备或解码器不可用时返回 None，会话退回墙钟
    #[allow(clippy::type_complexity)]
    fn open_audio(
        params: ffmpeg_next::codec::Parameters,
        engine: &EngineConfig,
    ) -> Option<((Box<dyn AudioPacketDecoder>, Arc<SampleBuffer>), &'static AudioOutput)> {
        let output = match AudioOutput::global(engine.audio_sample_rate) {
            Ok(output) => output,
            Err(e) => {
                warn!("{} ⚠️ 音频输出不可用，静音播放: {}", log_ctx(), e);
                return None;
            }
        };

        let buffer = Arc::new(SampleBuffer::new(output.sample_rate()));
        match AudioDecoder::new(params, output.sample_rate(), buffer.clone()) {
            Ok(decoder) => Some(((Box::new(decoder) as Box<dyn AudioPacketDecoder>, buffer), output)),
            Err(e) => {
                warn!("{} ⚠️ 创建音频解码器失败，静音播放: {}", log_ctx(), e);
                None
            }
        }
    }

    pub fn from_parts(parts: SessionParts) -> Self {
        let SessionParts { source, mut video, mut audio, profile, config } = parts;

        if audio.is_some() && !source.has_audio() {
            warn!("{} 数据源没有音轨，忽略音频解码器", log_ctx());
            audio = None;
        }

        let clock: Arc<dyn MasterClock> = match &audio {
            Some((_, buffer)) => buffer.clone(),
            None => Arc::new(WallClock::new()),
        };

        let layout = Layout::compute(
            video.source_size(),
            (config.max_width, config.max_height),
            config.geometry.as_ref(),
        );
        video.set_size(layout.width, layout.height);
        debug!("{} 会话布局: {:?} ({})", log_ctx(), layout, source.description());

        Self {
            source,
            video,
            audio,
            output: None,
            clock,
            profile,
            config,
            layout,
            cleaned_up: false,
        }
    }

    pub fn control(&self) -> Arc<SessionControl> {
        self.config.control.clone()
    }

    /// 视频显示尺寸
    pub fn display_size(&self) -> (u32, u32) {
        (self.layout.width, self.layout.height)
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// 运行到结束或被停止
    ///
    /// 解封装和音频解码在作用域线程里运行，渲染循环在调用线程上运行。
    /// 视频/音频队列的发送端都归解封装线程所有，它退出时两条队列恰好各关闭一次。
    pub fn run(&mut self) -> Result<SessionStats> {
        let engine = self.config.engine.clone();
        let control = self.config.control.clone();
        let (video_tx, video_rx) = bounded::<MediaPacket>(engine.video_queue_capacity.max(1));
        let (audio_tx, audio_rx) = if self.audio.is_some() {
            let (tx, rx) = bounded::<AudioPacket>(engine.audio_queue_capacity.max(1));
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let demux_done = AtomicBool::new(false);

        control.attach_clock(self.clock.clone());
        if let Some((_, buffer)) = &self.audio {
            control.attach_audio(buffer.clone());
            if let Some(output) = self.output {
                output.attach(buffer.clone());
            }
        }

        info!("{} ▶️ 会话开始: {}", log_ctx(), self.source.description());
        let started = Instant::now();

        let Self { source, video, audio, clock, profile, config, layout, .. } = self;
        let stop = control.stop_signal();
        let audio_rate = audio.as_ref().map(|(_, buffer)| buffer.sample_rate());

        let result = thread::scope(|scope| {
            let demux = scope.spawn(|| demux_loop(source.as_mut(), video_tx, audio_tx, stop, &demux_done));

            let audio_thread = match (audio.as_mut(), audio_rx) {
                (Some((decoder, _)), Some(rx)) => Some(scope.spawn(move || audio_loop(decoder.as_mut(), rx, stop))),
                _ => None,
            };

            let mut render = RenderLoop {
                video: video.as_mut(),
                clock: clock.as_ref(),
                sink: config.sink.as_ref(),
                gifs: &config.gifs,
                control: &control,
                engine: &engine,
                profile: profile.as_mut(),
                layout,
                bounds: (config.max_width, config.max_height),
                geometry: config.geometry,
                audio_rate,
                stats: SessionStats::default(),
            };
            let result = render.run(&video_rx, &demux_done);

            // 唤醒可能阻塞在发送上的解封装线程，然后排空队列
            stop.trigger();
            drop(video_rx);

            let mut panicked = None;
            if demux.join().is_err() {
                panicked = Some("解封装线程异常退出");
            }
            if let Some(handle) = audio_thread {
                if handle.join().is_err() {
                    panicked = Some("音频解码线程异常退出");
                }
            }
            match panicked {
                Some(message) if result.is_ok() => Err(PlayerError::Other(message.to_string())),
                _ => result,
            }
        });

        match &result {
            Ok(stats) => info!(
                "{} ⏹️ 会话结束 ({:.2}s): 解码 {} 帧, 渲染 {}, 丢弃 {}, 预缓冲丢弃 {}",
                log_ctx(),
                started.elapsed().as_secs_f64(),
                stats.frames_decoded,
                stats.frames_rendered,
                stats.frames_dropped,
                stats.frames_discarded_prebuffer
            ),
            Err(e) => error!("{} ❌ 会话异常结束: {}", log_ctx(), e),
        }
        result
    }

    /// 断开音频、重置时钟；`Drop` 时也会调用，多次调用无副作用
    pub fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        self.config.control.stop();
        self.config.control.detach();
        if let Some((_, buffer)) = &self.audio {
            if let Some(output) = self.output {
                output.detach(buffer);
            }
        }
        self.clock.reset();
        debug!("{} 🧹 会话已清理", log_ctx());
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// 在发送和停止之间竞争；停止或对端关闭时返回 false（未送出的包随之释放）
fn send_or_stop<T>(tx: &Sender<T>, item: T, stop: &StopSignal) -> bool {
    select! {
        send(tx, item) -> res => res.is_ok(),
        recv(stop.receiver()) -> _ => false,
    }
}

fn demux_loop(
    source: &mut dyn PacketSource,
    video_tx: Sender<MediaPacket>,
    audio_tx: Option<Sender<AudioPacket>>,
    stop: &StopSignal,
    done: &AtomicBool,
) {
    info!("{} 📦 解封装线程启动", log_ctx());
    let mut packet_count = 0u64;

    while !stop.is_stopped() {
        let packet = match source.read_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                info!("{} 文件读取完毕，共处理 {} 个包", log_ctx(), packet_count);
                break;
            }
            Err(e) => {
                error!("{} 读取包失败: {}", log_ctx(), e);
                break;
            }
        };
        packet_count += 1;

        let sent = match packet.kind {
            PacketKind::Video => send_or_stop(&video_tx, packet, stop),
            PacketKind::Audio => match &audio_tx {
                Some(tx) => {
                    let pts = source.pts_to_seconds(packet.raw_pts(), PacketKind::Audio);
                    let audio = AudioPacket { packet: packet.packet.clone(), pts };
                    drop(packet);
                    send_or_stop(tx, audio, stop)
                }
                None => true,
            },
        };
        if !sent {
            debug!("{} 解封装线程收到停止信号", log_ctx());
            break;
        }
    }

    done.store(true, Ordering::Release);
    info!("{} 📦 解封装线程结束", log_ctx());
}

fn audio_loop(decoder: &mut dyn AudioPacketDecoder, rx: Receiver<AudioPacket>, stop: &StopSignal) {
    info!("{} 🔊 音频解码线程启动", log_ctx());
    let mut failed = false;
    let mut chunks = 0usize;

    // 出错或停止后继续排空队列，解封装线程就不会卡在发送上
    for packet in rx.iter() {
        if failed || stop.is_stopped() {
            continue;
        }
        match decoder.decode_packet(&packet.packet, packet.pts) {
            Ok(count) => chunks += count,
            Err(e) => {
                error!("{} ❌ 音频解码失败，停止音频: {}", log_ctx(), e);
                failed = true;
            }
        }
    }

    info!("{} 🔊 音频解码线程结束，共 {} 个音频块", log_ctx(), chunks);
}

/// 渲染循环的状态（运行在调用 `run` 的线程上）
struct RenderLoop<'a> {
    video: &'a mut dyn VideoFrameDecoder,
    clock: &'a dyn MasterClock,
    sink: &'a dyn ImageSink,
    gifs: &'a Mutex<GifTracker>,
    control: &'a SessionControl,
    engine: &'a EngineConfig,
    profile: Option<&'a mut ProfileOverlay>,
    layout: &'a mut Layout,
    bounds: (u32, u32),
    geometry: Option<TerminalGeometry>,
    audio_rate: Option<u32>,
    stats: SessionStats,
}

impl RenderLoop<'_> {
    fn run(&mut self, video_rx: &Receiver<MediaPacket>, demux_done: &AtomicBool) -> Result<SessionStats> {
        self.prebuffer(video_rx, demux_done)?;

        let mut last_end_pts = 0.0;
        for packet in video_rx.iter() {
            if self.control.is_stopped() {
                continue;
            }
            if self.control.is_paused() && !self.wait_while_paused() {
                continue;
            }
            self.apply_pending_changes();

            self.stats.packets_decoded += 1;
            let Some(frame) = self.video.decode_packet(&packet.packet)? else {
                continue;
            };
            drop(packet);
            self.stats.frames_decoded += 1;
            last_end_pts = frame.end_pts();

            match sync_action(
                frame.pts,
                self.clock.time(),
                self.engine.sync_threshold_secs,
                self.engine.sync_correction,
            ) {
                SyncAction::Drop => {
                    self.stats.frames_dropped += 1;
                    debug!("{} 丢帧: pts={:.3} clock={:.3}", log_ctx(), frame.pts, self.clock.time());
                    continue;
                }
                SyncAction::SleepThenRender(delay) => {
                    if self.control.stop_signal().wait_timeout(delay) {
                        continue;
                    }
                }
                SyncAction::Render => {}
            }

            self.present(&frame.data, frame.width, frame.height)?;
        }

        if !self.control.is_stopped() {
            self.drain_tail(last_end_pts);
        }
        Ok(self.stats)
    }

    /// 有音轨时先积累一段音频再启动时钟；期间的视频包照常解码但不显示
    fn prebuffer(&mut self, video_rx: &Receiver<MediaPacket>, demux_done: &AtomicBool) -> Result<()> {
        let Some(rate) = self.audio_rate else {
            self.clock.start();
            return Ok(());
        };

        let target = self.engine.prebuffer_bytes(rate);
        let started = Instant::now();
        while !self.control.is_stopped()
            && self.clock.buffered_bytes() < target
            && !demux_done.load(Ordering::Acquire)
        {
            match video_rx.recv_timeout(self.engine.pause_poll()) {
                Ok(packet) => {
                    self.stats.packets_decoded += 1;
                    if self.video.decode_packet(&packet.packet)?.is_some() {
                        self.stats.frames_discarded_prebuffer += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!(
            "{} ✅ 预缓冲完成: {} 字节音频, 耗时 {}ms",
            log_ctx(),
            self.clock.buffered_bytes(),
            started.elapsed().as_millis()
        );
        self.clock.start();
        Ok(())
    }

    /// 暂停期间按轮询间隔等待；返回 false 表示等待中被停止
    ///
    /// 时钟的暂停由 [`SessionControl::set_paused`] 直接切换，这里只负责不再取包。
    fn wait_while_paused(&mut self) -> bool {
        info!("{} ⏸️ 暂停", log_ctx());
        let stop = self.control.stop_signal();
        while self.control.is_paused() {
            if stop.wait_timeout(self.engine.pause_poll()) {
                return false;
            }
        }
        info!("{} ▶️ 继续播放", log_ctx());
        true
    }

    /// 应用播放器转发过来的尺寸和终端几何变化
    fn apply_pending_changes(&mut self) {
        let size = self.control.take_pending_size();
        let geometry = self.control.take_pending_geometry();
        if size.is_none() && geometry.is_none() {
            return;
        }

        if let Some(bounds) = size {
            self.bounds = bounds;
        }
        if let Some(geometry) = geometry {
            self.geometry = Some(geometry);
            if let (Some(profile), Some(cell_height)) = (self.profile.as_deref_mut(), geometry.cell_height()) {
                profile.resize(cell_height);
            }
        }

        let layout = Layout::compute(self.video.source_size(), self.bounds, self.geometry.as_ref());
        if layout != *self.layout {
            info!("{} 📐 布局变化: {}x{} @ {:?}", log_ctx(), layout.width, layout.height, layout.video_pos);
            self.video.set_size(layout.width, layout.height);
            *self.layout = layout;
        }
    }

    /// 视频帧 → 头像 → GIF
    fn present(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<()> {
        let (row, col) = self.layout.video_pos;
        self.sink.render_image(&ImagePlacement {
            data: rgb,
            format: PixelFormat::RGB,
            width,
            height,
            id: VIDEO_IMAGE_ID,
            row,
            col,
            synchronized: true,
        })?;
        self.stats.frames_rendered += 1;

        if let (Some(profile), Some((row, col))) = (self.profile.as_deref(), self.layout.profile_pos) {
            let (width, height) = profile.size();
            self.sink.render_image(&ImagePlacement {
                data: profile.pixels(),
                format: PixelFormat::RGBA,
                width,
                height,
                id: PROFILE_IMAGE_ID,
                row,
                col,
                synchronized: false,
            })?;
        }

        self.gifs.lock().advance_and_render(Instant::now(), self.sink)
    }

    /// 视频包读完后等音频（或墙钟）走到最后一帧结束，避免循环播放时截掉尾音
    ///
    /// 暂停期间一直等待，暂停时间不计入等待上限。
    fn drain_tail(&mut self, last_end_pts: f64) {
        let limit = self.engine.tail_drain_limit();
        let stop = self.control.stop_signal();
        let mut waited = Duration::ZERO;
        while !self.control.is_stopped() {
            let paused = self.control.is_paused();
            if !paused {
                if self.clock.time() >= last_end_pts && self.clock.buffered_bytes() == 0 {
                    break;
                }
                if waited >= limit {
                    warn!("{} 等待音频尾部超时", log_ctx());
                    break;
                }
            }

            let step = if paused {
                self.engine.pause_poll()
            } else {
                (limit - waited).min(Duration::from_millis(10))
            };
            if stop.wait_timeout(step) {
                break;
            }
            if !paused {
                waited += step;
            }
        }
    }
}
