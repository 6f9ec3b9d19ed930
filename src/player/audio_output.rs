use crate::core::{log_ctx, DecodedAudioChunk, MasterClock, PlayerError, Result, BYTES_PER_AUDIO_FRAME};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::SegQueue;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

/// 共享采样缓冲区 + 音频主时钟
///
/// 解码线程往里追加 s16 立体声采样，设备回调通过 [`SampleBuffer::pull`] 取走。
/// 时钟只按真正播放出去的采样帧推进，输出静音时不推进。
pub struct SampleBuffer {
    queue: SegQueue<[i16; 2]>,
    queued: AtomicUsize,   // 队列中的采样帧数
    consumed: AtomicU64,   // 已播放的采样帧数
    sample_rate: u32,
    started: AtomicBool,
    paused: AtomicBool,
    muted: AtomicBool,
    volume: AtomicU32, // f32 位模式
}

impl SampleBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            queue: SegQueue::new(),
            queued: AtomicUsize::new(0),
            consumed: AtomicU64::new(0),
            sample_rate: sample_rate.max(1),
            started: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// 追加一个解码块（s16le 交错立体声）
    ///
    /// 计数先于入队增加，回调取走的帧数永远不会超过 `queued`。
    pub fn push_chunk(&self, chunk: &DecodedAudioChunk) {
        let frames = chunk.data.len() / BYTES_PER_AUDIO_FRAME;
        self.queued.fetch_add(frames, Ordering::AcqRel);
        for frame in chunk.data.chunks_exact(BYTES_PER_AUDIO_FRAME) {
            let left = i16::from_le_bytes([frame[0], frame[1]]);
            let right = i16::from_le_bytes([frame[2], frame[3]]);
            self.queue.push([left, right]);
        }
    }

    /// 设备回调：填满 `out`（交错，`channels` 声道），返回实际消耗的采样帧数
    ///
    /// 未启动、暂停或数据耗尽时输出静音，但从不让设备停止回调。
    pub fn pull(&self, out: &mut [f32], channels: usize) -> usize {
        let channels = channels.max(1);
        if !self.started.load(Ordering::Acquire) || self.paused.load(Ordering::Acquire) {
            out.fill(0.0);
            return 0;
        }

        let gain = if self.muted.load(Ordering::Relaxed) { 0.0 } else { self.volume() };
        let mut played = 0;
        for frame in out.chunks_mut(channels) {
            let Some([left, right]) = self.queue.pop() else {
                frame.fill(0.0);
                continue;
            };
            played += 1;

            let left = left as f32 / 32768.0 * gain;
            let right = right as f32 / 32768.0 * gain;
            match frame {
                [mono] => *mono = (left + right) * 0.5,
                [l, r, rest @ ..] => {
                    *l = left;
                    *r = right;
                    rest.fill(0.0);
                }
                [] => {}
            }
        }

        if played > 0 {
            self.queued.fetch_sub(played, Ordering::AcqRel);
            self.consumed.fetch_add(played as u64, Ordering::AcqRel);
        }
        played
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}

impl MasterClock for SampleBuffer {
    fn time(&self) -> f64 {
        self.consumed.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn is_playing(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.paused.load(Ordering::Acquire)
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn buffered_bytes(&self) -> usize {
        self.queued.load(Ordering::Acquire) * BYTES_PER_AUDIO_FRAME
    }

    fn start(&self) {
        self.started.store(true, Ordering::Release);
    }

    fn reset(&self) {
        self.started.store(false, Ordering::Release);
        let mut drained = 0;
        while self.queue.pop().is_some() {
            drained += 1;
        }
        self.queued.fetch_sub(drained, Ordering::AcqRel);
        self.consumed.store(0, Ordering::Release);
    }
}

/// 音频输出 - 进程内唯一的 cpal 输出流
///
/// cpal::Stream 不是 Send，所以流由专门的 "reels-audio" 线程创建并一直持有；
/// 会话只通过 attach / detach 切换当前的采样来源，设备流本身从不停止。
pub struct AudioOutput {
    sample_rate: u32,
    source: Arc<Mutex<Option<Arc<SampleBuffer>>>>,
}

static GLOBAL_OUTPUT: OnceLock<std::result::Result<AudioOutput, String>> = OnceLock::new();

impl AudioOutput {
    /// 获取全局音频输出（第一次调用时初始化，之后的调用直接返回同一实例或同一错误）
    pub fn global(preferred_rate: u32) -> Result<&'static AudioOutput> {
        GLOBAL_OUTPUT
            .get_or_init(|| Self::spawn(preferred_rate))
            .as_ref()
            .map_err(|e| PlayerError::AudioError(e.clone()))
    }

    fn spawn(preferred_rate: u32) -> std::result::Result<AudioOutput, String> {
        info!("{} 初始化音频输出: 首选 {} Hz, 2 声道", log_ctx(), preferred_rate);

        let source: Arc<Mutex<Option<Arc<SampleBuffer>>>> = Arc::new(Mutex::new(None));
        let slot = source.clone();
        let (tx, rx) = crossbeam_channel::bounded(1);

        thread::Builder::new()
            .name("reels-audio".to_string())
            .spawn(move || match Self::open_stream(preferred_rate, slot) {
                Ok((stream, config)) => {
                    let _ = tx.send(Ok((config.sample_rate.0, config.channels)));
                    let _stream = stream;
                    loop {
                        thread::park();
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e.to_string()));
                }
            })
            .map_err(|e| format!("无法创建音频线程: {}", e))?;

        let (sample_rate, channels) = rx
            .recv()
            .map_err(|_| "音频线程意外退出".to_string())??;

        info!("🔊 音频输出已启动: {} Hz, {} 声道", sample_rate, channels);
        Ok(AudioOutput { sample_rate, source })
    }

    /// 打开默认设备并启动流（支持非标准配置自动回退）
    fn open_stream(
        preferred_rate: u32,
        slot: Arc<Mutex<Option<Arc<SampleBuffer>>>>,
    ) -> Result<(cpal::Stream, StreamConfig)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let candidates = [
            (preferred_rate, 2),
            (44100, 2),
            (48000, 2),
            (48000, 1),
            (44100, 1),
        ];

        let mut chosen = None;
        for (rate, channels) in candidates {
            let config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let supported = device
                .supported_output_configs()
                .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
                .any(|range| Self::is_config_compatible(&config, &range));
            if supported {
                chosen = Some(config);
                break;
            }
            warn!("⚠️  音频设备不支持 {} Hz, {} 声道配置，尝试下一个", rate, channels);
        }

        let config = chosen.ok_or_else(|| {
            PlayerError::AudioError(format!("音频设备不支持任何标准配置 (首选 {} Hz)", preferred_rate))
        })?;

        let channels = config.channels as usize;
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let source = slot.lock().clone();
                    match source {
                        Some(buffer) => {
                            buffer.pull(data, channels);
                        }
                        None => data.fill(0.0),
                    }
                },
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

        Ok((stream, config))
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;

        rate_in_range && config.channels == supported.channels()
    }

    /// 设备实际采样率（解码器重采样的目标）
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// 把会话的缓冲区接到设备上
    pub fn attach(&self, buffer: Arc<SampleBuffer>) {
        *self.source.lock() = Some(buffer);
        debug!("{} 音频来源已接入", log_ctx());
    }

    /// 断开（只在当前来源就是这个缓冲区时生效）
    pub fn detach(&self, buffer: &Arc<SampleBuffer>) {
        let mut source = self.source.lock();
        if source.as_ref().is_some_and(|current| Arc::ptr_eq(current, buffer)) {
            *source = None;
            debug!("{} 音频来源已断开", log_ctx());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AUDIO_CHANNELS;

    fn chunk(frames: &[(i16, i16)]) -> DecodedAudioChunk {
        let mut data = Vec::with_capacity(frames.len() * 4);
        for (l, r) in frames {
            data.extend_from_slice(&l.to_le_bytes());
            data.extend_from_slice(&r.to_le_bytes());
        }
        DecodedAudioChunk { data, sample_rate: 44100, channels: AUDIO_CHANNELS, pts: 0.0 }
    }

    #[test]
    fn silent_until_started() {
        let buffer = SampleBuffer::new(44100);
        buffer.push_chunk(&chunk(&[(1000, -1000); 8]));
        assert_eq!(buffer.buffered_bytes(), 32);

        let mut out = [1.0f32; 8];
        assert_eq!(buffer.pull(&mut out, 2), 0);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(buffer.time(), 0.0);
        assert_eq!(buffer.buffered_bytes(), 32);
    }

    #[test]
    fn clock_advances_only_by_consumed_frames() {
        let buffer = SampleBuffer::new(100);
        buffer.push_chunk(&chunk(&[(16384, -16384); 3]));
        buffer.start();

        let mut out = [1.0f32; 10]; // 5 帧，只有 3 帧有数据
        assert_eq!(buffer.pull(&mut out, 2), 3);
        assert_eq!(&out[..2], &[0.5, -0.5]);
        assert!(out[6..].iter().all(|s| *s == 0.0));
        assert!((buffer.time() - 0.03).abs() < 1e-9);
        assert_eq!(buffer.buffered_bytes(), 0);

        // 耗尽后继续输出静音，时钟不动
        assert_eq!(buffer.pull(&mut out, 2), 0);
        assert!((buffer.time() - 0.03).abs() < 1e-9);
    }

    #[test]
    fn paused_outputs_silence_and_keeps_data() {
        let buffer = SampleBuffer::new(100);
        buffer.push_chunk(&chunk(&[(100, 100); 4]));
        buffer.start();
        buffer.set_paused(true);
        assert!(!buffer.is_playing());

        let mut out = [1.0f32; 8];
        assert_eq!(buffer.pull(&mut out, 2), 0);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(buffer.buffered_bytes(), 16);

        buffer.set_paused(false);
        assert_eq!(buffer.pull(&mut out, 2), 4);
    }

    #[test]
    fn mute_and_volume_scale_output() {
        let buffer = SampleBuffer::new(100);
        buffer.push_chunk(&chunk(&[(16384, 16384); 2]));
        buffer.start();

        buffer.set_volume(0.5);
        let mut out = [0.0f32; 2];
        buffer.pull(&mut out, 2);
        assert_eq!(out, [0.25, 0.25]);

        buffer.set_muted(true);
        assert!(buffer.is_muted());
        buffer.pull(&mut out, 2);
        assert_eq!(out, [0.0, 0.0]);
        // 静音也算播放，时钟照常推进
        assert!((buffer.time() - 0.02).abs() < 1e-9);

        buffer.set_volume(3.0);
        assert_eq!(buffer.volume(), 1.0);
    }

    #[test]
    fn maps_stereo_onto_device_channels() {
        let buffer = SampleBuffer::new(100);
        buffer.push_chunk(&chunk(&[(16384, 0), (16384, 0)]));
        buffer.start();

        let mut mono = [1.0f32; 1];
        buffer.pull(&mut mono, 1);
        assert_eq!(mono, [0.25]);

        let mut surround = [1.0f32; 6];
        buffer.pull(&mut surround, 6);
        assert_eq!(surround, [0.5, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn reset_clears_queue_and_clock() {
        let buffer = SampleBuffer::new(100);
        buffer.push_chunk(&chunk(&[(1, 1); 10]));
        buffer.start();
        let mut out = [0.0f32; 4];
        buffer.pull(&mut out, 2);

        buffer.reset();
        assert_eq!(buffer.time(), 0.0);
        assert_eq!(buffer.buffered_bytes(), 0);
        assert!(!buffer.is_playing());
    }

    #[test]
    fn buffered_bytes_never_underflows_while_pulling_concurrently() {
        let buffer = Arc::new(SampleBuffer::new(44100));
        buffer.start();
        let done = Arc::new(AtomicBool::new(false));

        let consumer = {
            let buffer = buffer.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut out = [0.0f32; 16];
                let mut max_seen = 0;
                while !done.load(Ordering::Acquire) {
                    buffer.pull(&mut out, 2);
                    max_seen = max_seen.max(buffer.buffered_bytes());
                }
                max_seen
            })
        };

        let small = chunk(&[(1, 1); 8]);
        for _ in 0..20_000 {
            buffer.push_chunk(&small);
        }
        done.store(true, Ordering::Release);

        let max_seen = consumer.join().unwrap();
        // 上限是全部入队的字节数
        assert!(max_seen <= 20_000 * 32, "buffered_bytes 溢出: {}", max_seen);
        assert!(buffer.buffered_bytes() <= 20_000 * 32);
        assert_eq!(buffer.buffered_bytes() % BYTES_PER_AUDIO_FRAME, 0);
    }
}
