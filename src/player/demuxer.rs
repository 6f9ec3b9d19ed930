use crate::core::{MediaInfo, PlayerError, Result};
use crate::player::demuxer_source::{MediaPacket, PacketKind, PacketSource};
use ffmpeg_next as ffmpeg;
use ffmpeg::{codec, format, media, Rational};
use log::{debug, info};

/// 解封装器 - 负责读取媒体文件并分离音视频流
///
/// 输入上下文在 `Drop` 时由 ffmpeg-next 关闭，只会发生一次。
pub struct Demuxer {
    input_ctx: format::context::Input,
    video_stream_index: usize,
    audio_stream_index: Option<usize>,
    video_time_base: Rational,
    audio_time_base: Option<Rational>,
    media_info: MediaInfo, // 缓存媒体信息
    source_path: String,   // 媒体源路径（用于描述）
}

// 格式上下文只在解封装线程里读取
unsafe impl Send for Demuxer {}

impl Demuxer {
    /// 打开本地媒体文件
    pub fn open(path: &str) -> Result<Self> {
        info!("正在打开文件: {}", path);

        let input_ctx = format::input(&path)
            .map_err(|e| PlayerError::OpenError(format!("{}: {}", path, e)))?;

        // 查找视频流和音频流（视频必需，音频可选）
        let (video_stream_index, video_time_base) = input_ctx
            .streams()
            .best(media::Type::Video)
            .map(|s| (s.index(), s.time_base()))
            .ok_or(PlayerError::NoVideoStream)?;

        let audio = input_ctx
            .streams()
            .best(media::Type::Audio)
            .map(|s| (s.index(), s.time_base()));

        debug!("视频流索引: {}", video_stream_index);
        debug!("音频流索引: {:?}", audio.map(|(idx, _)| idx));

        let mut demuxer = Self {
            input_ctx,
            video_stream_index,
            audio_stream_index: audio.map(|(idx, _)| idx),
            video_time_base,
            audio_time_base: audio.map(|(_, tb)| tb),
            media_info: MediaInfo::default(),
            source_path: path.to_string(),
        };

        demuxer.media_info = demuxer.extract_media_info()?;
        info!(
            "✅ 媒体信息: {}x{} @ {:.2}fps, 视频 {}, 音频 {} ({}Hz/{}ch), 时长 {:.1}s",
            demuxer.media_info.width,
            demuxer.media_info.height,
            demuxer.media_info.fps,
            demuxer.media_info.video_codec,
            demuxer.media_info.audio_codec,
            demuxer.media_info.sample_rate,
            demuxer.media_info.channels,
            demuxer.media_info.duration,
        );

        Ok(demuxer)
    }

    /// 提取媒体信息（内部使用）
    fn extract_media_info(&self) -> Result<MediaInfo> {
        let video_stream = self
            .input_ctx
            .stream(self.video_stream_index)
            .ok_or(PlayerError::NoVideoStream)?;

        let video_params = video_stream.parameters();
        let video_codec_name = video_params.id().name().to_string();

        let video_decoder = codec::context::Context::from_parameters(video_params)?
            .decoder()
            .video()?;

        let rate = video_stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        // 微秒转秒（未知时长为负数）
        let duration = (self.input_ctx.duration().max(0) as f64) / ffmpeg::ffi::AV_TIME_BASE as f64;

        let (audio_codec_name, sample_rate, channels) = match self.audio_parameters() {
            Some(params) => {
                let codec_name = params.id().name().to_string();
                let audio_decoder = codec::context::Context::from_parameters(params)?
                    .decoder()
                    .audio()?;
                (codec_name, audio_decoder.rate(), audio_decoder.channels())
            }
            None => ("none".to_string(), 0, 0),
        };

        Ok(MediaInfo {
            duration,
            width: video_decoder.width(),
            height: video_decoder.height(),
            fps,
            video_codec: video_codec_name,
            audio_codec: audio_codec_name,
            sample_rate,
            channels,
        })
    }

    /// 视频流编解码参数
    pub fn video_parameters(&self) -> Result<codec::Parameters> {
        self.input_ctx
            .stream(self.video_stream_index)
            .map(|s| s.parameters())
            .ok_or(PlayerError::NoVideoStream)
    }

    /// 音频流编解码参数（无音轨时为 None）
    pub fn audio_parameters(&self) -> Option<codec::Parameters> {
        self.audio_stream_index
            .and_then(|idx| self.input_ctx.stream(idx))
            .map(|s| s.parameters())
    }

    pub fn video_time_base(&self) -> Rational {
        self.video_time_base
    }
}

/// `pts * tb.num / tb.den`
pub fn rational_to_seconds(pts: i64, time_base: Rational) -> f64 {
    if time_base.denominator() == 0 {
        return 0.0;
    }
    pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}

impl PacketSource for Demuxer {
    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input_ctx) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(e.into()),
            }

            let stream_index = packet.stream();
            if stream_index == self.video_stream_index {
                return Ok(Some(MediaPacket { packet, kind: PacketKind::Video }));
            }
            if Some(stream_index) == self.audio_stream_index {
                return Ok(Some(MediaPacket { packet, kind: PacketKind::Audio }));
            }
            // 其他流的包直接丢弃，继续循环
        }
    }

    fn pts_to_seconds(&self, pts: i64, kind: PacketKind) -> f64 {
        match kind {
            PacketKind::Video => rational_to_seconds(pts, self.video_time_base),
            PacketKind::Audio => self
                .audio_time_base
                .map(|tb| rational_to_seconds(pts, tb))
                .unwrap_or(0.0),
        }
    }

    fn has_audio(&self) -> bool {
        self.audio_stream_index.is_some()
    }

    fn description(&self) -> String {
        let info = &self.media_info;
        format!(
            "FFmpeg Demuxer: {} ({}x{} @ {:.2}fps, {:.1}s)",
            self.source_path, info.width, info.height, info.fps, info.duration
        )
    }
}
