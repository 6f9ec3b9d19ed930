use crate::core::{DecodedAudioChunk, DecodedVideoFrame, PlayerError, Result, AUDIO_CHANNELS};
use crate::player::audio_output::SampleBuffer;
use crate::player::demuxer::rational_to_seconds;
use crate::player::hw_decoder::{HWAccelType, HwDevice};
use ffmpeg_next as ffmpeg;
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::format::{sample, Pixel, Sample};
use ffmpeg::{codec, software, util, Packet, Rational};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;

/// 视频解码接口（播放会话只依赖它）
pub trait VideoFrameDecoder: Send {
    /// 送入一个包，最多返回一帧；`Ok(None)` 表示解码器还需要更多输入
    fn decode_packet(&mut self, packet: &Packet) -> Result<Option<DecodedVideoFrame>>;

    /// 设置输出尺寸（相同尺寸时无操作）
    fn set_size(&mut self, width: u32, height: u32);

    /// 源视频尺寸
    fn source_size(&self) -> (u32, u32);
}

/// 音频解码接口：解码结果直接写入共享采样缓冲区
pub trait AudioPacketDecoder: Send {
    /// 返回本次写入缓冲区的音频块数量
    fn decode_packet(&mut self, packet: &Packet, pts: f64) -> Result<usize>;
}

fn is_eagain(e: &ffmpeg::Error) -> bool {
    matches!(e, ffmpeg::Error::Other { errno } if *errno == ffmpeg::error::EAGAIN)
}

/// 缩放器缓存键：任意一项变化都要重建
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScalerKey {
    format: Pixel,
    width: u32,
    height: u32,
    dst_width: u32,
    dst_height: u32,
}

/// 视频解码器（优先硬件加速，失败时透明回退到软件解码）
pub struct VideoDecoder {
    decoder: codec::decoder::Video,
    hw_device: Option<HwDevice>,
    scaler: Option<(ScalerKey, software::scaling::Context)>,
    pending: VecDeque<(util::frame::Video, f64)>, // 已解码但未取走的帧（帧, 包时长）
    time_base: Rational,
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
}

// SwsContext 本身不是 Send，但每个解码器实例只会在渲染线程中使用
unsafe impl Send for VideoDecoder {}

impl VideoDecoder {
    /// 创建解码器
    ///
    /// `hardware` 为 true 且启用了 `hwaccel` feature 时，按平台优先级尝试硬件设备，
    /// 任何一步失败都回退到软件解码。
    pub fn new(params: codec::Parameters, time_base: Rational, hardware: bool) -> Result<Self> {
        let codec_id = params.id();
        let codec = ffmpeg::decoder::find(codec_id)
            .ok_or_else(|| PlayerError::DecoderNotFound(format!("{:?}", codec_id)))?;

        if hardware && cfg!(feature = "hwaccel") {
            if let Some(device) = HwDevice::probe(&codec, HWAccelType::preferred()) {
                match Self::open_codec(params.clone(), Some(&device)) {
                    Ok(decoder) => {
                        info!("🎬 使用硬件解码: {}", device.kind().name());
                        return Ok(Self::with_decoder(decoder, Some(device), time_base));
                    }
                    Err(e) => warn!("✗ {} 打开解码器失败，回退软件解码: {}", device.kind().name(), e),
                }
            }
        }

        let decoder = Self::open_codec(params, None)?;
        info!("🎬 使用软件解码: {}", codec.name());
        Ok(Self::with_decoder(decoder, None, time_base))
    }

    fn open_codec(params: codec::Parameters, device: Option<&HwDevice>) -> Result<codec::decoder::Video> {
        let mut context = codec::context::Context::from_parameters(params)?;
        if let Some(device) = device {
            unsafe {
                (*context.as_mut_ptr()).hw_device_ctx = device.new_ref();
            }
        }
        Ok(context.decoder().video()?)
    }

    fn with_decoder(decoder: codec::decoder::Video, hw_device: Option<HwDevice>, time_base: Rational) -> Self {
        let (width, height) = (decoder.width(), decoder.height());
        debug!("视频解码器: {}x{}, 格式: {:?}, 时间基: {}", width, height, decoder.format(), time_base);
        Self {
            decoder,
            hw_device,
            scaler: None,
            pending: VecDeque::new(),
            time_base,
            src_width: width,
            src_height: height,
            dst_width: width,
            dst_height: height,
        }
    }

    /// 是否使用硬件加速
    pub fn is_hardware_accelerated(&self) -> bool {
        self.hw_device.is_some()
    }

    /// 获取解码器信息
    pub fn info(&self) -> String {
        format!(
            "{}x{} -> {}x{}, 硬件加速: {}",
            self.src_width,
            self.src_height,
            self.dst_width,
            self.dst_height,
            self.hw_device.as_ref().map(|d| d.kind().name()).unwrap_or("无")
        )
    }

    /// 取走解码器里所有可用的帧
    fn receive_frames(&mut self, duration: f64) -> Result<()> {
        loop {
            let mut frame = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => self.pending.push_back((frame, duration)),
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) if is_eagain(&e) => return Ok(()),
                Err(e) => return Err(PlayerError::DecodeError(format!("接收视频帧失败: {}", e))),
            }
        }
    }

    /// 硬件帧转 CPU，缩放为 RGB24 并复制出来；缩放失败只丢弃这一帧
    fn convert_frame(&mut self, frame: util::frame::Video, duration: f64) -> Result<Option<DecodedVideoFrame>> {
        let raw_pts = frame.timestamp().or_else(|| frame.pts()).unwrap_or(0);
        let pts = rational_to_seconds(raw_pts, self.time_base);

        let frame = match &self.hw_device {
            Some(device) if device.owns_frame(&frame) => device
                .transfer(&frame)
                .map_err(|e| PlayerError::DecodeError(format!("硬件帧传输失败: {}", e)))?,
            _ => frame,
        };

        let (width, height) = (self.dst_width, self.dst_height);
        match self.scale(&frame, width, height) {
            Ok(data) => Ok(Some(DecodedVideoFrame { data, width, height, pts, duration })),
            Err(e) => {
                warn!("视频帧缩放失败（已跳过）: {}", e);
                Ok(None)
            }
        }
    }

    fn scale(&mut self, frame: &util::frame::Video, dst_width: u32, dst_height: u32) -> std::result::Result<Vec<u8>, ffmpeg::Error> {
        let key = ScalerKey {
            format: frame.format(),
            width: frame.width(),
            height: frame.height(),
            dst_width,
            dst_height,
        };

        let scaler = match &mut self.scaler {
            Some((cached, scaler)) if *cached == key => scaler,
            slot => {
                debug!(
                    "🔧 重建缩放器: {:?} {}x{} -> RGB24 {}x{}",
                    key.format, key.width, key.height, dst_width, dst_height
                );
                let scaler = software::scaling::Context::get(
                    key.format,
                    key.width,
                    key.height,
                    Pixel::RGB24,
                    dst_width,
                    dst_height,
                    software::scaling::Flags::BILINEAR,
                )?;
                &mut slot.insert((key, scaler)).1
            }
        };

        let mut rgb_frame = util::frame::Video::empty();
        scaler.run(frame, &mut rgb_frame)?;

        // 按行复制（stride 可能大于 width * 3）
        let row_size = dst_width as usize * 3;
        let stride = rgb_frame.stride(0);
        let frame_data = rgb_frame.data(0);
        let mut data = vec![0u8; row_size * dst_height as usize];
        for (y, dst_row) in data.chunks_exact_mut(row_size).enumerate() {
            let src_offset = y * stride;
            dst_row.copy_from_slice(&frame_data[src_offset..src_offset + row_size]);
        }
        Ok(data)
    }
}

impl VideoFrameDecoder for VideoDecoder {
    fn decode_packet(&mut self, packet: &Packet) -> Result<Option<DecodedVideoFrame>> {
        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => debug!("视频解码器已结束，忽略本次包"),
            Err(e) => return Err(PlayerError::DecodeError(format!("发送视频包失败: {}", e))),
        }

        let duration = rational_to_seconds(packet.duration(), self.time_base);
        self.receive_frames(duration)?;

        match self.pending.pop_front() {
            Some((frame, duration)) => self.convert_frame(frame, duration),
            None => Ok(None),
        }
    }

    fn set_size(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || (width == self.dst_width && height == self.dst_height) {
            return;
        }
        debug!("视频输出尺寸: {}x{} -> {}x{}", self.dst_width, self.dst_height, width, height);
        self.dst_width = width;
        self.dst_height = height;
    }

    fn source_size(&self) -> (u32, u32) {
        (self.src_width, self.src_height)
    }
}

/// 重采样器缓存键
#[derive(Debug, Clone, Copy, PartialEq)]
struct ResamplerKey {
    format: Sample,
    layout: ChannelLayout,
    rate: u32,
}

/// 音频解码器：解码并重采样为 s16 交错立体声，写入共享采样缓冲区
pub struct AudioDecoder {
    decoder: codec::decoder::Audio,
    resampler: Option<(ResamplerKey, software::resampling::Context)>,
    target_sample_rate: u32,
    buffer: Arc<SampleBuffer>,
}

// SwrContext 本身不是 Send，但每个解码器实例只会在音频解码线程中使用
unsafe impl Send for AudioDecoder {}

impl AudioDecoder {
    pub fn new(params: codec::Parameters, target_sample_rate: u32, buffer: Arc<SampleBuffer>) -> Result<Self> {
        let decoder = codec::context::Context::from_parameters(params)?.decoder().audio()?;

        debug!(
            "音频解码器: {} Hz, {} 声道, 格式: {:?} → 目标: {} Hz, {} 声道",
            decoder.rate(),
            decoder.channels(),
            decoder.format(),
            target_sample_rate,
            AUDIO_CHANNELS
        );

        Ok(Self {
            decoder,
            resampler: None,
            target_sample_rate,
            buffer,
        })
    }

    /// 重采样一帧；每次都分配新的输出帧
    fn convert_frame(&mut self, mut frame: util::frame::Audio, pts: f64) -> std::result::Result<Option<DecodedAudioChunk>, ffmpeg::Error> {
        if frame.channel_layout().is_empty() {
            frame.set_channel_layout(ChannelLayout::default(frame.channels() as i32));
        }
        let key = ResamplerKey {
            format: frame.format(),
            layout: frame.channel_layout(),
            rate: frame.rate(),
        };
        let target_rate = self.target_sample_rate;
        let output_format = Sample::I16(sample::Type::Packed);

        let resampler = match &mut self.resampler {
            Some((cached, resampler)) if *cached == key => resampler,
            slot => {
                debug!(
                    "🔧 初始化音频重采样器: {:?} {}Hz/{}ch → s16 {}Hz/{}ch",
                    key.format,
                    key.rate,
                    key.layout.channels(),
                    target_rate,
                    AUDIO_CHANNELS
                );
                let resampler = software::resampling::Context::get(
                    key.format,
                    key.layout,
                    key.rate,
                    output_format,
                    ChannelLayout::STEREO,
                    target_rate,
                )?;
                &mut slot.insert((key, resampler)).1
            }
        };

        // 输出容量按采样率比例放大，避免升采样时样本积压在重采样器里
        let capacity = (frame.samples() as u64 * target_rate as u64 / key.rate.max(1) as u64) as usize + 256;
        let mut resampled = util::frame::Audio::new(output_format, capacity, ChannelLayout::STEREO);
        resampler.run(&frame, &mut resampled)?;

        let samples = resampled.samples();
        if samples == 0 {
            return Ok(None);
        }
        let byte_len = samples * AUDIO_CHANNELS as usize * 2;
        Ok(Some(DecodedAudioChunk {
            data: resampled.data(0)[..byte_len].to_vec(),
            sample_rate: target_rate,
            channels: AUDIO_CHANNELS,
            pts,
        }))
    }
}

impl AudioPacketDecoder for AudioDecoder {
    fn decode_packet(&mut self, packet: &Packet, pts: f64) -> Result<usize> {
        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("音频解码器已结束，忽略本次包");
                return Ok(0);
            }
            Err(e) => return Err(PlayerError::DecodeError(format!("发送音频包失败: {}", e))),
        }

        let mut chunks = 0;
        loop {
            let mut decoded_frame = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded_frame) {
                Ok(()) => match self.convert_frame(decoded_frame, pts) {
                    Ok(Some(chunk)) => {
                        self.buffer.push_chunk(&chunk);
                        chunks += 1;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("音频重采样失败（已跳过）: {}", e),
                },
                Err(ffmpeg::Error::Eof) => break,
                Err(e) if is_eagain(&e) => break,
                Err(e) => return Err(PlayerError::DecodeError(format!("接收音频帧失败: {}", e))),
            }
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::ffi;

    /// 16x8 的 rawvideo RGB24 流参数
    fn rawvideo_params(width: i32, height: i32) -> codec::Parameters {
        let mut params = codec::Parameters::new();
        unsafe {
            let p = params.as_mut_ptr();
            (*p).codec_type = ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
            (*p).codec_id = ffi::AVCodecID::AV_CODEC_ID_RAWVIDEO;
            (*p).width = width;
            (*p).height = height;
            (*p).format = ffi::AVPixelFormat::AV_PIX_FMT_RGB24 as i32;
        }
        params
    }

    fn gradient(width: usize, height: usize) -> Vec<u8> {
        (0..width * height * 3).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn decodes_rawvideo_to_rgb_with_seconds_pts() {
        crate::init();
        let mut decoder = VideoDecoder::new(rawvideo_params(16, 8), Rational::new(1, 30), false).unwrap();
        assert!(!decoder.is_hardware_accelerated());
        assert_eq!(decoder.source_size(), (16, 8));

        let pixels = gradient(16, 8);
        let mut packet = Packet::copy(&pixels);
        packet.set_pts(Some(3));
        packet.set_duration(1);

        let frame = decoder.decode_packet(&packet).unwrap().expect("rawvideo 每个包都出一帧");
        assert_eq!((frame.width, frame.height), (16, 8));
        assert_eq!(frame.data, pixels);
        assert!((frame.pts - 0.1).abs() < 1e-9);
        assert!((frame.duration - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn set_size_rebuilds_scaler_for_next_frame() {
        crate::init();
        let mut decoder = VideoDecoder::new(rawvideo_params(16, 8), Rational::new(1, 30), false).unwrap();
        let pixels = gradient(16, 8);

        decoder.set_size(8, 4);
        decoder.set_size(8, 4);
        let frame = decoder.decode_packet(&Packet::copy(&pixels)).unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (8, 4));
        assert_eq!(frame.data.len(), 8 * 4 * 3);

        // 0 尺寸被忽略
        decoder.set_size(0, 0);
        let frame = decoder.decode_packet(&Packet::copy(&pixels)).unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (8, 4));
    }
}
