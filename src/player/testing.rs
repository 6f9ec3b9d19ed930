//! 会话和播放器测试共用的合成组件

use crate::core::{DecodedAudioChunk, DecodedVideoFrame, PlayerError, Result, BYTES_PER_AUDIO_FRAME};
use crate::player::audio_output::SampleBuffer;
use crate::player::decoder::{AudioPacketDecoder, VideoFrameDecoder};
use crate::player::demuxer_source::{MediaPacket, PacketKind, PacketSource};
use crate::renderer::{ImagePlacement, ImageSink, VIDEO_IMAGE_ID};
use ffmpeg_next::Packet;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) const FPS: i64 = 30;

/// 合成的数据源：n 个视频包，pts = k (时间基 1/30)，可选每个视频包后跟一个音频包
pub(crate) struct FakeSource {
    next: i64,
    total: i64,
    pub(crate) with_audio: bool,
    pending_audio: bool,
}

impl FakeSource {
    pub(crate) fn video_only(total: i64) -> Self {
        Self { next: 0, total, with_audio: false, pending_audio: false }
    }
}

pub(crate) fn packet_with_pts(pts: i64) -> Packet {
    let mut packet = Packet::copy(&[0u8; 16]);
    packet.set_pts(Some(pts));
    packet.set_dts(Some(pts));
    packet.set_duration(1);
    packet
}

impl PacketSource for FakeSource {
    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        if self.pending_audio {
            self.pending_audio = false;
            return Ok(Some(MediaPacket {
                packet: packet_with_pts(self.next - 1),
                kind: PacketKind::Audio,
            }));
        }
        if self.next >= self.total {
            return Ok(None);
        }
        let packet = packet_with_pts(self.next);
        self.next += 1;
        self.pending_audio = self.with_audio;
        Ok(Some(MediaPacket { packet, kind: PacketKind::Video }))
    }

    fn pts_to_seconds(&self, pts: i64, _kind: PacketKind) -> f64 {
        pts as f64 / FPS as f64
    }

    fn has_audio(&self) -> bool {
        self.with_audio
    }

    fn description(&self) -> String {
        format!("fake source ({} packets)", self.total)
    }
}

/// 每个包出一帧；包序号不连续时记一次警告（模拟参考帧缺失）
pub(crate) struct FakeDecoder {
    pub(crate) expected: i64,
    warnings: Arc<AtomicUsize>,
    size: (u32, u32),
    pub(crate) source: (u32, u32),
    pub(crate) fail_at: Option<i64>,
}

impl FakeDecoder {
    pub(crate) fn new(warnings: Arc<AtomicUsize>) -> Self {
        Self { expected: 0, warnings, size: (4, 2), source: (4, 2), fail_at: None }
    }
}

impl VideoFrameDecoder for FakeDecoder {
    fn decode_packet(&mut self, packet: &Packet) -> Result<Option<DecodedVideoFrame>> {
        let pts = packet.pts().unwrap_or(0);
        if Some(pts) == self.fail_at {
            return Err(PlayerError::DecodeError("corrupt packet".to_string()));
        }
        if pts != self.expected {
            self.warnings.fetch_add(1, Ordering::SeqCst);
        }
        self.expected = pts + 1;
        Ok(Some(DecodedVideoFrame {
            data: vec![pts as u8; (self.size.0 * self.size.1 * 3) as usize],
            width: self.size.0,
            height: self.size.1,
            pts: pts as f64 / FPS as f64,
            duration: 1.0 / FPS as f64,
        }))
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn source_size(&self) -> (u32, u32) {
        self.source
    }
}

/// 每个音频包写入 1/30 秒的静音
pub(crate) struct FakeAudioDecoder {
    pub(crate) buffer: Arc<SampleBuffer>,
}

impl AudioPacketDecoder for FakeAudioDecoder {
    fn decode_packet(&mut self, _packet: &Packet, pts: f64) -> Result<usize> {
        let frames = self.buffer.sample_rate() as usize / FPS as usize;
        self.buffer.push_chunk(&DecodedAudioChunk {
            data: vec![0; frames * BYTES_PER_AUDIO_FRAME],
            sample_rate: self.buffer.sample_rate(),
            channels: 2,
            pts,
        });
        Ok(1)
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) rendered: Mutex<Vec<(u32, u32, u32, u32)>>, // (id, w, h, 首字节)
    pub(crate) deleted: Mutex<Vec<u32>>,
}

impl ImageSink for RecordingSink {
    fn render_image(&self, placement: &ImagePlacement<'_>) -> Result<()> {
        self.rendered.lock().push((
            placement.id,
            placement.width,
            placement.height,
            placement.data.first().copied().unwrap_or(0) as u32,
        ));
        Ok(())
    }

    fn delete_image(&self, id: u32) -> Result<()> {
        self.deleted.lock().push(id);
        Ok(())
    }
}

impl RecordingSink {
    pub(crate) fn video_frames(&self) -> usize {
        self.rendered.lock().iter().filter(|r| r.0 == VIDEO_IMAGE_ID).count()
    }
}
