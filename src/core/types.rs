use serde::{Deserialize, Serialize};

/// 输出声道数（固定立体声）
pub const AUDIO_CHANNELS: u16 = 2;

/// 每个立体声采样帧的字节数（s16le × 2 声道）
pub const BYTES_PER_AUDIO_FRAME: usize = 4;

/// 像素格式（同时决定 Kitty 协议里的 `f=` 值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 24 位 RGB（视频帧）
    RGB,
    /// 32 位 RGBA（头像 / GIF 叠加层）
    RGBA,
}

impl PixelFormat {
    /// Kitty 协议的 `f=` 取值
    pub fn kitty_format(self) -> u32 {
        match self {
            PixelFormat::RGB => 24,
            PixelFormat::RGBA => 32,
        }
    }
}

/// 解码后的视频帧（RGB24，数据已从解码器内部缓冲区复制出来）
#[derive(Debug, Clone)]
pub struct DecodedVideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pts: f64,      // 显示时间戳（秒）
    pub duration: f64, // 帧持续时间（秒）
}

impl DecodedVideoFrame {
    /// 帧结束时间（秒）
    pub fn end_pts(&self) -> f64 {
        self.pts + self.duration
    }
}

/// 解码并重采样后的音频块（s16le 交错立体声）
#[derive(Debug, Clone)]
pub struct DecodedAudioChunk {
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    pub pts: f64, // 源时间戳（秒）
}

/// 媒体信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: f64, // 总时长（秒）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// 播放器状态快照（供 UI 线程读取）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub playing: bool,
    pub paused: bool,
    pub muted: bool,
    pub volume: f64, // 0.0 - 1.0
    pub width: u32,
    pub height: u32,
    pub shared_memory: bool,
}
