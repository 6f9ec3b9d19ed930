use crate::core::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 引擎配置
///
/// 所有字段都有默认值，可以只在 JSON 中覆盖需要调整的项：
///
/// ```
/// let cfg = reels_player::EngineConfig::from_json(r#"{ "prebuffer_ms": 300 }"#).unwrap();
/// assert_eq!(cfg.prebuffer_ms, 300);
/// assert_eq!(cfg.video_queue_capacity, 30);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 音视频最大允许偏差（秒），超过则等待或丢帧
    pub sync_threshold_secs: f64,
    /// 视频超前时按比例休眠的系数（只修正一部分，避免过冲）
    pub sync_correction: f64,
    /// 视频包队列容量（约 1 秒 @30fps）
    pub video_queue_capacity: usize,
    /// 音频包队列容量
    pub audio_queue_capacity: usize,
    /// 启动前预缓冲的音频时长（毫秒）
    pub prebuffer_ms: u64,
    /// 暂停时轮询间隔（毫秒）
    pub pause_poll_ms: u64,
    /// 是否尝试硬件解码
    pub hardware_decode: bool,
    /// 首选音频输出采样率
    pub audio_sample_rate: u32,
    /// 视频包读完后等待音频尾部播放完的上限（毫秒）
    pub tail_drain_limit_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_threshold_secs: 0.1,
            sync_correction: 0.2,
            video_queue_capacity: 30,
            audio_queue_capacity: 64,
            prebuffer_ms: 200,
            pause_poll_ms: 50,
            hardware_decode: true,
            audio_sample_rate: 44100,
            tail_drain_limit_ms: 2000,
        }
    }
}

impl EngineConfig {
    /// 从 JSON 字符串解析（缺省字段使用默认值）
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }

    pub fn tail_drain_limit(&self) -> Duration {
        Duration::from_millis(self.tail_drain_limit_ms)
    }

    /// 预缓冲目标（字节），按给定采样率的 s16 立体声计算
    pub fn prebuffer_bytes(&self, sample_rate: u32) -> usize {
        let frames = sample_rate as u64 * self.prebuffer_ms / 1000;
        frames as usize * crate::core::BYTES_PER_AUDIO_FRAME
    }
}
