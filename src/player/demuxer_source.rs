use crate::core::Result;
use ffmpeg_next as ffmpeg;
use ffmpeg::Packet;

/// Packet 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Video,
    Audio,
}

/// 媒体包
///
/// `Packet` 是只能移动的句柄，释放发生在它的 `Drop` 里，
/// 所以每个包只会沿着一条路径被释放（送入队列 / 解码后丢弃 / 直接丢弃）。
pub struct MediaPacket {
    pub packet: Packet,
    pub kind: PacketKind,
}

impl MediaPacket {
    /// 原始时间戳（流时间基单位），缺失 pts 时退回 dts
    pub fn raw_pts(&self) -> i64 {
        self.packet.pts().or_else(|| self.packet.dts()).unwrap_or(0)
    }
}

/// Demuxer 数据源抽象接口
///
/// 播放会话只依赖这个 trait，本地文件由 [`Demuxer`](super::Demuxer) 实现，
/// 测试中可以换成合成的包序列。
pub trait PacketSource: Send {
    /// 读取下一个媒体包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包（非音视频流的包已被跳过）
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误
    fn read_packet(&mut self) -> Result<Option<MediaPacket>>;

    /// 把流时间基下的时间戳转换为秒
    fn pts_to_seconds(&self, pts: i64, kind: PacketKind) -> f64;

    /// 是否存在音频流
    fn has_audio(&self) -> bool;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}
