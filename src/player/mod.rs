// 播放器核心模块

pub mod audio_output;
pub mod decoder;
pub mod demuxer;
pub mod demuxer_source; // Demuxer 抽象接口
pub mod hw_decoder;
pub mod manager;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use audio_output::{AudioOutput, SampleBuffer};
pub use decoder::{AudioDecoder, AudioPacketDecoder, VideoDecoder, VideoFrameDecoder};
pub use demuxer::Demuxer;
pub use demuxer_source::{MediaPacket, PacketKind, PacketSource};
pub use manager::Player;
pub use session::{
    sync_action, PlaybackSession, SessionConfig, SessionControl, SessionParts, SessionStats, StopSignal, SyncAction,
};
