use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("无法打开文件: {0}")]
    OpenError(String),

    #[error("无法找到视频流")]
    NoVideoStream,

    #[error("找不到解码器: {0}")]
    DecoderNotFound(String),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("渲染错误: {0}")]
    RenderError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("图像错误: {0}")]
    ImageError(String),

    #[error("配置错误: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("其他错误: {0}")]
    Other(String),
}

impl From<image::ImageError> for PlayerError {
    fn from(e: image::ImageError) -> Self {
        PlayerError::ImageError(e.to_string())
    }
}

impl From<gif::DecodingError> for PlayerError {
    fn from(e: gif::DecodingError) -> Self {
        PlayerError::ImageError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
