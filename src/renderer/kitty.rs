use crate::core::{log_ctx, PixelFormat, PlayerError, Result};
use crate::renderer::shm::SharedMemory;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::OnceLock;

/// 视频帧的图像 ID
pub const VIDEO_IMAGE_ID: u32 = 1;
/// 头像的图像 ID
pub const PROFILE_IMAGE_ID: u32 = VIDEO_IMAGE_ID + 100;
/// GIF 角标从这里开始分配 ID
pub const GIF_IMAGE_ID_BASE: u32 = 200;

/// 直接传输时每个分块的 base64 字节数
const CHUNK_SIZE: usize = 4096;

/// 一次图像放置请求
#[derive(Debug, Clone, Copy)]
pub struct ImagePlacement<'a> {
    pub data: &'a [u8],
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub id: u32,
    /// 目标格子（从 1 开始；0 表示左上角）
    pub row: u32,
    pub col: u32,
    /// 是否包在同步更新（?2026）里，只有主视频帧需要
    pub synchronized: bool,
}

/// 图像输出接口：播放会话和 GIF 跟踪器只依赖它
pub trait ImageSink: Send + Sync {
    fn render_image(&self, placement: &ImagePlacement<'_>) -> Result<()>;

    fn delete_image(&self, id: u32) -> Result<()>;
}

/// Kitty 图形协议渲染器
///
/// 每次放置都拼成一整块再一次性写出，避免和其他输出交错。
pub struct KittyRenderer {
    inner: Mutex<RendererInner>,
    is_terminal_output: bool,        // 输出是真正的终端（stdout）
    terminal_shm: OnceLock<bool>, // 终端探测结果，只探测一次
}

struct RendererInner {
    out: Box<dyn Write + Send>,
    shm: Option<SharedMemory>, // 平台支持时才有
    use_shm: bool,
    placed: HashSet<u32>, // 终端上还存在的图像
}

impl KittyRenderer {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        let shm = SharedMemory::is_supported().then(SharedMemory::new);
        info!("{} Kitty 渲染器已创建, 共享内存: {}", log_ctx(), if shm.is_some() { "可用" } else { "不可用" });
        Self::with_shared_memory(out, shm)
    }

    /// 指定共享内存实现（None 表示总是直接传输）
    pub fn with_shared_memory(out: Box<dyn Write + Send>, shm: Option<SharedMemory>) -> Self {
        Self {
            inner: Mutex::new(RendererInner {
                out,
                shm,
                use_shm: false,
                placed: HashSet::new(),
            }),
            is_terminal_output: false,
            terminal_shm: OnceLock::new(),
        }
    }

    pub fn stdout() -> Self {
        let mut renderer = Self::new(Box::new(io::stdout()));
        renderer.is_terminal_output = true;
        renderer
    }

    /// 更换输出流（已放置图像的记录保留）
    pub fn set_output(&self, out: Box<dyn Write + Send>) {
        self.inner.lock().out = out;
    }

    pub fn set_use_shared_memory(&self, enabled: bool) {
        let mut inner = self.inner.lock();
        if enabled && inner.shm.is_none() {
            debug!("当前平台不支持共享内存传输，继续使用直接传输");
        }
        inner.use_shm = enabled;
    }

    /// 按终端探测结果开关共享内存传输，返回是否开启
    ///
    /// 探测只做一次；非 stdout 输出或平台不支持时不探测，直接关闭。
    pub fn detect_shared_memory(&self) -> bool {
        let has_shm = self.inner.lock().shm.is_some();
        let supported = *self
            .terminal_shm
            .get_or_init(|| self.is_terminal_output && has_shm && SharedMemory::terminal_supports());
        self.set_use_shared_memory(supported);
        supported
    }

    /// 共享内存传输是否实际生效
    pub fn uses_shared_memory(&self) -> bool {
        let inner = self.inner.lock();
        inner.use_shm && inner.shm.is_some()
    }

    /// 删除本渲染器放置过的所有图像
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut buf = Vec::new();
        for id in inner.placed.drain() {
            write_delete(&mut buf, id);
        }
        if buf.is_empty() {
            return Ok(());
        }
        write_out(&mut *inner.out, &buf)?;
        Ok(())
    }

    /// 删除本实例遗留的共享内存文件
    pub fn cleanup_shared_memory(&self) {
        if let Some(shm) = self.inner.lock().shm.as_ref() {
            shm.cleanup();
        }
    }
}

impl ImageSink for KittyRenderer {
    fn render_image(&self, placement: &ImagePlacement<'_>) -> Result<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let mut buf = Vec::with_capacity(placement.data.len() * 4 / 3 + 256);

        if placement.synchronized {
            buf.extend_from_slice(b"\x1b[?2026h");
        }
        buf.extend_from_slice(b"\x1b7");

        // 同 ID 的旧图先删掉，避免移动或缩放后留下残影
        if inner.placed.contains(&placement.id) {
            write_delete(&mut buf, placement.id);
        }

        if placement.row > 0 && placement.col > 0 {
            buf.extend_from_slice(format!("\x1b[{};{}H", placement.row, placement.col).as_bytes());
        } else {
            buf.extend_from_slice(b"\x1b[H");
        }

        let mut sent = false;
        if inner.use_shm {
            if let Some(shm) = inner.shm.as_mut() {
                match shm.write(placement.data, placement.id) {
                    Ok(name) => {
                        write_shm_command(&mut buf, placement, &name);
                        sent = true;
                    }
                    Err(e) => warn!("共享内存写入失败，本帧改用直接传输: {}", e),
                }
            }
        }
        if !sent {
            write_direct(&mut buf, placement);
        }

        buf.extend_from_slice(b"\x1b8");
        if placement.synchronized {
            buf.extend_from_slice(b"\x1b[?2026l");
        }

        write_out(&mut *inner.out, &buf)?;
        inner.placed.insert(placement.id);
        Ok(())
    }

    fn delete_image(&self, id: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut buf = Vec::new();
        write_delete(&mut buf, id);
        write_out(&mut *inner.out, &buf)?;
        inner.placed.remove(&id);
        Ok(())
    }
}

/// 一次性写出并刷新；终端写入失败对渲染循环是致命错误
fn write_out(out: &mut (dyn Write + Send), buf: &[u8]) -> Result<()> {
    out.write_all(buf)
        .and_then(|()| out.flush())
        .map_err(|e| PlayerError::RenderError(format!("写入终端失败: {}", e)))
}

impl Drop for KittyRenderer {
    fn drop(&mut self) {
        self.cleanup_shared_memory();
    }
}

fn write_delete(buf: &mut Vec<u8>, id: u32) {
    buf.extend_from_slice(format!("\x1b_Ga=d,d=i,i={},q=2\x1b\\", id).as_bytes());
}

/// t=s：负载是共享内存名字的 base64，而不是像素
fn write_shm_command(buf: &mut Vec<u8>, placement: &ImagePlacement<'_>, name: &str) {
    buf.extend_from_slice(
        format!(
            "\x1b_Ga=T,f={},s={},v={},i={},t=s,q=2;{}\x1b\\",
            placement.format.kitty_format(),
            placement.width,
            placement.height,
            placement.id,
            STANDARD.encode(name)
        )
        .as_bytes(),
    );
}

/// 直接传输：像素 base64 后按 4096 字节分块，第一块带完整元数据
fn write_direct(buf: &mut Vec<u8>, placement: &ImagePlacement<'_>) {
    let encoded = STANDARD.encode(placement.data);
    let bytes = encoded.as_bytes();
    let chunk_count = bytes.len().div_ceil(CHUNK_SIZE).max(1);

    for index in 0..chunk_count {
        let start = index * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(bytes.len());
        let more = u8::from(index + 1 < chunk_count);

        if index == 0 {
            buf.extend_from_slice(
                format!(
                    "\x1b_Ga=T,f={},s={},v={},i={},q=2,m={};",
                    placement.format.kitty_format(),
                    placement.width,
                    placement.height,
                    placement.id,
                    more
                )
                .as_bytes(),
            );
        } else {
            buf.extend_from_slice(format!("\x1b_Gm={};", more).as_bytes());
        }
        buf.extend_from_slice(&bytes[start..end]);
        buf.extend_from_slice(b"\x1b\\");
    }
}
