use crate::core::{PixelFormat, Result};
use crate::overlay::gif::GifAnimation;
use crate::renderer::{ImagePlacement, ImageSink, GIF_IMAGE_ID_BASE};
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 单次推进最多跳过的帧数，避免长时间暂停后空转
const MAX_CATCH_UP_FRAMES: usize = 1000;

/// 一个要显示的 GIF 角标（动画 + 格子位置）
#[derive(Debug, Clone)]
pub struct GifSlot {
    pub animation: Arc<GifAnimation>,
    pub row: u32,
    pub col: u32,
}

impl GifSlot {
    pub fn new(animation: Arc<GifAnimation>, row: u32, col: u32) -> Self {
        Self { animation, row, col }
    }
}

/// 正在显示的 GIF 及其播放进度
struct ActiveGif {
    slot: GifSlot,
    image_id: u32,
    frame: usize,
    frame_started: Instant,
}

/// 管理当前可见的 GIF 角标
///
/// 同一个动画对象（`Arc` 指针相同）在多次 `set_slots` 之间保持帧进度和图像 ID，
/// 只有新出现的动画从第 0 帧开始，消失的动画会从终端删除。
#[derive(Default)]
pub struct GifTracker {
    active: Vec<ActiveGif>,
    free_ids: Vec<u32>,
    next_id: u32,
}

impl GifTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 替换可见 GIF 列表
    pub fn set_slots(&mut self, slots: Vec<GifSlot>, sink: &dyn ImageSink) -> Result<()> {
        let now = Instant::now();
        let mut previous: Vec<Option<ActiveGif>> = self.active.drain(..).map(Some).collect();

        // 每个旧条目最多被认领一次
        let matched: Vec<(GifSlot, Option<ActiveGif>)> = slots
            .into_iter()
            .map(|slot| {
                let retained = previous
                    .iter_mut()
                    .find(|old| old.as_ref().is_some_and(|old| Arc::ptr_eq(&old.slot.animation, &slot.animation)))
                    .and_then(Option::take);
                (slot, retained)
            })
            .collect();

        // 先删除消失的，它们的 ID 可以立即分给新出现的动画
        for gone in previous.into_iter().flatten() {
            debug!("GIF 移除, 图像 ID {}", gone.image_id);
            self.free_ids.push(gone.image_id);
            sink.delete_image(gone.image_id)?;
        }

        let active = matched
            .into_iter()
            .map(|(slot, retained)| match retained {
                Some(mut old) => {
                    old.slot = slot;
                    old
                }
                None => ActiveGif {
                    slot,
                    image_id: self.allocate_id(),
                    frame: 0,
                    frame_started: now,
                },
            })
            .collect();
        self.active = active;
        Ok(())
    }

    /// 删除所有 GIF
    pub fn clear(&mut self, sink: &dyn ImageSink) -> Result<()> {
        for gif in self.active.drain(..) {
            self.free_ids.push(gif.image_id);
            sink.delete_image(gif.image_id)?;
        }
        Ok(())
    }

    /// 推进到期的 GIF 帧，并重新绘制所有可见 GIF
    ///
    /// 每个视频帧都会替换整块视频图像，叠在上面的角标必须跟着重发。
    pub fn advance_and_render(&mut self, now: Instant, sink: &dyn ImageSink) -> Result<()> {
        for gif in &mut self.active {
            let anim = &gif.slot.animation;
            if anim.frame_count() == 0 {
                continue;
            }

            let steps = if anim.frame_count() > 1 { MAX_CATCH_UP_FRAMES } else { 0 };
            for _ in 0..steps {
                let delay = anim.delays.get(gif.frame).copied().unwrap_or(Duration::from_millis(100));
                if now.saturating_duration_since(gif.frame_started) < delay {
                    break;
                }
                gif.frame = (gif.frame + 1) % anim.frame_count();
                gif.frame_started += delay;
            }
            if now.saturating_duration_since(gif.frame_started) > Duration::from_secs(1) {
                // 跟不上时直接对齐到当前时间
                gif.frame_started = now;
            }

            let placement = ImagePlacement {
                data: &anim.frames[gif.frame],
                format: PixelFormat::RGBA,
                width: anim.width,
                height: anim.height,
                id: gif.image_id,
                row: gif.slot.row,
                col: gif.slot.col,
                synchronized: false,
            };
            if let Err(e) = sink.render_image(&placement) {
                warn!("GIF 渲染失败 (ID {}): {}", gif.image_id, e);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// (图像 ID, 当前帧) 列表，顺序与最近一次 `set_slots` 相同
    pub fn snapshot(&self) -> Vec<(u32, usize)> {
        self.active.iter().map(|gif| (gif.image_id, gif.frame)).collect()
    }

    fn allocate_id(&mut self) -> u32 {
        if let Some(id) = self.free_ids.pop() {
            return id;
        }
        let id = GIF_IMAGE_ID_BASE + self.next_id;
        self.next_id += 1;
        id
    }
}
