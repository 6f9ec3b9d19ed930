use crate::core::{PlayerError, Result};
use gif::DisposalMethod;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use log::info;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// 低于这个延迟的帧按 [`FALLBACK_DELAY`] 播放
const MIN_DELAY: Duration = Duration::from_millis(20);
const FALLBACK_DELAY: Duration = Duration::from_millis(100);

/// 预解码、预缩放好的 GIF 动画（只读，多个位置共享同一个 `Arc`）
#[derive(Debug)]
pub struct GifAnimation {
    pub frames: Vec<Vec<u8>>, // 每帧 RGBA
    pub delays: Vec<Duration>,
    pub width: u32,
    pub height: u32,
}

impl GifAnimation {
    /// 解码所有帧，按处置方式合成到画布上，再缩放到 `height_px` 高
    pub fn load(path: impl AsRef<Path>, height_px: u32) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;

        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut reader = options.read_info(file)?;

        let (width, height) = (reader.width() as usize, reader.height() as usize);
        let mut canvas = vec![0u8; width * height * 4];
        let mut composited = Vec::new();
        let mut delays = Vec::new();

        while let Some(frame) = reader.read_next_frame()? {
            let previous = (frame.dispose == DisposalMethod::Previous).then(|| canvas.clone());

            let rect = FrameRect::clip(frame, width, height);
            draw_over(&mut canvas, width, &frame.buffer, frame.width as usize, &rect);
            composited.push(canvas.clone());

            let delay = Duration::from_millis(frame.delay as u64 * 10);
            delays.push(if delay < MIN_DELAY { FALLBACK_DELAY } else { delay });

            match frame.dispose {
                DisposalMethod::Background => clear_rect(&mut canvas, width, &rect),
                DisposalMethod::Previous => {
                    if let Some(previous) = previous {
                        canvas = previous;
                    }
                }
                DisposalMethod::Any | DisposalMethod::Keep => {}
            }
        }

        if composited.is_empty() || width == 0 || height == 0 {
            return Err(PlayerError::ImageError(format!("GIF 没有可用帧: {}", path.display())));
        }

        let dst_h = height_px.max(1);
        let dst_w = ((dst_h as u64 * width as u64) / height as u64).max(1) as u32;
        let frames = composited
            .into_iter()
            .map(|canvas| {
                let canvas = RgbaImage::from_raw(width as u32, height as u32, canvas)
                    .ok_or_else(|| PlayerError::ImageError(format!("GIF 画布尺寸异常: {}", path.display())))?;
                if canvas.dimensions() == (dst_w, dst_h) {
                    return Ok(canvas.into_raw());
                }
                Ok(imageops::resize(&canvas, dst_w, dst_h, FilterType::Triangle).into_raw())
            })
            .collect::<Result<Vec<_>>>()?;

        info!("✅ GIF 已加载: {} ({} 帧, {}x{} → {}x{})", path.display(), frames.len(), width, height, dst_w, dst_h);

        Ok(Self { frames, delays, width: dst_w, height: dst_h })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// 帧在画布上的区域（已裁剪到画布范围内）
struct FrameRect {
    left: usize,
    top: usize,
    width: usize,
    height: usize,
}

impl FrameRect {
    fn clip(frame: &gif::Frame<'_>, canvas_w: usize, canvas_h: usize) -> Self {
        let left = (frame.left as usize).min(canvas_w);
        let top = (frame.top as usize).min(canvas_h);
        Self {
            left,
            top,
            width: (frame.width as usize).min(canvas_w - left),
            height: (frame.height as usize).min(canvas_h - top),
        }
    }
}

/// 把帧画到画布上，完全透明的像素不覆盖
fn draw_over(canvas: &mut [u8], canvas_w: usize, buffer: &[u8], frame_w: usize, rect: &FrameRect) {
    for y in 0..rect.height {
        for x in 0..rect.width {
            let src = (y * frame_w + x) * 4;
            let Some(pixel) = buffer.get(src..src + 4) else { continue };
            if pixel[3] == 0 {
                continue;
            }
            let dst = ((rect.top + y) * canvas_w + rect.left + x) * 4;
            canvas[dst..dst + 4].copy_from_slice(pixel);
        }
    }
}

/// 恢复为背景（透明）
fn clear_rect(canvas: &mut [u8], canvas_w: usize, rect: &FrameRect) {
    for y in rect.top..rect.top + rect.height {
        let start = (y * canvas_w + rect.left) * 4;
        canvas[start..start + rect.width * 4].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    const RED: [u8; 3] = [255, 0, 0];
    const BLUE: [u8; 3] = [0, 0, 255];

    /// 画布 2x1；调色板 0=红 1=蓝 2=透明
    fn write_gif(path: &Path, frames: &[(u16, u16, Vec<u8>, DisposalMethod, u16)]) {
        let palette: Vec<u8> = [RED, BLUE, [0, 0, 0]].concat();
        let file = File::create(path).unwrap();
        let mut encoder = gif::Encoder::new(file, 2, 1, &palette).unwrap();
        for (left, width, indices, dispose, delay) in frames {
            let frame = gif::Frame {
                left: *left,
                top: 0,
                width: *width,
                height: 1,
                dispose: *dispose,
                delay: *delay,
                transparent: Some(2),
                buffer: Cow::Owned(indices.clone()),
                ..gif::Frame::default()
            };
            encoder.write_frame(&frame).unwrap();
        }
    }

    fn pixel(frame: &[u8], x: usize) -> [u8; 4] {
        frame[x * 4..x * 4 + 4].try_into().unwrap()
    }

    #[test]
    fn composites_partial_frames_with_disposal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("badge.gif");
        write_gif(
            &path,
            &[
                // 整幅红色，保留
                (0, 2, vec![0, 0], DisposalMethod::Keep, 5),
                // 右半边蓝色，之后恢复到上一帧
                (1, 1, vec![1], DisposalMethod::Previous, 0),
                // 左半边透明：应该还看到红色；之后清空为背景
                (0, 1, vec![2], DisposalMethod::Background, 3),
                // 右半边透明
                (1, 1, vec![2], DisposalMethod::Keep, 3),
            ],
        );

        let anim = GifAnimation::load(&path, 1).unwrap();
        assert_eq!(anim.frame_count(), 4);
        assert_eq!((anim.width, anim.height), (2, 1));

        let red = [255, 0, 0, 255];
        let blue = [0, 0, 255, 255];
        assert_eq!([pixel(&anim.frames[0], 0), pixel(&anim.frames[0], 1)], [red, red]);
        assert_eq!([pixel(&anim.frames[1], 0), pixel(&anim.frames[1], 1)], [red, blue]);
        // Previous 把蓝色撤掉
        assert_eq!([pixel(&anim.frames[2], 0), pixel(&anim.frames[2], 1)], [red, red]);
        // Background 清掉了左半边
        assert_eq!([pixel(&anim.frames[3], 0), pixel(&anim.frames[3], 1)], [[0, 0, 0, 0], red]);

        assert_eq!(anim.delays[0], Duration::from_millis(50));
        assert_eq!(anim.delays[1], FALLBACK_DELAY);
        assert_eq!(anim.delays[2], Duration::from_millis(30));
    }

    #[test]
    fn scales_to_height_keeping_aspect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.gif");
        write_gif(&path, &[(0, 2, vec![0, 1], DisposalMethod::Keep, 10)]);

        let anim = GifAnimation::load(&path, 10).unwrap();
        assert_eq!((anim.width, anim.height), (20, 10));
        assert_eq!(anim.frames[0].len(), 20 * 10 * 4);
        // 左边红，右边蓝
        assert_eq!(pixel(&anim.frames[0], 0), [255, 0, 0, 255]);
        assert_eq!(pixel(&anim.frames[0], 19), [0, 0, 255, 255]);
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(GifAnimation::load("/nonexistent/x.gif", 10), Err(PlayerError::IoError(_))));
    }
}
