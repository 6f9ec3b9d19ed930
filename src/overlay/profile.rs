use crate::core::Result;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use log::{debug, info, warn};
use std::path::Path;

/// 圆形头像叠加层
///
/// 保留原图，终端字符格高度变化时按 `2 × 格高` 重新生成圆形裁剪后的 RGBA。
pub struct ProfileOverlay {
    source: RgbaImage,
    cell_height: u32,
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl ProfileOverlay {
    pub fn load(path: impl AsRef<Path>, cell_height: u32) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)?.to_rgba8();
        let (w, h) = image.dimensions();
        info!("✅ 头像已加载: {} ({}x{})", path.display(), w, h);
        Ok(Self::from_image(image, cell_height))
    }

    /// 从裸 RGBA 数据创建；长度不符时按透明图处理
    pub fn from_rgba(source: Vec<u8>, source_width: u32, source_height: u32, cell_height: u32) -> Self {
        let image = RgbaImage::from_raw(source_width, source_height, source).unwrap_or_else(|| {
            warn!("头像数据长度与 {}x{} 不符，使用透明图", source_width, source_height);
            RgbaImage::new(source_width, source_height)
        });
        Self::from_image(image, cell_height)
    }

    fn from_image(source: RgbaImage, cell_height: u32) -> Self {
        let mut overlay = Self {
            source,
            cell_height: 0,
            pixels: Vec::new(),
            width: 0,
            height: 0,
        };
        overlay.rebuild(cell_height);
        overlay
    }

    /// 格高变化时重新生成，返回是否变化
    pub fn resize(&mut self, cell_height: u32) -> bool {
        if cell_height == self.cell_height {
            return false;
        }
        self.rebuild(cell_height);
        true
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn rebuild(&mut self, cell_height: u32) {
        let size = cell_height.max(1) * 2;
        let (src_w, src_h) = self.source.dimensions();
        let (src_w, src_h) = (src_w.max(1), src_h.max(1));
        let (width, height) = if src_w > src_h {
            (size, (size * src_h / src_w).max(1))
        } else if src_h > src_w {
            ((size * src_w / src_h).max(1), size)
        } else {
            (size, size)
        };

        let mut pixels = if self.source.width() == 0 || self.source.height() == 0 {
            vec![0; (width * height * 4) as usize]
        } else {
            imageops::resize(&self.source, width, height, FilterType::Triangle).into_raw()
        };
        apply_circle_mask(&mut pixels, width, height);

        debug!("头像尺寸: {}x{} (格高 {})", width, height, cell_height);
        self.cell_height = cell_height;
        self.pixels = pixels;
        self.width = width;
        self.height = height;
    }
}

/// 圆形遮罩：半径 min(w,h)/2，边缘约一个像素宽的抗锯齿过渡
fn apply_circle_mask(pixels: &mut [u8], width: u32, height: u32) {
    let radius = width.min(height) as f64 / 2.0;
    let (cx, cy) = ((width as f64 - 1.0) / 2.0, (height as f64 - 1.0) / 2.0);
    let r2 = radius * radius;

    for y in 0..height {
        for x in 0..width {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let dist2 = dx * dx + dy * dy;

            let mask = if dist2 <= r2 - radius {
                255.0
            } else if dist2 >= r2 + radius {
                0.0
            } else {
                (255.0 * (0.5 + (r2 - dist2) / (2.0 * radius))).clamp(0.0, 255.0)
            };

            let alpha = &mut pixels[((y * width + x) * 4 + 3) as usize];
            *alpha = (mask * *alpha as f64 / 255.0).round() as u8;
        }
    }
}
