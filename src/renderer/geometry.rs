use serde::{Deserialize, Serialize};

/// 终端几何信息（字符格 + 像素），由外部提供或通过 crossterm 查询
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalGeometry {
    pub cols: u32,
    pub rows: u32,
    pub width_px: u32,
    pub height_px: u32,
}

impl TerminalGeometry {
    pub fn new(cols: u32, rows: u32, width_px: u32, height_px: u32) -> Self {
        Self { cols, rows, width_px, height_px }
    }

    /// 查询当前终端（不支持像素尺寸的终端返回 None）
    pub fn query() -> Option<Self> {
        let window = crossterm::terminal::window_size().ok()?;
        let geometry = Self::new(
            window.columns as u32,
            window.rows as u32,
            window.width as u32,
            window.height as u32,
        );
        geometry.is_known().then_some(geometry)
    }

    /// 四个维度都非零
    pub fn is_known(&self) -> bool {
        self.cols > 0 && self.rows > 0 && self.width_px > 0 && self.height_px > 0
    }

    /// 单个字符格的像素尺寸 (宽, 高)
    pub fn cell_size(&self) -> Option<(u32, u32)> {
        if !self.is_known() {
            return None;
        }
        Some(((self.width_px / self.cols).max(1), (self.height_px / self.rows).max(1)))
    }

    pub fn cell_height(&self) -> Option<u32> {
        self.cell_size().map(|(_, h)| h)
    }

    /// 像素尺寸占用的字符格数（向上取整）
    pub fn cells_for(&self, width_px: u32, height_px: u32) -> Option<(u32, u32)> {
        let (cell_w, cell_h) = self.cell_size()?;
        Some((width_px.div_ceil(cell_w), height_px.div_ceil(cell_h)))
    }

    /// 把给定像素尺寸的图像居中时左上角所在的格子 (row, col)，从 1 开始
    pub fn center_position(&self, width_px: u32, height_px: u32) -> Option<(u32, u32)> {
        let (video_cols, video_rows) = self.cells_for(width_px, height_px)?;
        let col = (self.cols as i64 - video_cols as i64) / 2 + 1;
        let row = (self.rows as i64 - video_rows as i64) / 2 + 1;
        Some((row.max(1) as u32, col.max(1) as u32))
    }

    /// 头像位置：视频下方两行，靠视频左边缘
    pub fn overlay_position(&self, video_width_px: u32, video_height_px: u32) -> Option<(u32, u32)> {
        const OFFSET_COLS: i64 = 1;
        const OFFSET_ROWS: i64 = 2;

        let (video_cols, video_rows) = self.cells_for(video_width_px, video_height_px)?;
        let video_cols = video_cols as i64 + 1;
        let video_rows = video_rows as i64 + 1;

        let video_top = (((self.rows as i64 - video_rows) as f64 / 2.0).round() as i64 - 1).max(0);
        let row = video_top + video_rows + OFFSET_ROWS;
        let col = (self.cols as i64 - video_cols) / 2 + OFFSET_COLS;
        Some((row.max(1) as u32, col.max(1) as u32))
    }
}

/// 按源宽高比放进 max_w × max_h 的框里（任一边界为 0 时保持源尺寸）
pub fn fit_size(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if max_w == 0 || max_h == 0 || src_w == 0 || src_h == 0 {
        return (src_w, src_h);
    }

    let src_aspect = src_w as f64 / src_h as f64;
    let dst_aspect = max_w as f64 / max_h as f64;

    let (w, h) = if src_aspect > dst_aspect {
        (max_w, (max_w as f64 / src_aspect) as u32)
    } else {
        ((max_h as f64 * src_aspect) as u32, max_h)
    };
    (w.max(1), h.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 120x40 格，每格 10x20 像素
    fn geometry() -> TerminalGeometry {
        TerminalGeometry::new(120, 40, 1200, 800)
    }

    #[test]
    fn fit_keeps_aspect() {
        // 竖屏视频放进 270x480
        assert_eq!(fit_size(1080, 1920, 270, 480), (270, 480));
        // 横屏视频放进竖框：宽度受限
        assert_eq!(fit_size(1920, 1080, 270, 480), (270, 151));
        // 方形视频：高度受限
        assert_eq!(fit_size(500, 500, 400, 300), (300, 300));
        // 未设置尺寸
        assert_eq!(fit_size(640, 360, 0, 480), (640, 360));
    }

    #[test]
    fn cell_size_needs_full_geometry() {
        assert_eq!(geometry().cell_size(), Some((10, 20)));
        assert_eq!(TerminalGeometry::new(80, 24, 0, 0).cell_size(), None);
        assert_eq!(TerminalGeometry::default().center_position(100, 100), None);
    }

    #[test]
    fn centers_video_in_cells() {
        // 270x480 → 27x24 格
        assert_eq!(geometry().center_position(270, 480), Some((9, 47)));
        // 比终端还大时夹到 (1,1)
        assert_eq!(geometry().center_position(5000, 5000), Some((1, 1)));
    }

    #[test]
    fn overlay_sits_below_video() {
        // 视频 28x25 格（含 +1），顶部 round(7.5)-1 = 7
        assert_eq!(geometry().overlay_position(270, 480), Some((34, 47)));
    }
}
