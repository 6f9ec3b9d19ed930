use parking_lot::Mutex;
use std::time::Instant;

/// 主时钟接口 - 视频渲染循环以它为准做音视频同步
///
/// 有音轨时由音频缓冲区实现（按实际消耗的采样数推进），
/// 没有音轨或音频设备不可用时退化为 [`WallClock`]。
pub trait MasterClock: Send + Sync {
    /// 当前播放位置（秒）
    fn time(&self) -> f64;

    /// 已启动且未暂停
    fn is_playing(&self) -> bool;

    fn set_paused(&self, paused: bool);

    fn is_paused(&self) -> bool;

    /// 当前排队等待播放的音频字节数（预缓冲判断用）
    fn buffered_bytes(&self) -> usize;

    /// 预缓冲完成后开始计时
    fn start(&self);

    /// 回到 0 并清空待播放数据
    fn reset(&self);
}

/// 墙钟 - 以系统时间推进的播放时钟（秒）
pub struct WallClock {
    inner: Mutex<ClockInner>,
}

struct ClockInner {
    base_time: f64,        // 基准位置（秒）
    base_instant: Instant, // 基准时刻
    started: bool,
    paused: bool,
    paused_at: f64, // 暂停时的位置
}

impl ClockInner {
    fn now(&self) -> f64 {
        if !self.started {
            0.0
        } else if self.paused {
            self.paused_at
        } else {
            self.base_time + self.base_instant.elapsed().as_secs_f64()
        }
    }
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClockInner {
                base_time: 0.0,
                base_instant: Instant::now(),
                started: false,
                paused: false,
                paused_at: 0.0,
            }),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterClock for WallClock {
    fn time(&self) -> f64 {
        self.inner.lock().now()
    }

    fn is_playing(&self) -> bool {
        let inner = self.inner.lock();
        inner.started && !inner.paused
    }

    fn set_paused(&self, paused: bool) {
        let mut inner = self.inner.lock();
        if paused == inner.paused {
            return;
        }
        if paused {
            inner.paused_at = inner.now();
            inner.paused = true;
        } else {
            inner.base_time = inner.paused_at;
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    fn buffered_bytes(&self) -> usize {
        0
    }

    fn start(&self) {
        let mut inner = self.inner.lock();
        if inner.started {
            return;
        }
        inner.started = true;
        inner.base_instant = Instant::now();
        if inner.paused {
            // 启动前就被暂停：从基准位置冻结
            inner.paused_at = inner.base_time;
        }
    }

    fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.base_time = 0.0;
        inner.paused_at = 0.0;
        inner.base_instant = Instant::now();
        inner.started = false;
    }
}
