// 核心数据结构和类型定义

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use types::*;

use std::{process, thread};

/// 日志上下文（进程号 + 线程号）
pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
