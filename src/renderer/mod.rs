// 终端渲染：Kitty 图形协议、共享内存传输、终端几何

pub mod geometry;
pub mod kitty;
pub mod shm;

pub use geometry::{fit_size, TerminalGeometry};
pub use kitty::{ImagePlacement, ImageSink, KittyRenderer, GIF_IMAGE_ID_BASE, PROFILE_IMAGE_ID, VIDEO_IMAGE_ID};
pub use shm::SharedMemory;
