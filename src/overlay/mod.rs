// 叠加层：圆形头像和 GIF 角标

pub mod gif;
pub mod profile;
pub mod slots;

pub use gif::GifAnimation;
pub use profile::ProfileOverlay;
pub use slots::{GifSlot, GifTracker};
