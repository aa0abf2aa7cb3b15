pub mod canvas;
pub mod skeleton;
#[cfg(feature = "desktop")]
pub mod window;

pub use canvas::OverlayCanvas;
#[cfg(feature = "desktop")]
pub use minifb::Key;
pub use skeleton::{project, Limb, Overlay, Segment, SKELETON_CONNECTIONS};
#[cfg(feature = "desktop")]
pub use window::OverlayWindow;
