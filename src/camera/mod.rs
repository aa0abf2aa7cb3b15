#[cfg(feature = "desktop")]
pub mod capture;
pub mod frame;
pub mod source;

#[cfg(feature = "desktop")]
pub use capture::{acquire_camera, OpenCvBackend, OpenCvCamera};
pub use frame::{Frame, FrameSampler};
pub use source::{CameraBackend, CameraSource, Constraints, VideoDevice};
