pub mod keypoint;

pub use keypoint::{KeypointIndex, Keypoints, Point2};
