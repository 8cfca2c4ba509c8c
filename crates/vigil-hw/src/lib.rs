//! vigil-hw — Camera capture and frame enhancement.
//!
//! Provides V4L2-based RGB frame capture and a CLAHE low-light filter
//! usable as the pipeline's enhancer.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, FrameSource, FrameStream, PixelFormat};
pub use frame::{ClaheEnhancer, FrameError};
