//! Continuous RGB capture from a V4L2 device.

use crate::frame::{self, FrameError};
use image::RgbImage;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;
use vigil_core::Frame;

const REQUESTED_SIZE: (u32, u32) = (640, 480);
const MMAP_BUFFERS: u32 = 4;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {0}")]
    NotFound(PathBuf),
    #[error("camera {0} is in use by another process")]
    Busy(PathBuf),
    #[error("{path} cannot capture video: {reason}")]
    Unsupported { path: PathBuf, reason: String },
    #[error("format negotiation failed: {0}")]
    Format(String),
    #[error("capture stream failed: {0}")]
    Stream(String),
    #[error(transparent)]
    Convert(#[from] FrameError),
}

/// A capture-capable V4L2 node.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub card: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts the camera may deliver. Both are converted to RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed YUYV 4:2:2.
    Yuyv,
    /// 8-bit luma only (IR cameras).
    Grey,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }

    fn to_rgb(self, buf: &[u8], width: u32, height: u32) -> Result<RgbImage, CameraError> {
        let rgb = match self {
            Self::Yuyv => frame::yuyv_to_rgb(buf, width, height)?,
            Self::Grey => frame::grey_to_rgb(buf, width, height)?,
        };
        RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
            CameraError::Stream(format!("{width}x{height} RGB buffer has the wrong length"))
        })
    }
}

/// Produces frames for the watch loop.
pub trait FrameSource {
    /// Block until the next frame arrives.
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

/// An opened camera with a negotiated format.
pub struct Camera {
    device: Device,
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Camera {
    /// Open `device_path` and negotiate 640x480 YUYV, accepting GREY as
    /// a fallback when the driver insists on it.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        let path = Path::new(device_path);
        if !path.exists() {
            return Err(CameraError::NotFound(path.to_path_buf()));
        }

        let device = Device::with_path(path).map_err(|e| open_error(path, e))?;
        let caps = device.query_caps().map_err(|e| CameraError::Unsupported {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::Unsupported {
                path: path.to_path_buf(),
                reason: "no VIDEO_CAPTURE capability".into(),
            });
        }

        let (width, height, format) = negotiate(&device)?;
        tracing::info!(
            device = device_path,
            card = %caps.card,
            width,
            height,
            format = ?format,
            "camera ready"
        );

        Ok(Self {
            device,
            device_path: device_path.to_string(),
            width,
            height,
            format,
        })
    }

    /// Begin memory-mapped streaming.
    pub fn stream(&self) -> Result<FrameStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, MMAP_BUFFERS)
            .map_err(|e| CameraError::Stream(e.to_string()))?;
        Ok(FrameStream {
            camera: self,
            stream,
        })
    }

    /// Capture-capable `/dev/video*` nodes, sorted by path.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let Ok(entries) = std::fs::read_dir("/dev") else {
            return Vec::new();
        };
        let mut found: Vec<DeviceInfo> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("video"))
            })
            .filter_map(|p| capture_device(&p))
            .collect();
        found.sort_by(|a, b| a.path.cmp(&b.path));
        found
    }
}

fn open_error(path: &Path, e: io::Error) -> CameraError {
    if e.raw_os_error() == Some(EBUSY) {
        CameraError::Busy(path.to_path_buf())
    } else if e.kind() == io::ErrorKind::NotFound {
        CameraError::NotFound(path.to_path_buf())
    } else {
        CameraError::Unsupported {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    }
}

fn negotiate(device: &Device) -> Result<(u32, u32, PixelFormat), CameraError> {
    let mut wanted = device
        .format()
        .map_err(|e| CameraError::Format(format!("reading current format: {e}")))?;
    wanted.width = REQUESTED_SIZE.0;
    wanted.height = REQUESTED_SIZE.1;
    wanted.fourcc = FourCC::new(b"YUYV");

    let got = device
        .set_format(&wanted)
        .map_err(|e| CameraError::Format(format!("applying {}x{} YUYV: {e}", wanted.width, wanted.height)))?;
    let format = PixelFormat::from_fourcc(got.fourcc)
        .ok_or_else(|| CameraError::Format(format!("driver chose {:?}, need YUYV or GREY", got.fourcc)))?;
    Ok((got.width, got.height, format))
}

fn capture_device(path: &Path) -> Option<DeviceInfo> {
    let caps = Device::with_path(path).ok()?.query_caps().ok()?;
    caps.capabilities
        .contains(Flags::VIDEO_CAPTURE)
        .then(|| DeviceInfo {
            path: path.to_path_buf(),
            card: caps.card,
            driver: caps.driver,
            bus: caps.bus,
        })
}

/// Frames from a streaming [`Camera`].
pub struct FrameStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl FrameSource for FrameStream<'_> {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = CaptureStream::next(&mut self.stream)
            .map_err(|e| CameraError::Stream(format!("dequeue: {e}")))?;
        let sequence = meta.sequence;
        let image = self
            .camera
            .format
            .to_rgb(buf, self.camera.width, self.camera.height)?;
        Ok(Frame {
            image,
            timestamp: Instant::now(),
            sequence,
        })
    }
}
