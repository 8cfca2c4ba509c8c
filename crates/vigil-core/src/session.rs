//! Per-run pipeline state and the frame-synchronous processing step.
//!
//! A [`Session`] owns everything that changes across frames: the frame
//! counter, the detection cache and the alert coordinator. Skipped frames
//! return the cached detections without touching any collaborator.

use crate::alert::{AlertCoordinator, Notifier};
use crate::cache::DetectionCache;
use crate::gallery::Gallery;
use crate::matcher::{DistanceMatcher, Matcher};
use crate::sampler::FrameSampler;
use crate::types::{
    DetectionEvent, DetectionRecord, EncodedFace, EventStatus, FaceBox, Frame, Label,
};
use chrono::Local;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("encoder I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoder protocol error: {0}")]
    Protocol(String),
    #[error("encoder exited")]
    Closed,
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("event storage failed: {0}")]
    Storage(String),
    #[error("event queue full")]
    QueueFull,
    #[error("event writer stopped")]
    Closed,
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot encode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("snapshot write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("encoder: {0}")]
    Encoder(#[from] EncoderError),
}

/// External face localization + embedding function.
pub trait FaceEncoder: Send {
    /// Boxes are in the coordinate space of `image`. May return no faces.
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, EncoderError>;
}

/// Optional image enhancement applied before encoding.
pub trait Enhancer: Send {
    fn enhance(&self, image: &RgbImage) -> RgbImage;
}

/// Append-only detection event log.
pub trait EventSink: Send {
    fn record(&self, event: &DetectionEvent) -> Result<(), SinkError>;
}

/// Image store keyed by generated file names.
pub trait SnapshotStore: Send {
    fn save(&self, key: &str, image: &RgbImage) -> Result<PathBuf, SnapshotError>;
}

/// Tunables for one session.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub sampler: FrameSampler,
    pub matcher: DistanceMatcher,
    /// Factor applied to frames before encoding, in (0, 1].
    pub downscale: f64,
    pub cooldown: Duration,
}

/// External collaborators the pipeline calls into.
pub struct Collaborators {
    pub encoder: Box<dyn FaceEncoder>,
    pub enhancer: Box<dyn Enhancer>,
    pub events: Box<dyn EventSink>,
    pub snapshots: Box<dyn SnapshotStore>,
    pub notifier: Box<dyn Notifier>,
}

/// What happened to one frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame_index: u64,
    pub full_cycle: bool,
    pub enhanced: bool,
    pub alert_sent: bool,
    /// Detections to display for this frame.
    pub detections: Arc<[DetectionRecord]>,
}

/// Pipeline state for one run.
pub struct Session {
    gallery: Gallery,
    config: PipelineConfig,
    encoder: Box<dyn FaceEncoder>,
    enhancer: Box<dyn Enhancer>,
    events: Box<dyn EventSink>,
    snapshots: Box<dyn SnapshotStore>,
    alerts: AlertCoordinator,
    cache: DetectionCache,
    frame_index: u64,
    cycle_index: u64,
}

impl Session {
    pub fn new(gallery: Gallery, config: PipelineConfig, collaborators: Collaborators) -> Self {
        Self {
            gallery,
            config,
            encoder: collaborators.encoder,
            enhancer: collaborators.enhancer,
            events: collaborators.events,
            snapshots: collaborators.snapshots,
            alerts: AlertCoordinator::new(collaborators.notifier, config.cooldown),
            cache: DetectionCache::new(),
            frame_index: 0,
            cycle_index: 0,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Index of the last frame seen (1-based; 0 before the first frame).
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn detections(&self) -> Arc<[DetectionRecord]> {
        self.cache.snapshot()
    }

    /// Process one frame to completion.
    ///
    /// On an encoder error the cache is left as it was and the frame
    /// counts as seen.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameReport, PipelineError> {
        self.frame_index += 1;
        let frame_index = self.frame_index;

        if !self.config.sampler.should_process_fully(frame_index) {
            tracing::trace!(frame = frame_index, "reusing cached detections");
            return Ok(FrameReport {
                frame_index,
                full_cycle: false,
                enhanced: false,
                alert_sent: false,
                detections: self.cache.snapshot(),
            });
        }

        self.cycle_index += 1;
        let enhanced = self.config.sampler.should_enhance(self.cycle_index);
        let source = if enhanced {
            tracing::debug!(frame = frame_index, "applying low-light enhancement");
            self.enhancer.enhance(&frame.image)
        } else {
            frame.image.clone()
        };

        let small = downscale(&source, self.config.downscale);
        let faces = self.encoder.encode(&small)?;

        let records: Vec<DetectionRecord> = faces
            .iter()
            .map(|face| {
                let result = self.config.matcher.compare(&face.embedding, &self.gallery);
                DetectionRecord {
                    face_box: face.face_box.upscale(self.config.downscale),
                    label: result.label,
                    confidence: result.confidence,
                    frame_index,
                }
            })
            .collect();

        let any_unknown = records.iter().any(|r| r.label.is_unknown());
        tracing::debug!(
            frame = frame_index,
            faces = records.len(),
            any_unknown,
            "full cycle complete"
        );

        self.cache.replace(records);
        let detections = self.cache.snapshot();

        for record in detections.iter() {
            self.log_detection(&frame.image, record);
        }

        let alert_sent = any_unknown && {
            let snapshots = &self.snapshots;
            let image = &frame.image;
            self.alerts.try_alert(frame.timestamp, || {
                let key = format!("unknown_{}.jpg", Local::now().format("%Y%m%d_%H%M%S"));
                save_snapshot(snapshots.as_ref(), &key, image)
            })
        };

        Ok(FrameReport {
            frame_index,
            full_cycle: true,
            enhanced,
            alert_sent,
            detections,
        })
    }

    fn log_detection(&self, image: &RgbImage, record: &DetectionRecord) {
        let snapshot = crop(image, &record.face_box).and_then(|face| {
            let key = format!(
                "{}_{}_{}_{}.jpg",
                record.label, record.face_box.top, record.face_box.right, record.frame_index
            );
            save_snapshot(self.snapshots.as_ref(), &key, &face)
        });

        let event = DetectionEvent {
            name: record.label.to_string(),
            status: EventStatus::from(&record.label),
            snapshot,
            timestamp: Local::now(),
        };
        if let Err(e) = self.events.record(&event) {
            tracing::warn!(error = %e, name = %event.name, "failed to record detection event");
        }
        if let Label::Known(name) = &record.label {
            tracing::debug!(name = %name, confidence = record.confidence, "known face");
        }
    }
}

fn save_snapshot(store: &dyn SnapshotStore, key: &str, image: &RgbImage) -> Option<PathBuf> {
    match store.save(key, image) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::warn!(error = %e, key, "failed to save snapshot");
            None
        }
    }
}

/// Resize by `scale`, rounding dimensions; `scale >= 1.0` is a no-op.
fn downscale(image: &RgbImage, scale: f64) -> RgbImage {
    if scale >= 1.0 {
        return image.clone();
    }
    let w = ((image.width() as f64 * scale).round() as u32).max(1);
    let h = ((image.height() as f64 * scale).round() as u32).max(1);
    imageops::resize(image, w, h, FilterType::Triangle)
}

/// Crop `face_box` out of `image`, clamped to the image bounds.
///
/// Returns `None` when nothing of the box lies inside the image.
fn crop(image: &RgbImage, face_box: &FaceBox) -> Option<RgbImage> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let left = (face_box.left as i64).clamp(0, w);
    let right = (face_box.right as i64).clamp(0, w);
    let top = (face_box.top as i64).clamp(0, h);
    let bottom = (face_box.bottom as i64).clamp(0, h);
    if right <= left || bottom <= top {
        return None;
    }
    Some(
        imageops::crop_imm(
            image,
            left as u32,
            top as u32,
            (right - left) as u32,
            (bottom - top) as u32,
        )
        .to_image(),
    )
}
