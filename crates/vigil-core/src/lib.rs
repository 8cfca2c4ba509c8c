//! vigil-core — Identity matching and alert policy for the watch pipeline.
//!
//! Resolves face embeddings against a gallery of known identities, decides
//! which frames get a full detection cycle, keeps the last cycle's
//! detections for skipped frames, and gates unknown-person alerts behind
//! a cooldown.

pub mod alert;
pub mod cache;
pub mod gallery;
pub mod matcher;
pub mod sampler;
pub mod session;
pub mod types;

pub use alert::{AlertCoordinator, Notification, Notifier, NotifyError};
pub use cache::DetectionCache;
pub use gallery::{Gallery, GalleryError, Identity};
pub use matcher::{DistanceMatcher, MatchPolicy, Matcher};
pub use sampler::FrameSampler;
pub use session::{
    Collaborators, EncoderError, Enhancer, EventSink, FaceEncoder, FrameReport, PipelineConfig,
    PipelineError, Session, SinkError, SnapshotError, SnapshotStore,
};
pub use types::{
    DetectionEvent, DetectionRecord, Embedding, EncodedFace, EventStatus, FaceBox, Frame, Label,
    MatchResult, UNKNOWN_LABEL,
};
