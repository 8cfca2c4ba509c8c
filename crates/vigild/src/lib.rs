//! vigild — Webcam watch daemon.
//!
//! Adapters that connect the `vigil-core` pipeline to the outside world:
//! environment config, the face encoder helper process, the SQLite event
//! log, JPEG snapshots, SMTP alerts and the frame thread.

pub mod config;
pub mod encoder;
pub mod engine;
pub mod events;
pub mod notifier;
pub mod snapshots;

pub use config::{Config, ConfigError, SmtpConfig};
pub use encoder::SubprocessEncoder;
pub use engine::{run_loop, spawn_watch, LoopExit, WatchHandle};
pub use events::{EventLog, LoggedEvent, QueuedEventSink};
pub use notifier::{LogOnlyNotifier, SmtpNotifier};
pub use snapshots::JpegSnapshotStore;
