use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use vigil_core::{EncoderError, PipelineError, Session};
use vigil_hw::{Camera, CameraError, FrameSource};

/// Why the frame loop stopped.
#[derive(Debug)]
pub enum LoopExit {
    /// The stop flag was raised.
    Stopped,
    /// Frame acquisition failed; the loop does not retry.
    CaptureFailed(CameraError),
    /// The face encoder went away.
    EncoderClosed,
}

/// Pull frames from `source` through `session` until stopped.
///
/// Encoder errors other than a closed helper are logged and the frame is
/// dropped; the detection cache keeps its previous contents.
pub fn run_loop<S: FrameSource>(source: &mut S, session: &mut Session, stop: &AtomicBool) -> LoopExit {
    while !stop.load(Ordering::Relaxed) {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "frame capture failed");
                return LoopExit::CaptureFailed(e);
            }
        };

        match session.process_frame(&frame) {
            Ok(report) if report.full_cycle => {
                tracing::debug!(
                    frame = report.frame_index,
                    sequence = frame.sequence,
                    faces = report.detections.len(),
                    enhanced = report.enhanced,
                    alert_sent = report.alert_sent,
                    "frame processed"
                );
            }
            Ok(_) => {}
            Err(PipelineError::Encoder(EncoderError::Closed)) => {
                tracing::error!("face encoder exited");
                return LoopExit::EncoderClosed;
            }
            Err(e) => {
                tracing::warn!(error = %e, frame = session.frame_index(), "frame dropped");
            }
        }
    }
    LoopExit::Stopped
}

/// Handle to the frame thread.
pub struct WatchHandle {
    /// Raise to stop the loop after the current frame.
    pub stop: Arc<AtomicBool>,
    /// Resolves with the exit reason; a dropped sender means the thread panicked.
    pub done: oneshot::Receiver<LoopExit>,
}

/// Spawn the frame loop on a dedicated OS thread.
///
/// The camera is opened by the caller so that startup fails fast; the
/// capture stream is created on the frame thread.
pub fn spawn_watch(camera: Camera, mut session: Session) -> std::io::Result<WatchHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = oneshot::channel();
    let flag = Arc::clone(&stop);

    std::thread::Builder::new()
        .name("vigil-frames".into())
        .spawn(move || {
            tracing::info!(
                device = %camera.device_path,
                identities = session.gallery().len(),
                "frame thread started"
            );
            let exit = match camera.stream() {
                Ok(mut stream) => run_loop(&mut stream, &mut session, &flag),
                Err(e) => LoopExit::CaptureFailed(e),
            };
            tracing::info!(frames = session.frame_index(), exit = ?exit, "frame thread exiting");
            let _ = done_tx.send(exit);
        })?;

    Ok(WatchHandle {
        stop,
        done: done_rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use vigil_core::{
        Collaborators, DetectionEvent, DistanceMatcher, EncodedFace, Enhancer, EventSink,
        FaceEncoder, Frame, FrameSampler, Gallery, MatchPolicy, Notification, Notifier,
        NotifyError, PipelineConfig, SinkError, SnapshotError, SnapshotStore,
    };

    /// Yields `remaining` frames, then fails or raises the stop flag.
    struct ScriptedSource {
        remaining: usize,
        stop_after: Option<Arc<AtomicBool>>,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            if self.remaining == 0 {
                return Err(CameraError::Stream("unplugged".into()));
            }
            self.remaining -= 1;
            if self.remaining == 0 {
                if let Some(stop) = &self.stop_after {
                    stop.store(true, Ordering::Relaxed);
                }
            }
            Ok(Frame {
                image: RgbImage::new(32, 24),
                timestamp: Instant::now(),
                sequence: 0,
            })
        }
    }

    enum Reply {
        Faces,
        Garbage,
        Gone,
    }

    struct ScriptedEncoder(Arc<Mutex<Vec<Reply>>>);

    impl FaceEncoder for ScriptedEncoder {
        fn encode(&mut self, _image: &RgbImage) -> Result<Vec<EncodedFace>, EncoderError> {
            let mut replies = self.0.lock().unwrap();
            let reply = if replies.is_empty() {
                Reply::Faces
            } else {
                replies.remove(0)
            };
            match reply {
                Reply::Faces => Ok(Vec::new()),
                Reply::Garbage => Err(EncoderError::Protocol("not json".into())),
                Reply::Gone => Err(EncoderError::Closed),
            }
        }
    }

    struct Passthrough;
    impl Enhancer for Passthrough {
        fn enhance(&self, image: &RgbImage) -> RgbImage {
            image.clone()
        }
    }

    struct Discard;
    impl EventSink for Discard {
        fn record(&self, _event: &DetectionEvent) -> Result<(), SinkError> {
            Ok(())
        }
    }
    impl SnapshotStore for Discard {
        fn save(&self, key: &str, _image: &RgbImage) -> Result<PathBuf, SnapshotError> {
            Ok(PathBuf::from(key))
        }
    }
    impl Notifier for Discard {
        fn notify(&self, _n: &Notification) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    fn session(replies: Vec<Reply>) -> Session {
        let config = PipelineConfig {
            sampler: FrameSampler::new(0, 0),
            matcher: DistanceMatcher::new(0.4, 0.3, MatchPolicy::FirstMatch),
            downscale: 0.5,
            cooldown: Duration::from_secs(60),
        };
        Session::new(
            Gallery::empty(),
            config,
            Collaborators {
                encoder: Box::new(ScriptedEncoder(Arc::new(Mutex::new(replies)))),
                enhancer: Box::new(Passthrough),
                events: Box::new(Discard),
                snapshots: Box::new(Discard),
                notifier: Box::new(Discard),
            },
        )
    }

    #[test]
    fn test_stop_flag_ends_loop() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut source = ScriptedSource {
            remaining: 4,
            stop_after: Some(Arc::clone(&stop)),
        };
        let mut session = session(Vec::new());
        let exit = run_loop(&mut source, &mut session, &stop);
        assert!(matches!(exit, LoopExit::Stopped));
        assert_eq!(session.frame_index(), 4);
    }

    #[test]
    fn test_preset_stop_processes_nothing() {
        let stop = AtomicBool::new(true);
        let mut source = ScriptedSource {
            remaining: 4,
            stop_after: None,
        };
        let mut session = session(Vec::new());
        assert!(matches!(run_loop(&mut source, &mut session, &stop), LoopExit::Stopped));
        assert_eq!(session.frame_index(), 0);
    }

    #[test]
    fn test_capture_failure_ends_loop() {
        let stop = AtomicBool::new(false);
        let mut source = ScriptedSource {
            remaining: 3,
            stop_after: None,
        };
        let mut session = session(Vec::new());
        let exit = run_loop(&mut source, &mut session, &stop);
        assert!(matches!(exit, LoopExit::CaptureFailed(_)));
        assert_eq!(session.frame_index(), 3);
    }

    #[test]
    fn test_encoder_errors_skip_frame_until_closed() {
        let stop = AtomicBool::new(false);
        let mut source = ScriptedSource {
            remaining: 10,
            stop_after: None,
        };
        let mut session = session(vec![Reply::Garbage, Reply::Faces, Reply::Gone]);
        let exit = run_loop(&mut source, &mut session, &stop);
        assert!(matches!(exit, LoopExit::EncoderClosed));
        assert_eq!(session.frame_index(), 3);
    }
}
