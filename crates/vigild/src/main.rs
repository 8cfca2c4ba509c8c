use anyhow::{Context, Result};
use std::sync::atomic::Ordering;
use tracing_subscriber::EnvFilter;
use vigil_core::{Collaborators, Gallery, Notifier, Session};
use vigil_hw::{Camera, ClaheEnhancer};
use vigild::{
    spawn_watch, Config, EventLog, JpegSnapshotStore, LogOnlyNotifier, LoopExit,
    QueuedEventSink, SmtpConfig, SmtpNotifier, SubprocessEncoder, WatchHandle,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("vigild starting");

    let config = Config::from_env();
    config.validate()?;
    tracing::info!(
        device = %config.camera_device,
        gallery = %config.gallery_path.display(),
        skip_interval = config.skip_interval,
        policy = ?config.match_policy,
        "configuration loaded"
    );

    let gallery = Gallery::load(&config.gallery_path)
        .with_context(|| format!("loading gallery {}", config.gallery_path.display()))?;

    let log = EventLog::open(&config.db_path)
        .with_context(|| format!("opening event log {}", config.db_path.display()))?;
    let (events, writer) = QueuedEventSink::spawn(log, config.event_queue)
        .context("starting event writer")?;

    let snapshots = JpegSnapshotStore::open(&config.snapshot_dir)
        .with_context(|| format!("creating snapshot dir {}", config.snapshot_dir.display()))?;

    let notifier: Box<dyn Notifier> = match &config.smtp_config {
        Some(path) => {
            let smtp = SmtpConfig::load(path)?;
            Box::new(SmtpNotifier::new(&smtp)?)
        }
        None => {
            tracing::warn!("VIGIL_SMTP_CONFIG not set; alerts will only be logged");
            Box::new(LogOnlyNotifier)
        }
    };

    let encoder = SubprocessEncoder::spawn(&config.encoder_command)
        .with_context(|| format!("starting face encoder {:?}", config.encoder_command))?;

    let camera = Camera::open(&config.camera_device)?;

    let session = Session::new(
        gallery,
        config.pipeline(),
        Collaborators {
            encoder: Box::new(encoder),
            enhancer: Box::new(ClaheEnhancer::default()),
            events: Box::new(events),
            snapshots: Box::new(snapshots),
            notifier,
        },
    );

    let WatchHandle { stop, mut done } =
        spawn_watch(camera, session).context("spawning frame thread")?;
    tracing::info!("vigild ready");

    let finished = tokio::select! {
        exit = &mut done => Some(exit),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            None
        }
    };
    let exit = match finished {
        Some(exit) => exit,
        None => {
            tracing::info!("vigild shutting down");
            stop.store(true, Ordering::Relaxed);
            done.await
        }
    };

    // The session (and with it the last event sender) is dropped when the
    // frame thread exits, so the writer drains and stops on its own.
    tokio::task::spawn_blocking(move || writer.join())
        .await?
        .map_err(|_| anyhow::anyhow!("event writer panicked"))?;

    match exit {
        Ok(LoopExit::Stopped) => Ok(()),
        Ok(LoopExit::CaptureFailed(e)) => Err(e).context("frame capture failed"),
        Ok(LoopExit::EncoderClosed) => anyhow::bail!("face encoder exited"),
        Err(_) => anyhow::bail!("frame thread panicked"),
    }
}
