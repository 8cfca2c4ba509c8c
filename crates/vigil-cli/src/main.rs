use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::{Path, PathBuf};
use vigil_core::{
    DistanceMatcher, Embedding, FaceEncoder, Gallery, MatchPolicy, MatchResult, Matcher,
};
use vigil_hw::Camera;
use vigild::{Config, EventLog, SubprocessEncoder};

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil webcam watch tools")]
struct Cli {
    /// Gallery file (default: $VIGIL_GALLERY_PATH or the data dir)
    #[arg(long, global = true)]
    gallery: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known identities
    Gallery,
    /// Match an embedding against the gallery
    Match {
        /// JSON file holding one embedding (array of numbers)
        embedding: PathBuf,
        #[arg(long, default_value_t = 0.4)]
        tolerance: f32,
        #[arg(long, default_value_t = 0.3)]
        min_confidence: f32,
        /// first | nearest
        #[arg(long, default_value = "first")]
        policy: MatchPolicy,
    },
    /// Add an embedding to an identity, creating the gallery if absent
    #[command(group(
        ArgGroup::new("source")
            .required(true)
            .args(["embedding", "image", "event"])
    ))]
    Enroll {
        #[arg(short, long)]
        name: String,
        /// JSON file holding one embedding (array of numbers)
        #[arg(short, long)]
        embedding: Option<PathBuf>,
        /// Image with exactly one face, run through the face encoder
        #[arg(long)]
        image: Option<PathBuf>,
        /// Logged event id whose snapshot is run through the face encoder
        #[arg(long)]
        event: Option<i64>,
        /// Event database for --event (default: $VIGIL_DB_PATH or the data dir)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Show recent detection events
    Events {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Event database (default: $VIGIL_DB_PATH or the data dir)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Print one JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let gallery_path = cli.gallery.unwrap_or(config.gallery_path);

    match cli.command {
        Commands::Gallery => {
            let gallery = load_gallery(&gallery_path)?;
            println!(
                "{} identities, {} vectors, dim {}",
                gallery.len(),
                gallery.vector_count(),
                gallery.dim().map_or("-".to_string(), |d| d.to_string())
            );
            for identity in gallery.identities() {
                println!("  {:<24} {} vector(s)", identity.name, identity.vectors.len());
            }
        }
        Commands::Match {
            embedding,
            tolerance,
            min_confidence,
            policy,
        } => {
            let gallery = load_gallery(&gallery_path)?;
            let query = read_embedding(&embedding)?;
            let matcher = DistanceMatcher::new(tolerance, min_confidence, policy);
            let result = matcher.compare(&query, &gallery);
            println!("{}", describe(&result));
        }
        Commands::Enroll {
            name,
            embedding,
            image,
            event,
            db,
        } => {
            let mut gallery = if gallery_path.exists() {
                load_gallery(&gallery_path)?
            } else {
                tracing::info!(path = %gallery_path.display(), "creating new gallery");
                Gallery::empty()
            };
            let image = match event {
                Some(id) => {
                    let db = db.unwrap_or(config.db_path);
                    Some(event_snapshot(&db, id, &config.snapshot_dir)?)
                }
                None => image,
            };
            let vector = match (embedding, image) {
                (Some(path), _) => read_embedding(&path)?,
                (None, Some(path)) => {
                    let mut encoder = SubprocessEncoder::spawn(&config.encoder_command)
                        .with_context(|| {
                            format!("starting face encoder {:?}", config.encoder_command)
                        })?;
                    embed_image(&mut encoder, &path)?
                }
                (None, None) => anyhow::bail!("one of --embedding, --image or --event is required"),
            };
            gallery
                .enroll(&name, vector)
                .with_context(|| format!("enrolling {name:?}"))?;
            gallery
                .save(&gallery_path)
                .with_context(|| format!("writing {}", gallery_path.display()))?;
            let count = gallery.get(&name).map_or(0, |i| i.vectors.len());
            println!("Enrolled {name} ({count} vector(s)) in {}", gallery_path.display());
        }
        Commands::Events { limit, db, json } => {
            let db = db.unwrap_or(config.db_path);
            let log = EventLog::open_read_only(&db)?;
            let events = log.recent(limit)?;
            if events.is_empty() && !json {
                println!("No events logged");
            }
            for event in events {
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    println!(
                        "{}  {:<8} {:<20} {}",
                        event.timestamp,
                        event.status,
                        event.name,
                        event.snapshot.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path.display(), dev.card, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

fn load_gallery(path: &Path) -> Result<Gallery> {
    Gallery::load(path).with_context(|| format!("loading gallery {}", path.display()))
}

fn read_embedding(path: &Path) -> Result<Embedding> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let values: Vec<f32> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of numbers", path.display()))?;
    anyhow::ensure!(!values.is_empty(), "{} holds an empty embedding", path.display());
    Ok(Embedding::new(values))
}

/// Embedding of the single face in the image at `path`.
fn embed_image(encoder: &mut dyn FaceEncoder, path: &Path) -> Result<Embedding> {
    let image = image::open(path)
        .with_context(|| format!("reading image {}", path.display()))?
        .to_rgb8();
    let mut faces = encoder
        .encode(&image)
        .with_context(|| format!("encoding {}", path.display()))?;
    anyhow::ensure!(
        faces.len() == 1,
        "{} shows {} faces, need exactly one",
        path.display(),
        faces.len()
    );
    Ok(faces.remove(0).embedding)
}

/// Snapshot file recorded for event `id`.
fn event_snapshot(db: &Path, id: i64, snapshot_dir: &Path) -> Result<PathBuf> {
    let log = EventLog::open_read_only(db)?;
    let event = log
        .get(id)?
        .with_context(|| format!("no event with id {id}"))?;
    let recorded = event
        .snapshot
        .map(PathBuf::from)
        .with_context(|| format!("event {id} has no snapshot"))?;
    resolve_snapshot(&recorded, snapshot_dir)
        .with_context(|| format!("snapshot {} is missing", recorded.display()))
}

/// The recorded path, or the same file name under `snapshot_dir` when the
/// snapshots were moved since the event was logged.
fn resolve_snapshot(recorded: &Path, snapshot_dir: &Path) -> Option<PathBuf> {
    if recorded.is_file() {
        return Some(recorded.to_path_buf());
    }
    let moved = snapshot_dir.join(recorded.file_name()?);
    moved.is_file().then_some(moved)
}

fn describe(result: &MatchResult) -> String {
    if result.label.is_unknown() {
        "Unknown".to_string()
    } else {
        format!("{} (confidence {:.3})", result.label, result.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use vigil_core::Label;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_match_args() {
        let cli = Cli::parse_from(["vigil", "match", "query.json", "--policy", "nearest"]);
        match cli.command {
            Commands::Match {
                tolerance, policy, ..
            } => {
                assert_eq!(tolerance, 0.4);
                assert_eq!(policy, MatchPolicy::NearestMatch);
            }
            _ => panic!("expected match"),
        }
    }

    #[test]
    fn test_read_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.json");
        std::fs::write(&path, "[0.1, 0.2, 0.3]").unwrap();
        assert_eq!(read_embedding(&path).unwrap().values, vec![0.1, 0.2, 0.3]);

        std::fs::write(&path, "[]").unwrap();
        assert!(read_embedding(&path).is_err());
        std::fs::write(&path, "{\"a\":1}").unwrap();
        assert!(read_embedding(&path).is_err());
    }

    #[test]
    fn test_enroll_needs_exactly_one_source() {
        assert!(Cli::try_parse_from(["vigil", "enroll", "--name", "bob"]).is_err());
        assert!(Cli::try_parse_from([
            "vigil", "enroll", "--name", "bob", "--image", "a.jpg", "--event", "3"
        ])
        .is_err());

        let cli = Cli::parse_from(["vigil", "enroll", "--name", "bob", "--event", "3"]);
        match cli.command {
            Commands::Enroll { event, image, .. } => {
                assert_eq!(event, Some(3));
                assert_eq!(image, None);
            }
            _ => panic!("expected enroll"),
        }
    }

    /// Helper encoder for 4x4 images (48 RGB bytes per request) that
    /// replies with `reply` every time.
    fn helper_encoder(dir: &Path, script: &str, reply: &str) -> SubprocessEncoder {
        let script = dir.join(script);
        std::fs::write(
            &script,
            format!(
                "while IFS= read -r header; do\n  head -c 48 > /dev/null\n  echo '{reply}'\ndone\n"
            ),
        )
        .unwrap();
        SubprocessEncoder::spawn(&format!("sh {}", script.display())).unwrap()
    }

    fn snapshot(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::from_pixel(4, 4, image::Rgb([90, 60, 30]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_embed_image_single_face() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder =
            helper_encoder(dir.path(), "one.sh", r#"[{"box":[0,0,4,4],"embedding":[0.25,0.5,0.75]}]"#);
        let path = snapshot(dir.path(), "Unknown_0_4_9.jpg");
        assert_eq!(
            embed_image(&mut encoder, &path).unwrap().values,
            vec![0.25, 0.5, 0.75]
        );
    }

    #[test]
    fn test_embed_image_rejects_zero_or_many_faces() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot(dir.path(), "crowd.jpg");

        let mut none = helper_encoder(dir.path(), "none.sh", "[]");
        assert!(embed_image(&mut none, &path).is_err());

        let two = r#"[{"box":[0,0,2,2],"embedding":[1.0]},{"box":[2,2,4,4],"embedding":[0.0]}]"#;
        let mut many = helper_encoder(dir.path(), "two.sh", two);
        assert!(embed_image(&mut many, &path).is_err());
    }

    #[test]
    fn test_event_snapshot_resolves_moved_file() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_dir = dir.path().join("snapshots");
        std::fs::create_dir_all(&snapshot_dir).unwrap();
        let file = snapshot(&snapshot_dir, "Unknown_10_80_3.jpg");

        let db = dir.path().join("intruder_log.db");
        let log = EventLog::open(&db).unwrap();
        let moved = log
            .insert(&vigil_core::DetectionEvent {
                name: "Unknown".into(),
                status: vigil_core::EventStatus::Intruder,
                snapshot: Some(PathBuf::from("/old/place/Unknown_10_80_3.jpg")),
                timestamp: chrono::Local::now(),
            })
            .unwrap();
        let bare = log
            .insert(&vigil_core::DetectionEvent {
                name: "alice".into(),
                status: vigil_core::EventStatus::Known,
                snapshot: None,
                timestamp: chrono::Local::now(),
            })
            .unwrap();
        drop(log);

        assert_eq!(event_snapshot(&db, moved, &snapshot_dir).unwrap(), file);
        assert!(event_snapshot(&db, bare, &snapshot_dir).is_err());
        assert!(event_snapshot(&db, moved + 100, &snapshot_dir).is_err());
    }

    #[test]
    fn test_promoted_snapshot_lands_in_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let gallery_path = dir.path().join("encodings.json");
        let mut encoder =
            helper_encoder(dir.path(), "carol.sh", r#"[{"box":[0,0,4,4],"embedding":[0.0,1.0]}]"#);
        let path = snapshot(dir.path(), "Unknown_0_4_1.jpg");

        let mut gallery = Gallery::empty();
        gallery.enroll("carol", embed_image(&mut encoder, &path).unwrap()).unwrap();
        gallery.save(&gallery_path).unwrap();

        let reloaded = Gallery::load(&gallery_path).unwrap();
        assert_eq!(reloaded.get("carol").unwrap().vectors[0].values, vec![0.0, 1.0]);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(&MatchResult::unknown()), "Unknown");
        let known = MatchResult {
            label: Label::Known("alice".into()),
            confidence: 0.75,
        };
        assert_eq!(describe(&known), "alice (confidence 0.750)");
    }
}
