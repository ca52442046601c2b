use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{DetectedFace, Embedding, Gallery, Identity, MatchPolicy};
use rollcall_store::{AttendanceMark, AttendanceStatus, RosterStore, Student};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance")]
struct Cli {
    /// Roster database path (overrides ROLLCALL_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a student from a precomputed face embedding
    Enroll {
        /// Organization-assigned student identifier
        #[arg(long)]
        student_id: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// JSON file holding the embedding ({"values": [...]})
        #[arg(long)]
        embedding: PathBuf,
    },
    /// Enroll every <student_id>.json embedding in a directory
    Import { dir: PathBuf },
    /// Match detected faces against enrolled students
    Recognize {
        /// JSON file holding a list of detected faces with embeddings
        #[arg(long)]
        faces: PathBuf,
        /// Mark recognized students present for this lecture
        #[arg(long)]
        lecture: Option<String>,
        /// Override ROLLCALL_MAX_DISTANCE for this run
        #[arg(long)]
        max_distance: Option<f32>,
    },
    /// List enrolled students
    List {
        /// Include deactivated students
        #[arg(long)]
        all: bool,
    },
    /// Deactivate a student by store key
    Deactivate { key: String },
    /// Show attendance marks for a lecture
    Attendance {
        #[arg(long)]
        lecture: String,
    },
    /// Show present/late/absent counts for a lecture
    Stats {
        #[arg(long)]
        lecture: String,
    },
    /// Show one student's attendance across lectures, newest first
    History { key: String },
    /// Show roster status
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let store = RosterStore::open(&config.db_path)
        .with_context(|| format!("opening roster at {}", config.db_path.display()))?;

    match cli.command {
        Commands::Enroll {
            student_id,
            name,
            embedding,
        } => {
            let embedding = read_json::<Embedding>(&embedding)?;
            let mut gallery = load_gallery(&store, &config, None)?;
            let student = enroll(&store, &mut gallery, &student_id, &name, &embedding)?;
            println!("Enrolled {} ({}) as {}", student.name, student.student_id, student.id);
        }
        Commands::Import { dir } => {
            let mut gallery = load_gallery(&store, &config, None)?;
            let (enrolled, skipped) = import_dir(&store, &mut gallery, &dir)?;
            println!("Imported {enrolled} students, skipped {skipped}");
        }
        Commands::Recognize {
            faces,
            lecture,
            max_distance,
        } => {
            let faces = read_json::<Vec<DetectedFace>>(&faces)?;
            let gallery = load_gallery(&store, &config, max_distance)?;
            recognize(&store, &gallery, &faces, lecture.as_deref())?;
        }
        Commands::List { all } => {
            let students = store.list_students(!all)?;
            if students.is_empty() {
                println!("No students enrolled");
            }
            for s in students {
                let state = if s.is_active { "" } else { " (inactive)" };
                println!(
                    "{}  {:<12} {}{}  enrolled {}",
                    s.id,
                    s.student_id,
                    s.name,
                    state,
                    s.enrolled_at.format("%Y-%m-%d")
                );
            }
        }
        Commands::Deactivate { key } => {
            if !store.deactivate_student(&key)? {
                bail!("no student with key {key}");
            }
            println!("Deactivated {key}");
        }
        Commands::Attendance { lecture } => {
            for record in store.lecture_attendance(&lecture)? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Commands::Stats { lecture } => {
            let stats = store.lecture_stats(&lecture)?;
            println!(
                "{}",
                serde_json::json!({
                    "stats": stats,
                    "marked": stats.marked(),
                    "attendance_rate": stats.attendance_rate(),
                })
            );
        }
        Commands::History { key } => {
            let records = store.student_history(&key)?;
            if records.is_empty() {
                println!("No attendance recorded for {key}");
            }
            for record in records {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Commands::Status => {
            println!(
                "{}",
                serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "db_path": config.db_path,
                    "enrolled": store.active_count()?,
                    "dimension": config.dimension,
                    "max_distance": config.max_distance,
                })
            );
        }
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Build a gallery from every active student in the store.
fn load_gallery(store: &RosterStore, config: &Config, max_distance: Option<f32>) -> Result<Gallery> {
    let policy = MatchPolicy::new(max_distance.unwrap_or(config.max_distance))?;
    let mut gallery = Gallery::new(config.dimension, policy)?;
    gallery.rehydrate(store.stored_embeddings()?);
    Ok(gallery)
}

/// Validate against the gallery first so a bad vector is never persisted.
fn enroll(
    store: &RosterStore,
    gallery: &mut Gallery,
    student_id: &str,
    name: &str,
    embedding: &Embedding,
) -> Result<Student> {
    gallery.validate(embedding)?;
    if !gallery.is_empty() {
        let existing = gallery.recognize(embedding)?;
        if let Some(identity) = existing.label() {
            tracing::warn!(
                student_id,
                similar_to = %identity.name,
                distance = existing.distance(),
                "embedding matches an already enrolled student"
            );
        }
    }

    let student = store.enroll_student(student_id, name, &embedding.values)?;
    gallery.enroll(Identity::new(&student.id, &student.name), embedding)?;
    Ok(student)
}

fn import_dir(store: &RosterStore, gallery: &mut Gallery, dir: &Path) -> Result<(usize, usize)> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let (mut enrolled, mut skipped) = (0, 0);
    for path in paths {
        let Some(student_id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            skipped += 1;
            continue;
        };
        if student_id.starts_with('.') {
            continue;
        }

        let result = read_json::<Embedding>(&path)
            .and_then(|embedding| enroll(store, gallery, &student_id, &student_id, &embedding));
        match result {
            Ok(student) => {
                tracing::info!(student_id, key = %student.id, "imported");
                enrolled += 1;
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "skipping");
                skipped += 1;
            }
        }
    }
    Ok((enrolled, skipped))
}

/// Counts printed after a recognition run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
struct RecognizeSummary {
    faces: usize,
    recognized: usize,
    unknown: usize,
    marked: usize,
}

fn recognize(
    store: &RosterStore,
    gallery: &Gallery,
    faces: &[DetectedFace],
    lecture: Option<&str>,
) -> Result<RecognizeSummary> {
    if gallery.is_empty() {
        bail!("no students enrolled; enroll before recognizing");
    }
    // Reject the whole batch before any output or attendance is written.
    for (i, face) in faces.iter().enumerate() {
        gallery
            .validate(&face.embedding)
            .with_context(|| format!("face {i}"))?;
    }

    let mut summary = RecognizeSummary {
        faces: faces.len(),
        ..Default::default()
    };
    // Best distance per recognized student, for attendance.
    let mut present: HashMap<String, f32> = HashMap::new();

    for (i, face) in faces.iter().enumerate() {
        let decision = gallery.recognize(&face.embedding)?;
        match decision.label() {
            Some(identity) => {
                summary.recognized += 1;
                let best = present.entry(identity.key.clone()).or_insert(f32::INFINITY);
                *best = best.min(decision.distance());
            }
            None => summary.unknown += 1,
        }
        println!(
            "{}",
            serde_json::json!({
                "face": i,
                "bbox": face.bbox,
                "decision": decision,
                "similarity": rollcall_core::policy::similarity(decision.distance()),
            })
        );
    }

    if let Some(lecture) = lecture {
        let marks: Vec<AttendanceMark<'_>> = present
            .iter()
            .map(|(key, distance)| AttendanceMark {
                student: key,
                status: AttendanceStatus::Present,
                distance: Some(*distance),
            })
            .collect();
        summary.marked = store.mark_bulk_attendance(lecture, &marks)?.len();
    }

    tracing::info!(
        faces = summary.faces,
        recognized = summary.recognized,
        unknown = summary.unknown,
        marked = summary.marked,
        "recognition finished"
    );
    println!("{}", serde_json::json!({ "summary": summary }));
    Ok(summary)
}
