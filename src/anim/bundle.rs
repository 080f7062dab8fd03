//! Bundle store: write/read a self-describing `.skelanim` archive,
//! plus the legacy bare-CSV path and the path-safety helper the MQTT
//! playback shell depends on. Grounded on
//! `editor/bundlePlayer.py`'s save/load pair and
//! `editor/animation_protocol.py`'s CSV column layout; the zip
//! container itself follows the pattern in the pack's `betrusted`
//! xtask and `khora` hub crates, both of which shell out to the `zip`
//! crate for a manifest-plus-payload archive.

use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{AnimationEvent, AnimationSample};

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Manifest {
    pub version: String,
    pub created: String,
    pub audio_file: Option<String>,
    pub audio_format: Option<String>,
    pub frame_count: u32,
}

pub struct LoadedBundle {
    pub eye_frames: Vec<AnimationSample>,
    pub mouth_frames: Vec<AnimationSample>,
    pub audio_data: Option<Vec<u8>>,
    pub metadata: Manifest,
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("missing archive entry {0}")]
    MissingEntry(&'static str),
    #[error("malformed manifest: {0}")]
    Manifest(serde_json::Error),
    #[error("malformed animation.csv row: {0}")]
    Csv(csv::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    time_ms: u32,
    #[serde(rename = "type")]
    kind: String,
    eye_x: Option<f32>,
    eye_y: Option<f32>,
    // Read as text rather than `bool`: Python's `csv.writerow` serialises
    // `True`/`False` in title case, and `bool::from_str` only accepts
    // lowercase, so a typed `bool` column fails on every pre-bundle
    // recording. Parsed case-insensitively below instead.
    left_eye_closed: Option<String>,
    right_eye_closed: Option<String>,
    both_eyes_closed: Option<String>,
    mouth_position: Option<u8>,
}

fn bool_str(value: bool) -> String {
    if value { "true".to_string() } else { "false".to_string() }
}

fn parse_bool_cell(cell: Option<String>) -> bool {
    cell.is_some_and(|s| s.eq_ignore_ascii_case("true"))
}

fn sample_to_row(sample: &AnimationSample) -> CsvRow {
    match sample.event {
        AnimationEvent::Eye { x, y, left_closed, right_closed, both_closed } => CsvRow {
            time_ms: sample.time_ms,
            kind: "eye".to_string(),
            eye_x: Some(x),
            eye_y: Some(y),
            left_eye_closed: Some(bool_str(left_closed)),
            right_eye_closed: Some(bool_str(right_closed)),
            both_eyes_closed: Some(bool_str(both_closed)),
            mouth_position: None,
        },
        AnimationEvent::Mouth { position } => CsvRow {
            time_ms: sample.time_ms,
            kind: "mouth".to_string(),
            eye_x: None,
            eye_y: None,
            left_eye_closed: None,
            right_eye_closed: None,
            both_eyes_closed: None,
            mouth_position: Some(position),
        },
    }
}

fn row_to_sample(row: CsvRow) -> Result<AnimationSample, BundleError> {
    let event = match row.kind.as_str() {
        "eye" => AnimationEvent::Eye {
            x: row.eye_x.unwrap_or(0.0),
            y: row.eye_y.unwrap_or(0.0),
            left_closed: parse_bool_cell(row.left_eye_closed),
            right_closed: parse_bool_cell(row.right_eye_closed),
            both_closed: parse_bool_cell(row.both_eyes_closed),
        },
        _ => AnimationEvent::Mouth { position: row.mouth_position.unwrap_or(0) },
    };
    Ok(AnimationSample { time_ms: row.time_ms, event })
}

/// Merges and sorts two tracks into CSV row order: ascending
/// `time_ms`, stable on ties (eye rows precede mouth rows at an
/// identical timestamp since they're concatenated in that order
/// before the stable sort).
fn rows_for(eye_track: &[AnimationSample], mouth_track: &[AnimationSample]) -> Vec<CsvRow> {
    let mut rows: Vec<CsvRow> = eye_track.iter().chain(mouth_track.iter()).map(sample_to_row).collect();
    rows.sort_by_key(|r| r.time_ms);
    rows
}

fn write_csv(rows: &[CsvRow]) -> Result<Vec<u8>, BundleError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).map_err(BundleError::Csv)?;
    }
    writer.flush()?;
    Ok(writer.into_inner().expect("in-memory writer never fails to flush"))
}

fn read_csv(bytes: &[u8]) -> Result<(Vec<AnimationSample>, Vec<AnimationSample>), BundleError> {
    let mut reader = csv::Reader::from_reader(bytes);
    let mut eye_frames = Vec::new();
    let mut mouth_frames = Vec::new();
    for result in reader.deserialize() {
        let row: CsvRow = result.map_err(BundleError::Csv)?;
        let is_eye = row.kind == "eye";
        let sample = row_to_sample(row)?;
        if is_eye {
            eye_frames.push(sample);
        } else {
            mouth_frames.push(sample);
        }
    }
    Ok((eye_frames, mouth_frames))
}

/// Writes a `.skelanim` archive atomically: build in a temp file next
/// to `path`, then rename over it.
pub fn save_bundle(
    path: &Path,
    audio_path: Option<&Path>,
    eye_track: &[AnimationSample],
    mouth_track: &[AnimationSample],
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), BundleError> {
    let rows = rows_for(eye_track, mouth_track);
    let csv_bytes = write_csv(&rows)?;

    let audio_bytes = audio_path.map(std::fs::read).transpose()?;
    let manifest = Manifest {
        version: SCHEMA_VERSION.to_string(),
        created: now.to_rfc3339(),
        audio_file: audio_path.and_then(|p| p.file_name()).map(|n| n.to_string_lossy().to_string()),
        audio_format: audio_path.and_then(|p| p.extension()).map(|e| e.to_string_lossy().to_string()),
        frame_count: (eye_track.len() + mouth_track.len()) as u32,
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest).map_err(BundleError::Manifest)?;

    let tmp_path = path.with_extension("skelanim.tmp");
    {
        let file = std::fs::File::create(&tmp_path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file("manifest.json", options)?;
        zip.write_all(&manifest_bytes)?;

        zip.start_file("animation.csv", options)?;
        zip.write_all(&csv_bytes)?;

        if let Some(audio) = &audio_bytes {
            zip.start_file("audio.dat", options)?;
            zip.write_all(audio)?;
        }
        zip.finish()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn load_bundle(path: &Path) -> Result<LoadedBundle, BundleError> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    let manifest: Manifest = {
        let mut entry = archive.by_name("manifest.json").map_err(|_| BundleError::MissingEntry("manifest.json"))?;
        let mut buf = String::new();
        entry.read_to_string(&mut buf)?;
        serde_json::from_str(&buf).map_err(BundleError::Manifest)?
    };

    let (eye_frames, mouth_frames) = {
        let mut entry = archive.by_name("animation.csv").map_err(|_| BundleError::MissingEntry("animation.csv"))?;
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        read_csv(&buf)?
    };

    let audio_data = match archive.by_name("audio.dat") {
        Ok(mut entry) => {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            Some(buf)
        }
        Err(_) => None,
    };

    Ok(LoadedBundle { eye_frames, mouth_frames, audio_data, metadata: manifest })
}

/// Legacy bare-CSV path: no manifest, no audio, same row schema, so
/// pre-bundle recordings stay loadable.
pub fn save_csv_legacy(path: &Path, eye_track: &[AnimationSample], mouth_track: &[AnimationSample]) -> Result<(), BundleError> {
    let rows = rows_for(eye_track, mouth_track);
    let bytes = write_csv(&rows)?;
    let tmp_path = path.with_extension("csv.tmp");
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn load_csv_legacy(path: &Path) -> Result<(Vec<AnimationSample>, Vec<AnimationSample>), BundleError> {
    let bytes = std::fs::read(path)?;
    read_csv(&bytes)
}

#[derive(Debug, Error)]
#[error("path {requested} resolves outside animations directory {base}")]
pub struct PathEscapeError {
    pub base: PathBuf,
    pub requested: String,
}

/// Resolves `requested` relative to `base`, rejecting any path that
/// lexically escapes it. Lexical only — it does not follow symlinks —
/// which is sufficient for the MQTT shell's own contract since it
/// never receives attacker-chosen
/// absolute paths through any other channel.
pub fn resolve_within(base: &Path, requested: &str) -> Result<PathBuf, PathEscapeError> {
    let joined = base.join(requested);
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(PathEscapeError { base: base.to_path_buf(), requested: requested.to_string() });
                }
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.starts_with(base) {
        Ok(normalized)
    } else {
        Err(PathEscapeError { base: base.to_path_buf(), requested: requested.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_tracks() -> (Vec<AnimationSample>, Vec<AnimationSample>) {
        let eye = vec![
            AnimationSample::eye(0, 0.5, 0.5, false, false, false),
            AnimationSample::eye(50, 0.6, 0.4, false, false, false),
            AnimationSample::eye(120, 0.1, 0.9, true, false, false),
        ];
        let mouth = vec![AnimationSample::mouth(10, 200), AnimationSample::mouth(80, 50)];
        (eye, mouth)
    }

    #[test]
    fn bundle_round_trips_tracks_and_audio() {
        let dir = std::env::temp_dir().join("skelhead_bundle_test_round_trip");
        std::fs::create_dir_all(&dir).unwrap();
        let bundle_path = dir.join("test.skelanim");
        let audio_path = dir.join("clip.wav");
        let audio_bytes: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(&audio_path, &audio_bytes).unwrap();

        let (eye, mouth) = sample_tracks();
        let created = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        save_bundle(&bundle_path, Some(&audio_path), &eye, &mouth, created).unwrap();

        let loaded = load_bundle(&bundle_path).unwrap();
        assert_eq!(loaded.eye_frames, eye);
        assert_eq!(loaded.mouth_frames, mouth);
        assert_eq!(loaded.audio_data.as_deref(), Some(audio_bytes.as_slice()));
        assert_eq!(loaded.metadata.frame_count, 5);
        assert_eq!(loaded.metadata.version, SCHEMA_VERSION);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rows_are_sorted_ascending_and_stable_on_ties() {
        let eye = vec![AnimationSample::eye(10, 0.0, 0.0, false, false, false)];
        let mouth = vec![AnimationSample::mouth(10, 5)];
        let rows = rows_for(&eye, &mouth);
        assert_eq!(rows[0].kind, "eye");
        assert_eq!(rows[1].kind, "mouth");
    }

    #[test]
    fn legacy_csv_round_trips_without_a_manifest() {
        let dir = std::env::temp_dir().join("skelhead_bundle_test_legacy_csv");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("legacy.csv");
        let (eye, mouth) = sample_tracks();
        save_csv_legacy(&path, &eye, &mouth).unwrap();
        let (loaded_eye, loaded_mouth) = load_csv_legacy(&path).unwrap();
        assert_eq!(loaded_eye, eye);
        assert_eq!(loaded_mouth, mouth);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn legacy_csv_accepts_title_case_python_booleans() {
        let dir = std::env::temp_dir().join("skelhead_bundle_test_python_bools");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("legacy.csv");
        std::fs::write(
            &path,
            "time_ms,type,eye_x,eye_y,left_eye_closed,right_eye_closed,both_eyes_closed,mouth_position\n\
             0,eye,0.5,0.5,True,False,False,\n\
             10,mouth,,,,,,120\n",
        )
        .unwrap();

        let (eye, mouth) = load_csv_legacy(&path).unwrap();
        assert_eq!(eye.len(), 1);
        let AnimationEvent::Eye { left_closed, right_closed, both_closed, .. } = eye[0].event else { unreachable!() };
        assert!(left_closed);
        assert!(!right_closed);
        assert!(!both_closed);
        assert_eq!(mouth[0].event, AnimationEvent::Mouth { position: 120 });

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn resolve_within_accepts_nested_relative_paths() {
        let base = PathBuf::from("/animations");
        let resolved = resolve_within(&base, "clips/intro.skelanim").unwrap();
        assert_eq!(resolved, PathBuf::from("/animations/clips/intro.skelanim"));
    }

    #[test]
    fn resolve_within_rejects_parent_dir_escape() {
        let base = PathBuf::from("/animations");
        assert!(resolve_within(&base, "../etc/passwd").is_err());
    }

    #[test]
    fn resolve_within_rejects_escape_that_returns_via_several_components() {
        let base = PathBuf::from("/animations");
        assert!(resolve_within(&base, "clips/../../etc/passwd").is_err());
    }
}
