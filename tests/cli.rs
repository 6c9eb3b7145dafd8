mod common;

use common::{FixtureTrack, Layout, synthetic_samples, write_clip};
use mp4depth::format::{TrackFormat, TrackType};
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn mp4depth(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mp4depth")).args(args).output().unwrap()
}

fn path_str(p: &Path) -> &str {
    p.to_str().unwrap()
}

fn write_pair(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let outer = dir.join("outer.mp4");
    let inner = dir.join("inner.mp4");
    let outer_tracks = vec![FixtureTrack::new(TrackFormat::new("video/avc"), synthetic_samples(20, 33_333, 10, 0xB0))];
    let inner_tracks = [TrackType::SharpVideo, TrackType::DepthLinear]
        .into_iter()
        .map(|t| FixtureTrack::new(TrackFormat::new("video/hevc").with_track_type(t), synthetic_samples(20, 33_333, 10, 0xC0)))
        .collect::<Vec<_>>();
    write_clip(&outer, &outer_tracks, Layout::default()).unwrap();
    write_clip(&inner, &inner_tracks, Layout::default()).unwrap();
    (outer, inner)
}

#[test]
fn merge_info_and_split() {
    let dir = tempfile::tempdir().unwrap();
    let (outer, inner) = write_pair(dir.path());

    let out = mp4depth(&["merge", path_str(&outer), path_str(&inner), "--track-types", "0,1"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let out = mp4depth(&["info", path_str(&outer), "--json"]);
    assert!(out.status.success());
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["edit_type"], "moov-before-free");
    assert_eq!(report["depth"]["inner_track_types"], serde_json::json!(["sharp-video", "depth-linear"]));
    let types: Vec<&str> = report["boxes"].as_array().unwrap().iter().map(|b| b["typ"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["ftyp", "moov", "free", "mdat", "edvd"]);

    let split = dir.path().join("split.mp4");
    let out = mp4depth(&["split", path_str(&outer), path_str(&split)]);
    assert!(out.status.success());
    // the split clip is the edited inner file, byte for byte
    assert_eq!(fs::read(&split).unwrap(), fs::read(&inner).unwrap());
}

#[test]
fn failures_exit_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let (outer, inner) = write_pair(dir.path());
    let before = fs::read(&outer).unwrap();

    let out = mp4depth(&["merge", path_str(&outer), path_str(&inner), "--track-types", "0,9"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown track type code 9"));
    assert_eq!(fs::read(&outer).unwrap(), before);

    let out = mp4depth(&["split", path_str(&outer), path_str(&dir.path().join("x.mp4"))]);
    assert!(!out.status.success());
}
