use mp4depth::editor::{EditOptions, merge_files};
use mp4depth::format::TrackType;
use std::env;
use std::path::Path;

// Embeds an inner clip holding a sharp and a linear depth track into an
// outer clip, in place. Both files must already be complete MP4s.
fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <outer.mp4> <inner.mp4>", args[0]);
        std::process::exit(1);
    }

    let types = [TrackType::SharpVideo, TrackType::DepthLinear];
    let location = merge_files(Path::new(&args[1]), Path::new(&args[2]), &types, &EditOptions::default())?;
    println!("edvd box: {} bytes at offset {}", location.length, location.offset);
    Ok(())
}
