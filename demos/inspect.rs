use mp4depth::editor::{EditOptions, how_to_edit};
use mp4depth::tree::parse_for_meta;
use std::env;
use std::fs::File;
use std::io::BufReader;

// Prints the top-level boxes of an MP4 file, how its metadata could be
// edited in place, and the embedded inner clip if there is one.
fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <file.mp4>", args[0]);
        std::process::exit(1);
    }
    let path = &args[1];

    let tree = parse_for_meta(BufReader::new(File::open(path)?))?;
    for b in &tree.boxes {
        println!("{} @{} size={}", b.typ(), b.start().unwrap_or_default(), b.size());
    }
    println!("edit type: {:?}", how_to_edit(&tree, &EditOptions::default()));

    match mp4depth::probe_path(path)? {
        Some(info) => {
            let range = info.inner_clip_range();
            println!("inner clip: {} bytes at {}", range.length, range.offset);
            for (i, t) in info.inner_track_types.iter().enumerate() {
                println!("  track {i}: {t}");
            }
        }
        None => println!("not a depth clip"),
    }
    Ok(())
}
