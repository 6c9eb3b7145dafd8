use anyhow::{Context, bail};
use clap::{ArgAction, Parser, Subcommand};
use mp4depth::{
    DepthClipInfo, EditOptions, EditType, TrackType,
    editor::{how_to_edit, merge_files},
    reader::read_depth_clip_info,
    tree::parse_for_meta,
    util::copy_range,
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Inspect, merge and split MP4 depth containers")]
struct Args {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report top-level boxes and any embedded inner clip
    Info {
        path: PathBuf,

        /// Emit JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Embed an inner clip into an outer clip, editing both in place
    Merge {
        outer: PathBuf,
        inner: PathBuf,

        /// Track type code per inner track, e.g. 0,1,3
        #[arg(long, value_delimiter = ',', required = true)]
        track_types: Vec<u8>,

        /// Copy buffer size in bytes
        #[arg(long)]
        buffer_size: Option<usize>,

        /// Smallest usable free box after moov, in bytes
        #[arg(long)]
        min_free: Option<u64>,
    },
    /// Copy the embedded inner clip out to its own file
    Split { path: PathBuf, out: PathBuf },
}

#[derive(Debug, Serialize)]
struct TopBox {
    typ: String,
    offset: u64,
    size: u64,
    header_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    uuid: Option<String>,
}

#[derive(Debug, Serialize)]
struct Report {
    file: String,
    boxes: Vec<TopBox>,
    edit_type: EditType,
    #[serde(skip_serializing_if = "Option::is_none")]
    depth: Option<DepthClipInfo>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default_level = match args.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Info { path, json } => info(path, json),
        Command::Merge { outer, inner, track_types, buffer_size, min_free } => {
            let mut options = EditOptions::default();
            if let Some(n) = buffer_size {
                options = options.with_copy_buffer_size(n);
            }
            if let Some(n) = min_free {
                options = options.with_min_free_slack(n);
            }
            let types = track_types
                .iter()
                .map(|&c| TrackType::from_code(c).with_context(|| format!("unknown track type code {c}")))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let location = merge_files(&outer, &inner, &types, &options)
                .with_context(|| format!("merging {} into {}", inner.display(), outer.display()))?;
            println!("edvd at offset {} ({} bytes)", location.offset, location.length);
            Ok(())
        }
        Command::Split { path, out } => split(path, out),
    }
}

fn info(path: PathBuf, json: bool) -> anyhow::Result<()> {
    let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let mut r = BufReader::new(file);
    let root = parse_for_meta(&mut r).context("parsing box structure")?;
    let depth = read_depth_clip_info(&mut r)?;

    let report = Report {
        file: path.display().to_string(),
        boxes: root
            .boxes
            .iter()
            .map(|b| TopBox {
                typ: b.typ().to_string(),
                offset: b.start().unwrap_or_default(),
                size: b.size(),
                header_size: b.hdr.header_size,
                uuid: b.hdr.uuid.map(hex::encode),
            })
            .collect(),
        edit_type: how_to_edit(&root, &EditOptions::default()),
        depth,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", report.file);
    for b in &report.boxes {
        let uuid = b.uuid.as_deref().map(|u| format!(" uuid={u}")).unwrap_or_default();
        println!("  {} @{} size={} header={}{}", b.typ, b.offset, b.size, b.header_size, uuid);
    }
    println!("edit type: {:?}", report.edit_type);
    match &report.depth {
        Some(d) => {
            let range = d.inner_clip_range();
            let types: Vec<String> = d.inner_track_types.iter().map(|t| t.to_string()).collect();
            println!("inner clip: offset={} length={}", range.offset, range.length);
            println!("inner tracks: {}", types.join(", "));
        }
        None => println!("not a depth clip"),
    }
    Ok(())
}

fn split(path: PathBuf, out: PathBuf) -> anyhow::Result<()> {
    let mut r = BufReader::new(File::open(&path).with_context(|| format!("opening {}", path.display()))?);
    let Some(depth) = read_depth_clip_info(&mut r)? else {
        bail!("{} has no embedded inner clip", path.display());
    };
    let range = depth.inner_clip_range();
    r.seek(SeekFrom::Start(range.offset))?;
    let mut w = BufWriter::new(File::create(&out).with_context(|| format!("creating {}", out.display()))?);
    let copied = copy_range(&mut r, &mut w, Some(range.length), EditOptions::default().copy_buffer_size)?;
    w.flush()?;
    println!("wrote {copied} bytes to {}", out.display());
    Ok(())
}
