use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use vexport::{
    BlobData, Capabilities, EncoderTargets as _, EngineOverride, ExportJob, ExportProgress,
    Exporter, FfmpegTargets, FontSource, MemoryMonitor, PipelineConfig, format_bytes,
};

#[derive(Parser, Debug)]
#[command(name = "vexport", version, about = "Export a timeline snapshot to video")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export a job description to a video file (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Print capabilities, hardware encoder support, memory status and suggested settings.
    Probe(ProbeArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Export job JSON.
    #[arg(long)]
    job: PathBuf,

    /// Output video path.
    #[arg(long)]
    out: PathBuf,

    /// Engine selection.
    #[arg(long, value_enum, default_value_t = EngineChoice::Auto)]
    engine: EngineChoice,

    /// Pipeline configuration JSON; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Extra font file for text elements. Repeatable.
    #[arg(long = "font")]
    fonts: Vec<PathBuf>,

    /// Do not sleep between frames on realtime backends.
    #[arg(long)]
    no_pacing: bool,
}

#[derive(Parser, Debug)]
struct ProbeArgs {
    /// Pipeline configuration JSON; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Job whose canvas and duration size the suggested settings.
    #[arg(long)]
    job: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EngineChoice {
    Auto,
    Stable,
    Parallel,
    #[value(alias = "webcodecs")]
    Hardware,
}

impl From<EngineChoice> for EngineOverride {
    fn from(c: EngineChoice) -> Self {
        match c {
            EngineChoice::Auto => EngineOverride::Auto,
            EngineChoice::Stable => EngineOverride::Stable,
            EngineChoice::Parallel => EngineOverride::Parallel,
            EngineChoice::Hardware => EngineOverride::Hardware,
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Probe(args) => cmd_probe(args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("VEXPORT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::from_json_path(p)
            .with_context(|| format!("load pipeline config '{}'", p.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if args.no_pacing {
        config.pacing = false;
    }
    let mut job = ExportJob::from_json_path(&args.job)?;
    job.fonts
        .extend(args.fonts.into_iter().map(|path| FontSource { path }));

    let monitor = Arc::new(MemoryMonitor::for_process(config.memory.clone()));
    let targets = Arc::new(FfmpegTargets::new(&args.out));
    let exporter = Exporter::new(config, monitor, targets).with_override(args.engine.into());

    let progress = |p: ExportProgress| {
        if p.is_warning() {
            eprintln!("warning: {}", p.status);
        } else {
            eprintln!("[{:>3}%] {}", p.percent, p.status);
        }
    };
    let outcome = match exporter.start_export(&job, &progress) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Err(e.into());
        }
    };

    let m = &outcome.metadata;
    let location = match &outcome.blob.data {
        BlobData::File(p) => p.display().to_string(),
        BlobData::Memory(_) => "(memory)".to_owned(),
    };
    println!(
        "wrote {location} ({}, {}): {} frames, {} ms, engine={:?} backend={}{}",
        format_bytes(outcome.blob.size_bytes),
        outcome.blob.mime_type,
        m.frames,
        m.duration_ms,
        m.engine,
        m.backend,
        if m.fallback_occurred { " (fallback)" } else { "" }
    );
    if m.skipped_audio_tracks > 0 {
        println!("skipped audio tracks: {}", m.skipped_audio_tracks);
    }
    Ok(())
}

fn cmd_probe(args: ProbeArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_ref())?;
    let monitor = MemoryMonitor::for_process(config.memory.clone());
    let caps = Capabilities::probe();
    let targets = FfmpegTargets::new(std::env::temp_dir().join("vexport_probe.mp4"));
    let hardware = targets.probe_hardware();
    let status = monitor.status();

    println!("ffmpeg: {}", caps.ffmpeg);
    println!("ffprobe: {}", caps.ffprobe);
    println!("cpus: {}", caps.cpus);
    println!("hardware: {}", serde_json::to_string(&hardware)?);
    println!(
        "memory: {} used of {} ({:.1}%, {:?}{})",
        format_bytes(status.used_bytes),
        format_bytes(status.ceiling_bytes),
        status.percent_used,
        status.tier,
        if status.measured { "" } else { ", unmeasured" }
    );

    if let Some(path) = args.job {
        let job = ExportJob::from_json_path(&path)?;
        let s = &job.settings;
        let optimal = monitor.optimal_settings(s.canvas(), job.duration, s.frame_rate);
        println!("optimal: {}", serde_json::to_string(&optimal)?);
    }
    Ok(())
}
