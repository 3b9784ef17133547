use crate::encode::backend::BlobData;
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{Fps, FrameIndex};
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::math::flatten_premul_over_bg;
use crate::render::frame::FrameRGBA;
use crate::timeline::settings::{ExportFormat, Quality};
use anyhow::Context as _;
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// A running `ffmpeg` child fed through stdin, with stderr drained on a thread.
pub(crate) struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,
}

impl FfmpegProcess {
    pub(crate) fn spawn(mut cmd: Command) -> ExportResult<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .context("failed to spawn ffmpeg (is it installed and on PATH?)")?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to open ffmpeg stdin"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to open ffmpeg stderr"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes)?;
            Ok(bytes)
        });
        Ok(Self {
            child,
            stdin: Some(stdin),
            stderr_drain: Some(stderr_drain),
        })
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) -> ExportResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("ffmpeg input is already closed"))?;
        stdin
            .write_all(bytes)
            .context("failed to write to ffmpeg stdin")?;
        Ok(())
    }

    /// Close stdin and wait for a clean exit.
    pub(crate) fn finish(mut self) -> ExportResult<()> {
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .context("failed to wait for ffmpeg to finish")?;
        let stderr = self.take_stderr();
        if !status.success() {
            return Err(anyhow::anyhow!(
                "ffmpeg exited with status {status}: {}",
                String::from_utf8_lossy(&stderr).trim()
            )
            .into());
        }
        Ok(())
    }

    /// Kill the child and reap it.
    pub(crate) fn kill(mut self) {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = self.take_stderr();
    }

    fn take_stderr(&mut self) -> Vec<u8> {
        self.stderr_drain
            .take()
            .and_then(|h| h.join().ok())
            .and_then(|r| r.ok())
            .unwrap_or_default()
    }
}

/// Start of every ffmpeg invocation: overwrite output, quiet logging.
pub(crate) fn base_command() -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-loglevel", "error"]);
    cmd
}

pub(crate) fn push_input_fps(cmd: &mut Command, flag: &str, fps: Fps) {
    cmd.args([flag, &format!("{}/{}", fps.num, fps.den)]);
}

/// Audio input, codec, rate control and container flags, ending with the output path.
pub(crate) fn push_output_args(cmd: &mut Command, cfg: &SinkConfig, out_path: &Path) -> ExportResult<()> {
    if let Some(audio) = cfg.audio.as_ref() {
        if audio.sample_rate == 0 || audio.channels == 0 {
            return Err(ExportError::validation(
                "audio sample_rate and channels must be non-zero when audio is enabled",
            ));
        }
        cmd.args([
            "-f",
            "f32le",
            "-ar",
            &audio.sample_rate.to_string(),
            "-ac",
            &audio.channels.to_string(),
            "-i",
        ])
        .arg(&audio.path);
    }

    cmd.args(["-c:v", &cfg.video_codec, "-pix_fmt", "yuv420p"]);
    match (cfg.quality, cfg.bitrate) {
        (Quality::Lossless, _) | (_, None) => {
            cmd.args(["-crf", "0"]);
        }
        (_, Some(b)) => {
            cmd.args(["-b:v", &b.to_string()]);
        }
    }
    if let Some(g) = cfg.keyframe_interval {
        cmd.args(["-g", &g.to_string()]);
    }

    if cfg.audio.is_some() {
        cmd.args(["-c:a", &cfg.audio_codec, "-shortest"]);
    } else {
        cmd.arg("-an");
    }
    match cfg.format {
        ExportFormat::Mp4 => {
            cmd.args(["-movflags", "+faststart", "-f", "mp4"]);
        }
        ExportFormat::Mov => {
            cmd.args(["-movflags", "+faststart", "-f", "mov"]);
        }
        ExportFormat::WebM => {
            cmd.args(["-f", "webm"]);
        }
    }
    cmd.arg(out_path);
    Ok(())
}

pub(crate) fn check_dimensions(cfg: &SinkConfig) -> ExportResult<()> {
    if cfg.width == 0 || cfg.height == 0 {
        return Err(ExportError::validation("output width/height must be non-zero"));
    }
    if !cfg.width.is_multiple_of(2) || !cfg.height.is_multiple_of(2) {
        return Err(ExportError::validation(
            "output width/height must be even (required for yuv420p output)",
        ));
    }
    Ok(())
}

/// Sink that streams raw frames into the system `ffmpeg`.
pub struct FfmpegSink {
    out_path: PathBuf,
    process: Option<FfmpegProcess>,
    scratch: Vec<u8>,
    cfg: Option<SinkConfig>,
    last_idx: Option<FrameIndex>,
}

impl FfmpegSink {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            process: None,
            scratch: Vec::new(),
            cfg: None,
            last_idx: None,
        }
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> ExportResult<()> {
        check_dimensions(&cfg)?;
        ensure_parent_dir(&self.out_path)?;
        if !is_ffmpeg_on_path() {
            return Err(ExportError::compatibility(["ffmpeg"]));
        }

        let mut cmd = base_command();
        // ffmpeg has no premultiplied input format; frames are flattened in push_frame.
        cmd.args([
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
        ]);
        push_input_fps(&mut cmd, "-r", cfg.fps);
        cmd.args(["-i", "pipe:0"]);
        push_output_args(&mut cmd, &cfg, &self.out_path)?;

        tracing::debug!(out = %self.out_path.display(), codec = %cfg.video_codec, "spawning ffmpeg frame sink");
        self.process = Some(FfmpegProcess::spawn(cmd)?);
        self.scratch = vec![0u8; cfg.frame_bytes()];
        self.cfg = Some(cfg);
        self.last_idx = None;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> ExportResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| ExportError::validation("ffmpeg sink not started"))?;
        if let Some(last) = self.last_idx
            && idx.0 <= last.0
        {
            return Err(ExportError::validation(format!(
                "ffmpeg sink received frame {} after {}",
                idx.0, last.0
            )));
        }
        self.last_idx = Some(idx);
        if frame.width != cfg.width || frame.height != cfg.height {
            return Err(ExportError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, cfg.width, cfg.height
            )));
        }
        if frame.data.len() != self.scratch.len() {
            return Err(ExportError::validation(
                "frame data size does not match width*height*4",
            ));
        }
        let bg = cfg.background;
        if frame.premultiplied {
            flatten_premul_over_bg(&mut self.scratch, &frame.data, [bg.r, bg.g, bg.b]);
        } else {
            self.scratch = frame.flatten_over(bg);
        }
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| ExportError::validation("ffmpeg sink is already finalized"))?;
        process.write(&self.scratch)
    }

    fn end(&mut self) -> ExportResult<BlobData> {
        let process = self
            .process
            .take()
            .ok_or_else(|| ExportError::validation("ffmpeg sink not started"))?;
        process.finish()?;
        self.cfg = None;
        Ok(BlobData::File(self.out_path.clone()))
    }

    fn abort(&mut self) {
        if let Some(p) = self.process.take() {
            p.kill();
        }
        self.cfg = None;
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> ExportResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Names of the video encoders this `ffmpeg` build lists.
pub fn list_video_encoders() -> ExportResult<Vec<String>> {
    let out = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .context("failed to run ffmpeg -encoders")?;
    if !out.status.success() {
        return Err(anyhow::anyhow!("ffmpeg -encoders exited with status {}", out.status).into());
    }
    Ok(parse_video_encoders(&String::from_utf8_lossy(&out.stdout)))
}

/// Parse `ffmpeg -encoders` output, keeping video encoders (`V.....` flag column).
pub(crate) fn parse_video_encoders(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            (flags.len() == 6 && flags.starts_with('V') && name != "=")
                .then(|| name.to_owned())
        })
        .collect()
}

#[cfg(test)]
#[path = "../../tests/unit/encode/ffmpeg.rs"]
mod tests;
