use crate::foundation::math::premultiply_rgba8_in_place;
use crate::export::preflight::Capability;
use crate::timeline::model::{MediaItem, MediaKind, MediaLibrary, MediaSource};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Internal audio mixing sample rate.
pub const MIX_SAMPLE_RATE: u32 = 48_000;

/// Decoder failure, translated into render or audio errors by the caller.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("decode timed out after {0:?}")]
    Timeout(Duration),
    #[error("unsupported source: {0}")]
    Unsupported(String),
    #[error("decode failed: {0}")]
    Failed(String),
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Decoded still, premultiplied RGBA8, ready to be used as a paint.
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixmap: Arc<vello_cpu::Pixmap>,
}

impl DecodedImage {
    /// Wrap premultiplied RGBA8 bytes.
    pub fn from_premul_bytes(width: u32, height: u32, bytes: &[u8]) -> DecodeResult<Self> {
        let w: u16 = width
            .try_into()
            .map_err(|_| DecodeError::Unsupported(format!("image width {width} exceeds u16")))?;
        let h: u16 = height
            .try_into()
            .map_err(|_| DecodeError::Unsupported(format!("image height {height} exceeds u16")))?;
        if w == 0 || h == 0 {
            return Err(DecodeError::Failed("image has zero size".to_owned()));
        }
        if bytes.len() != (width as usize) * (height as usize) * 4 {
            return Err(DecodeError::Failed(format!(
                "pixel buffer is {} bytes, expected {}",
                bytes.len(),
                (width as usize) * (height as usize) * 4
            )));
        }
        let mut may_have_opacities = false;
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for px in bytes.chunks_exact(4) {
            may_have_opacities |= px[3] != 255;
            pixels.push(vello_cpu::peniko::color::PremulRgba8 {
                r: px[0],
                g: px[1],
                b: px[2],
                a: px[3],
            });
        }
        Ok(Self {
            width,
            height,
            pixmap: Arc::new(vello_cpu::Pixmap::from_parts_with_opacity(
                pixels,
                w,
                h,
                may_have_opacities,
            )),
        })
    }

    /// Wrap straight-alpha RGBA8 bytes.
    pub fn from_straight_bytes(width: u32, height: u32, mut bytes: Vec<u8>) -> DecodeResult<Self> {
        premultiply_rgba8_in_place(&mut bytes);
        Self::from_premul_bytes(width, height, &bytes)
    }

    /// Memory held by the pixel data.
    pub fn byte_len(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * 4
    }
}

/// Decoded interleaved PCM.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioPcm {
    pub sample_rate: u32,
    pub channels: u16,
    pub interleaved: Arc<Vec<f32>>,
}

impl AudioPcm {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.interleaved.len() / usize::from(self.channels)
        }
    }
}

/// Turns media items into pixels and samples.
///
/// `decode_video_frame` must bound its wait by `timeout` and report [`DecodeError::Timeout`]
/// instead of hanging.
pub trait MediaDecoder: Send + Sync {
    fn decode_image(&self, item: &MediaItem) -> DecodeResult<DecodedImage>;

    fn decode_video_frame(
        &self,
        item: &MediaItem,
        source_time: f64,
        timeout: Duration,
    ) -> DecodeResult<DecodedImage>;

    fn decode_audio(&self, item: &MediaItem) -> DecodeResult<AudioPcm>;

    /// External tools this decoder needs for `media`.
    fn required_capabilities(&self, _media: &MediaLibrary) -> Vec<Capability> {
        Vec::new()
    }
}

/// Decoder using the `image` crate for stills and the system `ffmpeg`/`ffprobe` for video
/// and audio.
#[derive(Debug, Default)]
pub struct FfmpegMediaDecoder {
    video_dims: Mutex<HashMap<PathBuf, (u32, u32)>>,
}

impl FfmpegMediaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn video_dims(&self, item: &MediaItem, path: &Path) -> DecodeResult<(u32, u32)> {
        if let (Some(w), Some(h)) = (item.width, item.height) {
            return Ok((w, h));
        }
        let mut dims = self.video_dims.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(d) = dims.get(path) {
            return Ok(*d);
        }
        let d = probe_video_dims(path)?;
        dims.insert(path.to_path_buf(), d);
        Ok(d)
    }
}

impl MediaDecoder for FfmpegMediaDecoder {
    fn required_capabilities(&self, media: &MediaLibrary) -> Vec<Capability> {
        let mut out = Vec::new();
        for item in media.iter() {
            if !matches!(item.source, MediaSource::Path(_)) {
                continue;
            }
            let needs: &[Capability] = match item.kind {
                MediaKind::Video => &[Capability::Ffmpeg, Capability::Ffprobe],
                MediaKind::Audio => &[Capability::Ffmpeg],
                MediaKind::Image => &[],
            };
            for c in needs {
                if !out.contains(c) {
                    out.push(*c);
                }
            }
        }
        out
    }

    fn decode_image(&self, item: &MediaItem) -> DecodeResult<DecodedImage> {
        let dyn_img = match &item.source {
            MediaSource::Path(p) => image::open(p)
                .map_err(|e| DecodeError::Failed(format!("open image '{}': {e}", p.display())))?,
            MediaSource::Bytes(b) => image::load_from_memory(b)
                .map_err(|e| DecodeError::Failed(format!("decode image bytes: {e}")))?,
            MediaSource::Pcm { .. } => {
                return Err(DecodeError::Unsupported(format!(
                    "media '{}' holds PCM, not an image",
                    item.id
                )));
            }
        };
        let rgba = dyn_img.to_rgba8();
        let (w, h) = rgba.dimensions();
        DecodedImage::from_straight_bytes(w, h, rgba.into_raw())
    }

    fn decode_video_frame(
        &self,
        item: &MediaItem,
        source_time: f64,
        timeout: Duration,
    ) -> DecodeResult<DecodedImage> {
        let MediaSource::Path(path) = &item.source else {
            return self.decode_image(item);
        };
        let (w, h) = self.video_dims(item, path)?;
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error", "-ss", &format!("{:.6}", source_time.max(0.0))])
            .arg("-i")
            .arg(path)
            .args([
                "-frames:v",
                "1",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgba",
                "-s",
                &format!("{w}x{h}"),
                "pipe:1",
            ]);
        let out = run_with_timeout(cmd, timeout)?;
        let expected = (w as usize) * (h as usize) * 4;
        if out.len() < expected {
            return Err(DecodeError::Failed(format!(
                "ffmpeg returned {} bytes for a {w}x{h} frame of '{}'",
                out.len(),
                path.display()
            )));
        }
        let mut frame = out;
        frame.truncate(expected);
        DecodedImage::from_straight_bytes(w, h, frame)
    }

    fn decode_audio(&self, item: &MediaItem) -> DecodeResult<AudioPcm> {
        match &item.source {
            MediaSource::Pcm {
                sample_rate,
                channels,
                samples,
            } => {
                if *sample_rate == 0 || *channels == 0 {
                    return Err(DecodeError::Failed(
                        "PCM source needs non-zero rate and channels".to_owned(),
                    ));
                }
                Ok(AudioPcm {
                    sample_rate: *sample_rate,
                    channels: *channels,
                    interleaved: Arc::clone(samples),
                })
            }
            MediaSource::Path(path) => decode_audio_f32_stereo(path, MIX_SAMPLE_RATE),
            MediaSource::Bytes(_) => Err(DecodeError::Unsupported(format!(
                "media '{}' holds image bytes, not audio",
                item.id
            ))),
        }
    }
}

fn probe_video_dims(path: &Path) -> DecodeResult<(u32, u32)> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
    }

    let out = Command::new("ffprobe")
        .args(["-v", "error", "-print_format", "json", "-show_streams"])
        .arg(path)
        .output()
        .map_err(|e| DecodeError::Failed(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(DecodeError::Failed(format!(
            "ffprobe failed for '{}': {}",
            path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| DecodeError::Failed(format!("ffprobe json parse failed: {e}")))?;
    parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .and_then(|s| Some((s.width?, s.height?)))
        .ok_or_else(|| DecodeError::Failed(format!("no video stream in '{}'", path.display())))
}

fn decode_audio_f32_stereo(path: &Path, sample_rate: u32) -> DecodeResult<AudioPcm> {
    let out = Command::new("ffmpeg")
        .args(["-v", "error", "-i"])
        .arg(path)
        .args([
            "-vn",
            "-f",
            "f32le",
            "-acodec",
            "pcm_f32le",
            "-ac",
            "2",
            "-ar",
            &sample_rate.to_string(),
            "pipe:1",
        ])
        .output()
        .map_err(|e| DecodeError::Failed(format!("failed to run ffmpeg for audio decode: {e}")))?;

    if !out.status.success() {
        let msg = String::from_utf8_lossy(&out.stderr);
        // Video files without an audio stream decode to silence.
        if msg.contains("matches no streams")
            || msg.contains("does not contain any stream")
        {
            return Ok(AudioPcm {
                sample_rate,
                channels: 2,
                interleaved: Arc::new(Vec::new()),
            });
        }
        return Err(DecodeError::Failed(format!(
            "ffmpeg audio decode failed for '{}': {}",
            path.display(),
            msg.trim()
        )));
    }
    if !out.stdout.len().is_multiple_of(4) {
        return Err(DecodeError::Failed(
            "decoded audio byte length is not aligned to f32 samples".to_owned(),
        ));
    }
    let pcm = out
        .stdout
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(AudioPcm {
        sample_rate,
        channels: 2,
        interleaved: Arc::new(pcm),
    })
}

/// Run `cmd`, collecting stdout, killing it once `timeout` elapses.
fn run_with_timeout(cmd: Command, timeout: Duration) -> DecodeResult<Vec<u8>> {
    let mut proc = PipedChild::spawn(cmd)?;
    let status = proc.wait(timeout, Child::try_wait)?;
    let (stdout, stderr) = proc.collect();
    let stdout = stdout?;
    if !status.success() {
        return Err(DecodeError::Failed(format!(
            "ffmpeg exited with status {status}: {}",
            String::from_utf8_lossy(&stderr).trim()
        )));
    }
    Ok(stdout)
}

type Drain = JoinHandle<std::io::Result<Vec<u8>>>;

fn drain(mut pipe: impl Read + Send + 'static) -> Drain {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf).map(|_| buf)
    })
}

/// Child process whose stdout and stderr are read on background threads.
struct PipedChild {
    child: Child,
    stdout: Option<Drain>,
    stderr: Option<Drain>,
}

impl PipedChild {
    fn spawn(mut cmd: Command) -> DecodeResult<Self> {
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DecodeError::Failed(format!("failed to spawn ffmpeg: {e}")))?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DecodeError::Failed("failed to open ffmpeg pipes".to_owned()));
        };
        Ok(Self {
            child,
            stdout: Some(drain(stdout)),
            stderr: Some(drain(stderr)),
        })
    }

    /// Poll until the child exits. On timeout or a failed poll the child is killed and reaped
    /// before returning.
    fn wait(
        &mut self,
        timeout: Duration,
        mut poll: impl FnMut(&mut Child) -> std::io::Result<Option<ExitStatus>>,
    ) -> DecodeResult<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            match poll(&mut self.child) {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    self.kill();
                    return Err(DecodeError::Timeout(timeout));
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(2)),
                Err(e) => {
                    self.kill();
                    return Err(DecodeError::Failed(format!("waiting for ffmpeg: {e}")));
                }
            }
        }
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = self.collect();
    }

    /// Join both drains: stdout as read, stderr best-effort.
    fn collect(&mut self) -> (DecodeResult<Vec<u8>>, Vec<u8>) {
        let stdout = match self.stdout.take() {
            Some(h) => h
                .join()
                .map_err(|_| DecodeError::Failed("ffmpeg stdout drain thread panicked".to_owned()))
                .and_then(|r| {
                    r.map_err(|e| DecodeError::Failed(format!("ffmpeg stdout read failed: {e}")))
                }),
            None => Err(DecodeError::Failed("ffmpeg stdout already collected".to_owned())),
        };
        let stderr = self
            .stderr
            .take()
            .and_then(|h| h.join().ok())
            .and_then(|r| r.ok())
            .unwrap_or_default();
        (stdout, stderr)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/media/decode.rs"]
mod tests;
