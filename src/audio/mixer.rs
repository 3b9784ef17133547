use crate::foundation::core::Fps;
use crate::foundation::error::{ExportError, ExportResult};
use crate::media::decode::{AudioPcm, MIX_SAMPLE_RATE, MediaDecoder};
use crate::timeline::model::{MediaLibrary, TimelineElement};
use anyhow::Context as _;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Output channel count of every mix.
pub const MIX_CHANNELS: u16 = 2;

/// One audio-bearing element placed on the output sample clock.
#[derive(Clone, Debug)]
struct PlacedTrack {
    element_id: String,
    start_sample: u64,
    len_samples: u64,
    source_start_sec: f64,
    left_gain: f32,
    right_gain: f32,
    pcm: AudioPcm,
}

/// Loads, aligns, pans and sums audio tracks into one stereo buffer.
pub struct AudioMixer {
    decoder: Arc<dyn MediaDecoder>,
    fps: Fps,
    sample_rate: u32,
    decoded: HashMap<String, AudioPcm>,
    tracks: Vec<PlacedTrack>,
    skipped: Vec<ExportError>,
}

impl AudioMixer {
    pub fn new(decoder: Arc<dyn MediaDecoder>, fps: Fps) -> Self {
        Self {
            decoder,
            fps,
            sample_rate: MIX_SAMPLE_RATE,
            decoded: HashMap::new(),
            tracks: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate.max(1);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decode the element's source (once per source id) and place it on the mix clock.
    ///
    /// Returns `Ok(false)` for elements that carry no sound or are muted.
    pub fn load(&mut self, element: &TimelineElement, media: &MediaLibrary) -> ExportResult<bool> {
        let Some(payload) = element.audio() else {
            return Ok(false);
        };
        if payload.muted {
            return Ok(false);
        }
        let item = media.get(&payload.media_id).ok_or_else(|| {
            ExportError::audio(&payload.media_id, "media is not in the library")
        })?;

        let pcm = match self.decoded.get(&item.id) {
            Some(pcm) => pcm.clone(),
            None => {
                let pcm = self
                    .decoder
                    .decode_audio(item)
                    .map_err(|e| ExportError::audio(&item.id, e.to_string()))?;
                if pcm.sample_rate == 0 || pcm.channels == 0 {
                    return Err(ExportError::audio(&item.id, "decoded audio has no channels"));
                }
                self.decoded.insert(item.id.clone(), pcm.clone());
                pcm
            }
        };

        let start_frame = (element.start_time * self.fps.as_f64()).round().max(0.0) as u64;
        let pan = payload.pan.clamp(-1.0, 1.0);
        self.tracks.push(PlacedTrack {
            element_id: element.id.clone(),
            start_sample: frame_to_sample(start_frame, self.fps, self.sample_rate),
            len_samples: (element.effective_duration() * f64::from(self.sample_rate))
                .round()
                .max(0.0) as u64,
            source_start_sec: element.trim_start,
            left_gain: payload.volume * (1.0 - pan.max(0.0)),
            right_gain: payload.volume * (1.0 + pan.min(0.0)),
            pcm,
        });
        Ok(true)
    }

    /// Load every audio-bearing element that starts before `duration`.
    ///
    /// Failures are logged and kept in [`AudioMixer::skipped`]; they never abort the export.
    pub fn load_all(
        &mut self,
        elements: &[TimelineElement],
        media: &MediaLibrary,
        duration: f64,
    ) -> usize {
        let mut loaded = 0;
        for el in elements {
            if el.start_time >= duration {
                continue;
            }
            match self.load(el, media) {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(element = %el.id, error = %e, "skipping audio track");
                    self.skipped.push(e);
                }
            }
        }
        loaded
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Tracks that failed to load.
    pub fn skipped(&self) -> &[ExportError] {
        &self.skipped
    }

    /// Mix all loaded tracks into `floor(sample_rate * duration)` stereo frames.
    pub fn mix_tracks(&self, duration: f64) -> MixedAudio {
        let total = if duration.is_finite() && duration > 0.0 {
            (f64::from(self.sample_rate) * duration).floor() as u64
        } else {
            0
        };
        let mut out = vec![0.0f32; total as usize * usize::from(MIX_CHANNELS)];
        for track in &self.tracks {
            if track.start_sample >= total {
                tracing::debug!(element = %track.element_id, "audio track starts after the export end");
                continue;
            }
            mix_track(&mut out, total, self.sample_rate, track);
        }
        for s in &mut out {
            *s = s.clamp(-1.0, 1.0);
        }
        tracing::debug!(
            tracks = self.tracks.len(),
            frames = total,
            "audio mixed"
        );
        MixedAudio {
            sample_rate: self.sample_rate,
            channels: MIX_CHANNELS,
            samples: Arc::new(out),
        }
    }

    /// Drop decoded sources and placed tracks.
    pub fn dispose(&mut self) {
        self.decoded.clear();
        self.tracks.clear();
    }
}

fn mix_track(out: &mut [f32], total: u64, sample_rate: u32, track: &PlacedTrack) {
    let channels = usize::from(track.pcm.channels);
    let src = track.pcm.interleaved.as_slice();
    let src_frames = track.pcm.frames();
    if src_frames == 0 || (track.left_gain == 0.0 && track.right_gain == 0.0) {
        return;
    }
    let end = (track.start_sample + track.len_samples).min(total);
    for dst in track.start_sample..end {
        let rel_sec = ((dst - track.start_sample) as f64) / f64::from(sample_rate);
        let src_pos = (track.source_start_sec + rel_sec) * f64::from(track.pcm.sample_rate);
        if !src_pos.is_finite() || src_pos < 0.0 {
            break;
        }
        let f0 = src_pos.floor() as usize;
        if f0 >= src_frames {
            break;
        }
        let f1 = (f0 + 1).min(src_frames - 1);
        let frac = (src_pos - f0 as f64) as f32;
        let lerp = |c: usize| {
            let a = src[f0 * channels + c];
            let b = src[f1 * channels + c];
            a + (b - a) * frac
        };
        let (l, r) = if channels == 1 {
            let v = lerp(0);
            (v, v)
        } else {
            (lerp(0), lerp(1))
        };
        let i = dst as usize * usize::from(MIX_CHANNELS);
        out[i] += l * track.left_gain;
        out[i + 1] += r * track.right_gain;
    }
}

/// Nearest output sample for a frame offset, computed on the rational frame rate.
pub(crate) fn frame_to_sample(frame: u64, fps: Fps, sample_rate: u32) -> u64 {
    let num = u128::from(frame) * u128::from(sample_rate) * u128::from(fps.den);
    let den = u128::from(fps.num);
    ((num + den / 2) / den) as u64
}

/// A finished stereo mix.
#[derive(Clone, Debug, PartialEq)]
pub struct MixedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in `[-1, 1]`.
    pub samples: Arc<Vec<f32>>,
}

/// A slice of the mix handed to a consumer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioChunk<'a> {
    /// First sample frame of the chunk.
    pub start_frame: u64,
    pub samples: &'a [f32],
}

impl MixedAudio {
    pub fn frames(&self) -> u64 {
        (self.samples.len() / usize::from(self.channels.max(1))) as u64
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate.max(1))
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| *s == 0.0)
    }

    /// Iterate the mix in chunks of `chunk_frames` sample frames (at least one).
    pub fn stream(&self, chunk_frames: usize) -> impl Iterator<Item = AudioChunk<'_>> {
        let step = chunk_frames.max(1) * usize::from(self.channels.max(1));
        let channels = u64::from(self.channels.max(1));
        self.samples
            .chunks(step)
            .enumerate()
            .map(move |(i, samples)| AudioChunk {
                start_frame: (i * step) as u64 / channels,
                samples,
            })
    }

    /// Write raw little-endian `f32` PCM for ffmpeg's `f32le` demuxer.
    pub fn write_f32le(&self, path: &Path) -> ExportResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("create audio mix directory '{}'", parent.display())
            })?;
        }
        let mut bytes = Vec::with_capacity(self.samples.len() * 4);
        for s in self.samples.iter() {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        std::fs::write(path, bytes)
            .with_context(|| format!("write mixed audio '{}'", path.display()))?;
        Ok(())
    }
}

impl std::fmt::Debug for AudioMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioMixer")
            .field("sample_rate", &self.sample_rate)
            .field("tracks", &self.tracks.len())
            .field("decoded", &self.decoded.len())
            .field("skipped", &self.skipped.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/audio/mixer.rs"]
mod tests;
