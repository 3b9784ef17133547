use super::*;
use crate::media::decode::{DecodeResult, DecodedImage, FfmpegMediaDecoder};
use crate::timeline::model::{
    ElementPayload, MediaItem, MediaKind, MediaPayload, MediaSource,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const RATE: u32 = 100;

/// Counts audio decodes; PCM sources decode without ffmpeg.
#[derive(Default)]
struct CountingDecoder {
    inner: FfmpegMediaDecoder,
    audio_calls: AtomicUsize,
}

impl MediaDecoder for CountingDecoder {
    fn decode_image(&self, item: &MediaItem) -> DecodeResult<DecodedImage> {
        self.inner.decode_image(item)
    }

    fn decode_video_frame(
        &self,
        item: &MediaItem,
        source_time: f64,
        timeout: Duration,
    ) -> DecodeResult<DecodedImage> {
        self.inner.decode_video_frame(item, source_time, timeout)
    }

    fn decode_audio(&self, item: &MediaItem) -> DecodeResult<AudioPcm> {
        self.audio_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.decode_audio(item)
    }
}

fn pcm_item(id: &str, channels: u16, samples: Vec<f32>) -> MediaItem {
    MediaItem {
        id: id.to_owned(),
        kind: MediaKind::Audio,
        source: MediaSource::Pcm {
            sample_rate: RATE,
            channels,
            samples: Arc::new(samples),
        },
        duration: None,
        width: None,
        height: None,
    }
}

fn track(id: &str, media_id: &str, start: f64, duration: f64) -> TimelineElement {
    TimelineElement {
        id: id.to_owned(),
        track_index: 0,
        layer: None,
        start_time: start,
        duration,
        trim_start: 0.0,
        trim_end: 0.0,
        payload: ElementPayload::Media(MediaPayload {
            media_id: media_id.to_owned(),
            kind: MediaKind::Audio,
            volume: 1.0,
            pan: 0.0,
            muted: false,
        }),
    }
}

fn set_payload(el: &mut TimelineElement, f: impl FnOnce(&mut MediaPayload)) {
    if let ElementPayload::Media(m) = &mut el.payload {
        f(m);
    }
}

fn mixer() -> (AudioMixer, Arc<CountingDecoder>) {
    let dec = Arc::new(CountingDecoder::default());
    let d: Arc<dyn MediaDecoder> = dec.clone();
    let fps = Fps::integer(10).unwrap();
    (AudioMixer::new(d, fps).with_sample_rate(RATE), dec)
}

fn lib(items: Vec<MediaItem>) -> MediaLibrary {
    items.into()
}

fn frame(mix: &MixedAudio, i: usize) -> (f32, f32) {
    (mix.samples[i * 2], mix.samples[i * 2 + 1])
}

#[test]
fn output_length_is_floor_of_rate_times_duration() {
    let (m, _) = mixer();
    let mix = m.mix_tracks(1.559);
    assert_eq!(mix.frames(), 155);
    assert_eq!(mix.samples.len(), 310);
    assert!(mix.is_silent());
}

#[test]
fn tracks_are_placed_at_their_start_and_last_their_effective_duration() {
    let (mut m, _) = mixer();
    let media = lib(vec![pcm_item("tone", 1, vec![0.5; 1000])]);
    assert!(m.load(&track("t", "tone", 0.5, 0.3), &media).unwrap());
    let mix = m.mix_tracks(2.0);
    assert_eq!(frame(&mix, 49), (0.0, 0.0));
    assert_eq!(frame(&mix, 50), (0.5, 0.5));
    assert_eq!(frame(&mix, 79), (0.5, 0.5));
    assert_eq!(frame(&mix, 80), (0.0, 0.0));
}

#[test]
fn pan_and_volume_shape_channel_gains() {
    let (mut m, _) = mixer();
    let media = lib(vec![pcm_item("tone", 2, vec![0.5; 400])]);
    let mut right = track("r", "tone", 0.0, 1.0);
    set_payload(&mut right, |p| p.pan = 1.0);
    m.load(&right, &media).unwrap();
    let mut left_half = track("l", "tone", 1.0, 1.0);
    set_payload(&mut left_half, |p| {
        p.pan = -0.5;
        p.volume = 0.5;
    });
    m.load(&left_half, &media).unwrap();

    let mix = m.mix_tracks(2.0);
    assert_eq!(frame(&mix, 10), (0.0, 0.5));
    assert_eq!(frame(&mix, 150), (0.25, 0.125));
}

#[test]
fn trim_start_offsets_into_the_source() {
    let (mut m, _) = mixer();
    let ramp: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
    let media = lib(vec![pcm_item("ramp", 1, ramp)]);
    let mut el = track("t", "ramp", 0.0, 1.0);
    el.trim_start = 0.2;
    m.load(&el, &media).unwrap();
    let mix = m.mix_tracks(1.0);
    assert!((frame(&mix, 0).0 - 0.2).abs() < 1e-4);
    assert!((frame(&mix, 10).0 - 0.3).abs() < 1e-4);
    // 0.8 s of source remain; the track ends there.
    assert_eq!(frame(&mix, 85), (0.0, 0.0));
}

#[test]
fn sum_is_clamped() {
    let (mut m, _) = mixer();
    let media = lib(vec![pcm_item("loud", 1, vec![0.8; 100])]);
    m.load(&track("a", "loud", 0.0, 1.0), &media).unwrap();
    m.load(&track("b", "loud", 0.0, 1.0), &media).unwrap();
    let mix = m.mix_tracks(1.0);
    assert_eq!(frame(&mix, 3), (1.0, 1.0));
}

#[test]
fn sources_decode_once_per_id() {
    let (mut m, dec) = mixer();
    let media = lib(vec![pcm_item("tone", 1, vec![0.1; 100])]);
    m.load(&track("a", "tone", 0.0, 1.0), &media).unwrap();
    m.load(&track("b", "tone", 0.5, 1.0), &media).unwrap();
    assert_eq!(dec.audio_calls.load(Ordering::SeqCst), 1);
    assert_eq!(m.track_count(), 2);
}

#[test]
fn muted_and_late_tracks_are_excluded_silently() {
    let (mut m, dec) = mixer();
    let media = lib(vec![pcm_item("tone", 1, vec![0.1; 100])]);
    let mut muted = track("m", "tone", 0.0, 1.0);
    set_payload(&mut muted, |p| p.muted = true);
    let late = track("late", "tone", 5.0, 1.0);
    let loaded = m.load_all(&[muted, late], &media, 5.0);
    assert_eq!(loaded, 0);
    assert!(m.skipped().is_empty());
    assert_eq!(dec.audio_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_loads_are_skipped_not_fatal() {
    let (mut m, _) = mixer();
    let mut broken = pcm_item("broken", 1, Vec::new());
    broken.source = MediaSource::Bytes(Arc::new(vec![0, 1, 2]));
    let media = lib(vec![broken, pcm_item("ok", 1, vec![0.25; 100])]);
    let els = [
        track("a", "broken", 0.0, 1.0),
        track("b", "missing", 0.0, 1.0),
        track("c", "ok", 0.0, 1.0),
    ];
    assert_eq!(m.load_all(&els, &media, 1.0), 1);
    assert_eq!(m.skipped().len(), 2);
    assert!(m.skipped().iter().all(|e| !e.is_fatal()));
    assert_eq!(frame(&m.mix_tracks(1.0), 0), (0.25, 0.25));
}

#[test]
fn stream_yields_ordered_chunks() {
    let (m, _) = mixer();
    let mix = m.mix_tracks(1.55);
    let chunks: Vec<_> = mix.stream(64).collect();
    assert_eq!(chunks.len(), 3);
    assert_eq!(
        chunks.iter().map(|c| c.start_frame).collect::<Vec<_>>(),
        vec![0, 64, 128]
    );
    assert_eq!(chunks[2].samples.len(), 27 * 2);
}

#[test]
fn writes_raw_f32le() {
    let mix = MixedAudio {
        sample_rate: RATE,
        channels: 2,
        samples: Arc::new(vec![0.5, -0.25]),
    };
    let path = std::env::temp_dir()
        .join(format!("vexport_mix_test_{}", std::process::id()))
        .join("mix.f32le");
    mix.write_f32le(&path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
    assert_eq!(bytes.len(), 8);
    assert_eq!(&bytes[..4], &0.5f32.to_le_bytes());
}

#[test]
fn dispose_drops_tracks() {
    let (mut m, _) = mixer();
    let media = lib(vec![pcm_item("tone", 1, vec![0.1; 100])]);
    m.load(&track("a", "tone", 0.0, 1.0), &media).unwrap();
    m.dispose();
    assert_eq!(m.track_count(), 0);
    assert!(m.mix_tracks(1.0).is_silent());
}

#[test]
fn frame_to_sample_uses_rational_fps() {
    let ntsc = Fps::new(30_000, 1001).unwrap();
    assert_eq!(frame_to_sample(0, ntsc, 48_000), 0);
    assert_eq!(frame_to_sample(30, ntsc, 48_000), 48_048);
    assert_eq!(frame_to_sample(1, Fps::integer(30).unwrap(), 48_000), 1600);
}
