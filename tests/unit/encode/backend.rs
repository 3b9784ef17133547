use super::*;
use crate::audio::mixer::MIX_CHANNELS;
use crate::encode::targets::{InMemoryHardware, InMemoryTargets};
use crate::foundation::core::Fps;
use crate::render::frame::FrameRGBA;
use std::sync::Arc;

fn settings() -> ExportSettings {
    ExportSettings::new(4, 2, Fps::integer(30).unwrap())
}

fn frame(i: u64) -> StreamingFrame {
    StreamingFrame::new(
        i,
        FrameRGBA {
            width: 4,
            height: 2,
            data: vec![255; 32],
            premultiplied: true,
        },
        i as f64 / 30.0,
    )
}

fn mixed(frames: usize) -> MixedAudio {
    MixedAudio {
        sample_rate: 100,
        channels: MIX_CHANNELS,
        samples: Arc::new(vec![0.25; frames * 2]),
    }
}

#[test]
fn backend_kind_names_are_stable() {
    assert_eq!(BackendKind::RealtimeStream.to_string(), "realtime_stream");
    assert_eq!(BackendKind::OfflineSequence.as_str(), "offline_sequence");
    assert_eq!(
        serde_json::to_string(&BackendKind::Hardware).unwrap(),
        "\"hardware\""
    );
}

#[test]
fn frame_order_requires_strict_increase() {
    let mut order = FrameOrder::default();
    order.admit(FrameIndex(0)).unwrap();
    order.admit(FrameIndex(2)).unwrap();
    assert!(order.admit(FrameIndex(2)).is_err());
    assert!(order.admit(FrameIndex(1)).is_err());
    assert_eq!(order.count(), 2);
}

#[test]
fn final_blob_sizes() {
    let blob = FinalBlob::new("video/mp4", BlobData::Memory(vec![1, 2, 3])).unwrap();
    assert_eq!(blob.size_bytes, 3);

    let missing = std::env::temp_dir().join("vexport_missing_blob_output.mp4");
    let err = FinalBlob::new("video/mp4", BlobData::File(missing)).unwrap_err();
    assert!(matches!(
        err,
        ExportError::Encoder {
            stage: EncoderStage::Stop,
            ..
        }
    ));
}

#[test]
fn audio_track_file_is_removed_on_drop() {
    let path = {
        let mut file = AudioTrackFile::default();
        file.write(&mixed(10)).unwrap();
        let input = file.input().unwrap();
        assert_eq!(input.channels, 2);
        assert_eq!(input.sample_rate, 100);
        assert_eq!(std::fs::metadata(&input.path).unwrap().len(), 10 * 2 * 4);
        input.path
    };
    assert!(!path.exists());
}

#[test]
fn empty_audio_writes_nothing() {
    let mut file = AudioTrackFile::default();
    file.write(&mixed(0)).unwrap();
    assert!(file.input().is_none());
}

#[test]
fn create_builds_each_kind() {
    let targets =
        InMemoryTargets::new().with_hardware(InMemoryHardware::Supported { fail_at: None });
    for kind in [
        BackendKind::RealtimeStream,
        BackendKind::OfflineSequence,
        BackendKind::Hardware,
    ] {
        let b = EncoderBackend::create(kind, &targets, &settings(), false).unwrap();
        assert_eq!(b.kind(), kind);
        assert_eq!(b.requires_pacing(), kind == BackendKind::RealtimeStream);
    }
}

#[test]
fn every_backend_delivers_fed_frames() {
    for kind in [
        BackendKind::RealtimeStream,
        BackendKind::OfflineSequence,
        BackendKind::Hardware,
    ] {
        let targets =
            InMemoryTargets::new().with_hardware(InMemoryHardware::Supported { fail_at: None });
        let mut b = EncoderBackend::create(kind, &targets, &settings(), false).unwrap();
        b.set_audio_source(&mixed(30)).unwrap();
        b.start().unwrap();
        for i in 0..4 {
            b.feed_frame(frame(i)).unwrap();
        }
        let blob = b.stop().unwrap();
        b.cleanup();
        assert_eq!(blob.mime_type, "video/mp4");
        assert_eq!(b.frames_encoded(), 4);

        let rec = targets.log().last().unwrap();
        assert_eq!(rec.backend, kind.as_str());
        assert_eq!(rec.indices, vec![0, 1, 2, 3]);
        assert!(rec.config.unwrap().audio.is_some());
    }
}

#[test]
fn cleanup_removes_audio_temp_file() {
    let targets = InMemoryTargets::new();
    let mut b =
        EncoderBackend::create(BackendKind::OfflineSequence, &targets, &settings(), false).unwrap();
    b.set_audio_source(&mixed(5)).unwrap();
    b.start().unwrap();
    let path = targets
        .log()
        .last()
        .and_then(|r| r.config)
        .and_then(|c| c.audio)
        .unwrap()
        .path;
    assert!(path.exists());
    b.cleanup();
    assert!(!path.exists());
    b.cleanup();
}
