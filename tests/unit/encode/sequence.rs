use super::*;
use crate::foundation::core::Fps;
use crate::render::frame::FrameRGBA;
use crate::timeline::settings::ExportSettings;

fn cfg() -> SinkConfig {
    SinkConfig::from_settings(&ExportSettings::new(4, 2, Fps::integer(30).unwrap())).unwrap()
}

fn frame(i: u64) -> StreamingFrame {
    StreamingFrame::new(
        i,
        FrameRGBA {
            width: 4,
            height: 2,
            data: vec![128; 32],
            premultiplied: true,
        },
        i as f64 / 30.0,
    )
}

fn backend(log: &SessionLog) -> OfflineSequenceBackend {
    OfflineSequenceBackend::new(Box::new(InMemorySequenceSink::new(log.clone())), cfg())
}

#[test]
fn frames_are_png_encoded_in_order() {
    let log = SessionLog::new();
    let mut b = backend(&log);
    b.start().unwrap();
    for i in 0..5 {
        b.feed_frame(frame(i)).unwrap();
    }
    let blob = b.stop().unwrap();
    assert_eq!(blob.mime_type, "video/mp4");
    assert_eq!(b.frames_encoded(), 5);

    let rec = log.last().unwrap();
    assert_eq!(rec.backend, "offline_sequence");
    assert_eq!(rec.indices, vec![0, 1, 2, 3, 4]);
    assert!(rec.finished);
    // Each PNG carries at least its signature.
    assert!(rec.bytes >= 5 * 8);
}

#[test]
fn feed_before_start_is_an_encoder_error() {
    let log = SessionLog::new();
    let mut b = backend(&log);
    let err = b.feed_frame(frame(0)).unwrap_err();
    assert!(matches!(
        err,
        ExportError::Encoder {
            stage: EncoderStage::Feed,
            ..
        }
    ));
}

#[test]
fn out_of_order_feed_is_rejected() {
    let log = SessionLog::new();
    let mut b = backend(&log);
    b.start().unwrap();
    b.feed_frame(frame(1)).unwrap();
    let err = b.feed_frame(frame(0)).unwrap_err();
    assert!(matches!(
        err,
        ExportError::Encoder {
            stage: EncoderStage::Feed,
            ..
        }
    ));
    assert_eq!(log.last().unwrap().indices, vec![1]);
}

#[test]
fn start_failure_is_tagged_start() {
    let log = SessionLog::new();
    let sink = InMemorySequenceSink::new(log.clone()).failing_at(Some(EncoderStage::Start));
    let mut b = OfflineSequenceBackend::new(Box::new(sink), cfg());
    let err = b.start().unwrap_err();
    assert!(matches!(
        err,
        ExportError::Encoder {
            stage: EncoderStage::Start,
            ..
        }
    ));
}

#[test]
fn cleanup_aborts_and_is_idempotent() {
    let log = SessionLog::new();
    let mut b = backend(&log);
    b.start().unwrap();
    b.feed_frame(frame(0)).unwrap();
    b.cleanup();
    b.cleanup();
    let rec = log.last().unwrap();
    assert!(rec.aborted);
    assert!(!rec.finished);
}

#[test]
fn cleanup_after_stop_keeps_session_finished() {
    let log = SessionLog::new();
    let mut b = backend(&log);
    b.start().unwrap();
    b.feed_frame(frame(0)).unwrap();
    b.stop().unwrap();
    b.cleanup();
    let rec = log.last().unwrap();
    assert!(rec.finished);
    assert!(!rec.aborted);
}
