use super::*;
use crate::encode::sink::{InMemorySink, SessionLog};
use crate::foundation::core::Fps;
use crate::timeline::settings::ExportSettings;

fn cfg(fps: u32) -> SinkConfig {
    SinkConfig::from_settings(&ExportSettings::new(2, 2, Fps::integer(fps).unwrap())).unwrap()
}

fn frame(i: u64) -> StreamingFrame {
    StreamingFrame::new(
        i,
        FrameRGBA {
            width: 2,
            height: 2,
            data: vec![i as u8; 16],
            premultiplied: true,
        },
        0.0,
    )
}

fn backend(log: &SessionLog, fps: u32, paced: bool) -> RealtimeStreamBackend {
    RealtimeStreamBackend::new(
        Box::new(InMemorySink::new(log.clone(), "realtime_stream")),
        cfg(fps),
        paced,
    )
}

#[test]
fn unpaced_stream_forwards_every_frame_once() {
    let log = SessionLog::new();
    let mut b = backend(&log, 30, false);
    b.start().unwrap();
    for i in 0..20 {
        b.feed_frame(frame(i)).unwrap();
    }
    b.stop().unwrap();
    assert_eq!(b.frames_encoded(), 20);
    assert_eq!(b.frames_emitted(), 20);

    let rec = log.last().unwrap();
    assert_eq!(rec.indices.len(), 20);
    assert!(rec.is_contiguous());
    assert!(rec.finished);
}

#[test]
fn paced_stream_repeats_last_frame_on_stall() {
    let log = SessionLog::new();
    // 10 ms ticks; a 120 ms stall spans many ticks.
    let mut b = backend(&log, 100, true);
    b.start().unwrap();
    b.feed_frame(frame(0)).unwrap();
    std::thread::sleep(Duration::from_millis(120));
    b.feed_frame(frame(1)).unwrap();
    b.stop().unwrap();

    assert_eq!(b.frames_encoded(), 2);
    assert!(b.frames_emitted() > 2);
    let rec = log.last().unwrap();
    assert!(rec.is_contiguous());
    assert_eq!(rec.indices.len() as u64, b.frames_emitted());
}

#[test]
fn paced_stream_emits_on_time_frames_exactly_once() {
    let log = SessionLog::new();
    // 100 ms ticks; producer jitter stays well inside one tick.
    let mut b = backend(&log, 10, true);
    b.start().unwrap();
    let started = std::time::Instant::now();
    for i in 0..10u64 {
        b.feed_frame(frame(i)).unwrap();
        let jitter = Duration::from_millis(if i % 2 == 0 { 30 } else { 0 });
        let due = started + Duration::from_millis(100 * (i + 1)) + jitter;
        std::thread::sleep(due.saturating_duration_since(std::time::Instant::now()));
    }
    b.stop().unwrap();

    assert_eq!(b.frames_encoded(), 10);
    assert_eq!(b.frames_emitted(), 10);
    let rec = log.last().unwrap();
    assert_eq!(rec.indices.len(), 10);
    assert!(rec.is_contiguous());
}

#[test]
fn sink_failure_surfaces_as_feed_error() {
    let log = SessionLog::new();
    let sink =
        InMemorySink::new(log.clone(), "realtime_stream").failing_at(Some(EncoderStage::Feed));
    let mut b = RealtimeStreamBackend::new(Box::new(sink), cfg(30), false);
    b.start().unwrap();

    // The first frame may be accepted before the sampler reports the failure.
    let mut err = None;
    for i in 0..4 {
        if let Err(e) = b.feed_frame(frame(i)) {
            err = Some(e);
            break;
        }
    }
    let err = match err {
        Some(e) => e,
        None => b.stop().unwrap_err(),
    };
    assert!(matches!(
        err,
        ExportError::Encoder {
            stage: EncoderStage::Feed,
            ..
        }
    ));
    b.cleanup();
    assert!(log.last().unwrap().aborted);
}

#[test]
fn start_failure_then_cleanup_is_safe() {
    let log = SessionLog::new();
    let sink =
        InMemorySink::new(log.clone(), "realtime_stream").failing_at(Some(EncoderStage::Start));
    let mut b = RealtimeStreamBackend::new(Box::new(sink), cfg(30), true);
    let err = b.start().unwrap_err();
    assert!(matches!(
        err,
        ExportError::Encoder {
            stage: EncoderStage::Start,
            ..
        }
    ));
    b.cleanup();
    b.cleanup();
    assert!(b.feed_frame(frame(0)).is_err());
}

#[test]
fn cleanup_mid_stream_aborts_sink() {
    let log = SessionLog::new();
    let mut b = backend(&log, 30, true);
    b.start().unwrap();
    b.feed_frame(frame(0)).unwrap();
    b.cleanup();
    let rec = log.last().unwrap();
    assert!(rec.aborted);
    assert!(!rec.finished);
}

#[test]
fn stop_without_start_is_an_error() {
    let log = SessionLog::new();
    let mut b = backend(&log, 30, false);
    assert!(matches!(
        b.stop().unwrap_err(),
        ExportError::Encoder {
            stage: EncoderStage::Stop,
            ..
        }
    ));
}
