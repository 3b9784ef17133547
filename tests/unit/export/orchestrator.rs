use super::*;
use crate::config::PipelineConfig;
use crate::encode::targets::InMemoryTargets;
use crate::export::progress::ignore_progress;
use crate::foundation::core::Fps;
use crate::foundation::error::EncoderStage;
use crate::memory::monitor::{GIB, MemoryConfig, MemoryMonitor};
use crate::memory::probe::ManualMemoryProbe;
use crate::timeline::settings::ExportSettings;
use std::cell::RefCell;

fn exporter(targets: InMemoryTargets) -> SequentialExporter {
    let config = PipelineConfig {
        pacing: false,
        ..PipelineConfig::default()
    };
    let monitor = Arc::new(MemoryMonitor::new(
        MemoryConfig::default(),
        ManualMemoryProbe::new(GIB),
    ));
    SequentialExporter::new(Arc::new(PipelineContext::new(
        config,
        monitor,
        Arc::new(targets),
    )))
}

fn job(duration: f64) -> ExportJob {
    ExportJob::new(ExportSettings::new(8, 8, Fps::integer(10).unwrap()), duration)
}

#[test]
fn strides_follow_profile() {
    let cfg = SequentialConfig::default();
    assert_eq!(cfg.stride(ExportProfile::Standard), 30);
    assert_eq!(cfg.stride(ExportProfile::MemoryOptimized), 60);
    assert!(cfg.validate().is_ok());
    let bad = SequentialConfig {
        standard_memory_stride: 0,
        ..cfg
    };
    assert!(bad.validate().is_err());
}

#[test]
fn exports_every_frame_with_progress_milestones() {
    let targets = InMemoryTargets::new();
    let log = targets.log().clone();
    let exporter = exporter(targets);

    let seen = RefCell::new(Vec::new());
    let progress = |p: ExportProgress| seen.borrow_mut().push(p.percent);
    let outcome = exporter.start_export(&job(2.0), &progress).unwrap();

    assert_eq!(outcome.metadata.frames, 20);
    assert_eq!(outcome.metadata.duration_ms, 2000);
    assert_eq!(outcome.metadata.backend, BackendKind::RealtimeStream);
    assert!(!outcome.metadata.fallback_occurred);
    assert_eq!(outcome.blob.mime_type, "video/mp4");

    let rec = log.last().unwrap();
    assert_eq!(rec.indices.len(), 20);
    assert!(rec.is_contiguous() && rec.finished);

    let percents = seen.into_inner();
    assert_eq!(percents.first(), Some(&2));
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] < w[1]));
    for milestone in [5, 10, 15, 90] {
        assert!(percents.contains(&milestone), "missing {milestone}");
    }
    assert_eq!(exporter.state(), ExportState::Completed);
}

#[test]
fn encoder_start_failure_is_reported_and_cleaned_up() {
    let targets = InMemoryTargets::new().with_realtime_failure(EncoderStage::Start);
    let log = targets.log().clone();
    let exporter = exporter(targets);

    let err = exporter.start_export(&job(1.0), &ignore_progress).unwrap_err();
    assert!(matches!(
        err,
        ExportError::Encoder {
            stage: EncoderStage::Start,
            ..
        }
    ));
    assert_eq!(exporter.state(), ExportState::Failed);
    let rec = log.last().unwrap();
    assert!(rec.indices.is_empty());
    assert!(!rec.finished);
}

#[test]
fn invalid_job_fails_validation() {
    let exporter = exporter(InMemoryTargets::new());
    let err = exporter.start_export(&job(-1.0), &ignore_progress).unwrap_err();
    assert!(matches!(err, ExportError::Validation(_)));
    assert!(!exporter.control.is_busy());
}
