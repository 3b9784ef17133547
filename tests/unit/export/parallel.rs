use super::*;
use crate::config::PipelineConfig;
use crate::encode::targets::InMemoryTargets;
use crate::export::progress::ignore_progress;
use crate::foundation::core::Fps;
use crate::memory::monitor::{MemoryConfig, MemoryMonitor, MIB};
use crate::memory::probe::ManualMemoryProbe;
use crate::timeline::settings::ExportSettings;
use std::sync::atomic::{AtomicUsize, Ordering};

const HD: Canvas = Canvas {
    width: 1920,
    height: 1080,
};

#[test]
fn batch_size_is_capped_by_cores() {
    let cfg = ParallelConfig::default();
    assert_eq!(batch_size(&cfg, 8 * GIB, HD, 4), 8);
    assert_eq!(batch_size(&cfg, 8 * GIB, HD, 16), 16);
    assert_eq!(batch_size(&cfg, 8 * GIB, HD, 1), 2);
}

#[test]
fn batch_size_is_bounded_by_memory() {
    let cfg = ParallelConfig::default();
    let uhd = Canvas {
        width: 3840,
        height: 2160,
    };
    assert_eq!(batch_size(&cfg, GIB, uhd, 8), 4);
    assert_eq!(batch_size(&cfg, 100 * MIB, HD, 8), 2);
    assert_eq!(batch_size(&cfg, 0, HD, 8), 2);
}

#[test]
fn fixed_batch_size_wins() {
    let cfg = ParallelConfig {
        batch_size: Some(5),
        ..ParallelConfig::default()
    };
    assert_eq!(batch_size(&cfg, 0, HD, 1), 5);
}

#[test]
fn watermark_is_at_least_the_minimum() {
    let cfg = ParallelConfig::default();
    assert_eq!(cfg.watermark(2), 20);
    assert_eq!(cfg.watermark(16), 32);
}

#[test]
fn config_validation() {
    assert!(ParallelConfig::default().validate().is_ok());
    let bad = [
        ParallelConfig {
            batch_size: Some(0),
            ..ParallelConfig::default()
        },
        ParallelConfig {
            available_share: 0.0,
            ..ParallelConfig::default()
        },
        ParallelConfig {
            min_batch: 8,
            max_batch: 4,
            ..ParallelConfig::default()
        },
        ParallelConfig {
            memory_stride_batches: 0,
            ..ParallelConfig::default()
        },
    ];
    for cfg in bad {
        assert!(cfg.validate().is_err(), "{cfg:?}");
    }
}

#[test]
fn parallel_exporter_writes_every_frame_in_order() {
    let mut config = PipelineConfig::default();
    config.parallel.batch_size = Some(3);
    let monitor = Arc::new(MemoryMonitor::new(
        MemoryConfig::default(),
        ManualMemoryProbe::new(GIB),
    ));
    let targets = InMemoryTargets::new();
    let log = targets.log().clone();
    let ctx = Arc::new(PipelineContext::new(config, monitor, Arc::new(targets)));

    let seen = Arc::new(AtomicUsize::new(0));
    let hook_seen = Arc::clone(&seen);
    let exporter = ParallelExporter::new(ctx).with_frame_hook(Arc::new(move |_| {
        hook_seen.fetch_add(1, Ordering::SeqCst);
    }));

    let job = ExportJob::new(ExportSettings::new(8, 8, Fps::integer(10).unwrap()), 1.0);
    let outcome = exporter.start_export(&job, &ignore_progress).unwrap();

    assert_eq!(outcome.metadata.frames, 10);
    assert_eq!(outcome.metadata.engine, EngineKind::Parallel);
    assert_eq!(outcome.metadata.backend, BackendKind::OfflineSequence);
    assert_eq!(seen.load(Ordering::SeqCst), 10);
    let rec = log.last().unwrap();
    assert!(rec.is_contiguous());
    assert_eq!(rec.indices.len(), 10);
    assert!(rec.finished);
    assert_eq!(exporter.state(), ExportState::Completed);
}
