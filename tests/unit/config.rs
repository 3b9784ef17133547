use super::*;

#[test]
fn defaults_are_valid() {
    let cfg = PipelineConfig::default();
    assert!(cfg.validate().is_ok());
    assert!(cfg.pacing);
    assert_eq!(cfg.media.seek_timeout(), Duration::from_secs(5));
    assert_eq!(cfg.sequential.standard_memory_stride, 30);
    assert_eq!(cfg.parallel.max_batch, 16);
}

#[test]
fn partial_json_keeps_defaults() {
    let cfg: PipelineConfig = serde_json::from_str(
        r#"{ "pacing": false, "parallel": { "batch_size": 4 }, "memory": { "ceiling_bytes": 1073741824 } }"#,
    )
    .unwrap();
    assert!(!cfg.pacing);
    assert_eq!(cfg.parallel.batch_size, Some(4));
    assert_eq!(cfg.parallel.min_batch, 2);
    assert_eq!(cfg.memory.ceiling_bytes, 1 << 30);
    assert_eq!(cfg.memory.warning_percent, 85.0);
    assert_eq!(cfg.selector, SelectorThresholds::default());
}

#[test]
fn invalid_sections_are_rejected() {
    let mut cfg = PipelineConfig::default();
    cfg.media.video_frame_cache = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = PipelineConfig::default();
    cfg.sequential.optimized_memory_stride = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = PipelineConfig::default();
    cfg.memory.warning_percent = 99.0;
    assert!(cfg.validate().is_err());
}

#[test]
fn from_json_path_reads_and_validates() {
    let dir = std::env::temp_dir().join(format!("vexport_config_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let good = dir.join("good.json");
    std::fs::write(&good, r#"{ "media": { "seek_timeout_ms": 250 } }"#).unwrap();
    let cfg = PipelineConfig::from_json_path(&good).unwrap();
    assert_eq!(cfg.media.seek_timeout(), Duration::from_millis(250));

    let bad = dir.join("bad.json");
    std::fs::write(&bad, r#"{ "parallel": { "available_share": 2.0 } }"#).unwrap();
    assert!(matches!(
        PipelineConfig::from_json_path(&bad),
        Err(ExportError::Validation(_))
    ));

    let missing = dir.join("missing.json");
    assert!(matches!(
        PipelineConfig::from_json_path(&missing),
        Err(ExportError::Other(_))
    ));
    std::fs::remove_dir_all(&dir).unwrap();
}
