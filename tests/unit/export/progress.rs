use super::*;
use std::cell::RefCell;

fn collect(f: impl FnOnce(&mut ProgressReporter<'_>)) -> Vec<ExportProgress> {
    let seen = RefCell::new(Vec::new());
    let sink = |p: ExportProgress| seen.borrow_mut().push(p);
    let mut reporter = ProgressReporter::new(&sink);
    f(&mut reporter);
    drop(reporter);
    seen.into_inner()
}

#[test]
fn repeated_and_lower_percents_are_dropped() {
    let out = collect(|r| {
        r.report(2, "a");
        r.report(2, "again");
        r.report(5, "b");
        r.report(3, "late");
        r.report(100, "done");
    });
    let percents: Vec<i8> = out.iter().map(|p| p.percent).collect();
    assert_eq!(percents, vec![2, 5, 100]);
}

#[test]
fn warnings_bypass_dedup_and_keep_percent_untouched() {
    let out = collect(|r| {
        r.report(10, "ready");
        r.warn("memory high");
        r.warn("memory high");
        r.report(11, "next");
        r.report(11, "dup");
    });
    assert_eq!(out.len(), 4);
    assert!(out[1].is_warning());
    assert_eq!(out[1].percent, WARNING_PERCENT);
    assert_eq!(out[3].percent, 11);
}

#[test]
fn frame_phase_spans_fifteen_to_ninety() {
    let out = collect(|r| {
        r.report(10, "ready");
        for done in 0..=150 {
            r.frame(done, 150);
        }
    });
    let frames: Vec<&ExportProgress> = out.iter().skip(1).collect();
    assert_eq!(frames.first().unwrap().percent, 15);
    assert_eq!(frames.last().unwrap().percent, 90);
    assert!(frames.windows(2).all(|w| w[0].percent < w[1].percent));
    assert_eq!(frames.len(), 76);
    assert!(frames.last().unwrap().status.contains("150 of 150"));
}

#[test]
fn zero_frames_report_nothing() {
    let out = collect(|r| r.frame(0, 0));
    assert!(out.is_empty());
}

#[test]
fn ignore_progress_accepts_anything() {
    ignore_progress(ExportProgress {
        percent: 50,
        status: "x".to_owned(),
    });
}
