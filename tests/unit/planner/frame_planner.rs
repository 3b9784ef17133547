use super::*;
use crate::timeline::model::{ElementPayload, TextPayload, TextStyle};

fn text_el(id: &str, track: u32, layer: Option<i32>, start: f64, duration: f64) -> TimelineElement {
    TimelineElement {
        id: id.to_owned(),
        track_index: track,
        layer,
        start_time: start,
        duration,
        trim_start: 0.0,
        trim_end: 0.0,
        payload: ElementPayload::Text(TextPayload {
            content: id.to_owned(),
            style: TextStyle::default(),
            x: None,
            y: None,
        }),
    }
}

fn fps(n: u32) -> Fps {
    Fps::integer(n).unwrap()
}

#[test]
fn total_frames_is_ceil_of_product() {
    assert_eq!(total_frames(fps(30), 5.5), 165);
    assert_eq!(total_frames(fps(30), 10.0), 300);
    assert_eq!(total_frames(fps(30), 0.01), 1);
    assert_eq!(total_frames(fps(24), 1.0 / 3.0), 8);
    assert_eq!(total_frames(fps(30), 0.0), 0);
    assert_eq!(total_frames(Fps::new(30000, 1001).unwrap(), 1.001), 30);
}

#[test]
fn total_frames_matches_ceil_over_grid() {
    for rate in [1u32, 12, 24, 25, 30, 60] {
        for tenths in 0..200u32 {
            let duration = f64::from(tenths) / 10.0;
            let expected = (f64::from(rate) * duration - 1e-9).ceil().max(0.0) as u64;
            assert_eq!(total_frames(fps(rate), duration), expected, "{rate} fps, {duration}s");
        }
    }
}

#[test]
fn visibility_is_boundary_inclusive() {
    let mut e = text_el("a", 0, None, 2.0, 7.0);
    e.trim_end = 1.0;
    assert_eq!(e.end_time(), 8.0);
    assert!(FramePlanner::is_visible(&e, 2.0));
    assert!(FramePlanner::is_visible(&e, 5.0));
    assert!(FramePlanner::is_visible(&e, 8.0));
    assert!(!FramePlanner::is_visible(&e, 1.0));
    assert!(!FramePlanner::is_visible(&e, 9.0));
}

#[test]
fn ordering_is_deterministic_and_input_is_untouched() {
    let elements = vec![
        text_el("t2_top", 1, Some(2), 0.0, 5.0),
        text_el("t1_l2", 0, Some(2), 0.0, 5.0),
        text_el("t1_l1", 0, Some(1), 0.0, 5.0),
        text_el("t2_nolayer", 1, None, 0.0, 5.0),
    ];
    let before = elements.clone();
    let planner = FramePlanner::new(fps(30), 5.0, &elements);

    let first: Vec<&str> = planner
        .visible_elements(1.0)
        .iter()
        .map(|e| e.id.as_str())
        .collect();
    assert_eq!(first, vec!["t1_l1", "t1_l2", "t2_nolayer", "t2_top"]);

    for _ in 0..10 {
        let again: Vec<&str> = planner
            .visible_elements(1.0)
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(again, first);
    }
    assert_eq!(elements, before);
}

#[test]
fn equal_keys_keep_insertion_order() {
    let elements = vec![
        text_el("first", 0, None, 0.0, 1.0),
        text_el("second", 0, Some(0), 0.0, 1.0),
        text_el("third", 0, None, 0.0, 1.0),
    ];
    let planner = FramePlanner::new(fps(30), 1.0, &elements);
    let ids: Vec<&str> = planner
        .visible_elements(0.5)
        .iter()
        .map(|e| e.id.as_str())
        .collect();
    assert_eq!(ids, vec!["first", "second", "third"]);
}

#[test]
fn frame_data_uses_frame_clock() {
    let elements = vec![
        text_el("early", 0, None, 0.0, 1.0),
        text_el("late", 0, None, 2.0, 1.0),
    ];
    let planner = FramePlanner::new(fps(30), 3.0, &elements);
    assert_eq!(planner.total_frames(), 90);

    let d = planner.frame_data(60);
    assert_eq!(d.frame_number, 60);
    assert_eq!(d.timestamp, 2.0);
    let ids: Vec<&str> = d.visible_elements.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["late"]);

    let d = planner.frame_data(30);
    let ids: Vec<&str> = d.visible_elements.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["early"]);
}

#[test]
fn bounds_are_full_canvas_for_every_kind() {
    let e = text_el("a", 0, None, 0.0, 1.0);
    assert_eq!(element_bounds(&e, 640, 360), Rect::new(0.0, 0.0, 640.0, 360.0));
    assert_eq!(element_bounds(&e, 640, 360), element_bounds(&e, 640, 360));
}
