use super::*;

#[test]
fn pool_is_at_least_one_renderer() {
    let canvas = Canvas {
        width: 4,
        height: 4,
    };
    let mut pool = RendererPool::new(0, canvas, &FontBook::new()).unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.primary().width(), 4);
}

#[test]
fn pool_allocates_requested_slots() {
    let canvas = Canvas {
        width: 6,
        height: 2,
    };
    let mut pool = RendererPool::new(5, canvas, &FontBook::new()).unwrap();
    assert_eq!(pool.slots_mut().len(), 5);
    assert!(pool.slots_mut().iter().all(|r| r.height() == 2));
}

#[test]
fn bad_canvas_fails_allocation() {
    let canvas = Canvas {
        width: 0,
        height: 2,
    };
    assert!(RendererPool::new(2, canvas, &FontBook::new()).is_err());
}
