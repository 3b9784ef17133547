use super::*;
use crate::render::frame::FrameRGBA;

fn frame(i: u64) -> StreamingFrame {
    StreamingFrame::new(
        i,
        FrameRGBA {
            width: 1,
            height: 1,
            data: vec![0; 4],
            premultiplied: true,
        },
        i as f64,
    )
}

fn indices(buf: &mut ReorderBuffer) -> Vec<u64> {
    let mut out = Vec::new();
    buf.drain(|f| {
        out.push(f.index.0);
        Ok(())
    })
    .unwrap();
    out
}

#[test]
fn drains_in_order_and_stops_at_gap() {
    let mut buf = ReorderBuffer::new(FrameIndex(0), 20);
    for i in [3, 1, 0, 5] {
        buf.insert(frame(i)).unwrap();
    }
    assert_eq!(indices(&mut buf), vec![0, 1]);
    assert_eq!(buf.next_index(), FrameIndex(2));
    assert_eq!(buf.len(), 2);

    buf.insert(frame(2)).unwrap();
    buf.insert(frame(4)).unwrap();
    assert_eq!(indices(&mut buf), vec![2, 3, 4, 5]);
    assert!(buf.is_empty());
}

#[test]
fn rejects_duplicates_and_stale_frames() {
    let mut buf = ReorderBuffer::new(FrameIndex(0), 4);
    buf.insert(frame(1)).unwrap();
    assert!(buf.insert(frame(1)).is_err());
    buf.insert(frame(0)).unwrap();
    indices(&mut buf);
    assert!(buf.insert(frame(0)).is_err());
}

#[test]
fn drain_pauses_while_backlog_exceeds_watermark() {
    let mut buf = ReorderBuffer::new(FrameIndex(10), 3);
    for i in 10..18 {
        buf.insert(frame(i)).unwrap();
    }
    let passes: Vec<Vec<u64>> = (0..5).map(|_| indices(&mut buf)).collect();
    assert_eq!(
        passes,
        vec![vec![10], vec![11], vec![12], vec![13], vec![14, 15, 16, 17]]
    );
    assert!(buf.is_empty());
}

#[test]
fn backlog_at_watermark_drains_in_one_pass() {
    let mut buf = ReorderBuffer::new(FrameIndex(0), 4);
    for i in 0..5 {
        buf.insert(frame(i)).unwrap();
    }
    assert_eq!(indices(&mut buf), vec![0, 1, 2, 3, 4]);
}

#[test]
fn flush_delivers_rest_and_reports_gaps() {
    let mut buf = ReorderBuffer::new(FrameIndex(0), 2);
    for i in 0..6 {
        buf.insert(frame(i)).unwrap();
    }
    let mut out = Vec::new();
    let n = buf
        .flush(|f| {
            out.push(f.index.0);
            Ok(())
        })
        .unwrap();
    assert_eq!(n, 6);
    assert_eq!(out, vec![0, 1, 2, 3, 4, 5]);

    buf.insert(frame(7)).unwrap();
    let err = buf.flush(|_| Ok(())).unwrap_err();
    assert!(err.to_string().contains("frame 6 missing"));
}

#[test]
fn delivery_errors_propagate() {
    let mut buf = ReorderBuffer::new(FrameIndex(0), 8);
    buf.insert(frame(0)).unwrap();
    buf.insert(frame(1)).unwrap();
    let err = buf
        .drain(|f| {
            if f.index.0 == 1 {
                Err(ExportError::encoder(crate::foundation::error::EncoderStage::Feed, "boom"))
            } else {
                Ok(())
            }
        })
        .unwrap_err();
    assert!(matches!(err, ExportError::Encoder { .. }));
    assert_eq!(buf.next_index(), FrameIndex(2));
}
