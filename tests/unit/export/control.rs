use super::*;

#[test]
fn second_begin_is_busy_until_guard_drops() {
    let control = ExportControl::new();
    let guard = control.begin().unwrap();
    assert!(control.is_busy());
    assert_eq!(control.state(), ExportState::Preflighting);
    assert!(matches!(control.begin(), Err(ExportError::Busy)));

    guard.settle::<()>(&Ok(()));
    drop(guard);
    assert!(!control.is_busy());
    assert_eq!(control.state(), ExportState::Completed);
    assert!(control.begin().is_ok());
}

#[test]
fn cancel_is_ignored_while_idle() {
    let control = ExportControl::new();
    control.cancel();
    let guard = control.begin().unwrap();
    assert!(guard.check_cancelled().is_ok());
}

#[test]
fn cancel_flag_resets_on_next_run() {
    let control = ExportControl::new();
    {
        let guard = control.begin().unwrap();
        control.cancel();
        control.cancel();
        let res = guard.check_cancelled();
        assert!(matches!(res, Err(ExportError::Cancelled)));
        guard.settle(&res);
    }
    assert_eq!(control.state(), ExportState::Cancelled);

    let guard = control.begin().unwrap();
    assert!(guard.check_cancelled().is_ok());
}

#[test]
fn busy_begin_keeps_the_active_run_cancelled() {
    let control = ExportControl::new();
    let guard = control.begin().unwrap();
    control.cancel();
    assert!(matches!(control.begin(), Err(ExportError::Busy)));
    assert!(matches!(guard.check_cancelled(), Err(ExportError::Cancelled)));
}

#[test]
fn cancel_issued_once_busy_is_never_lost() {
    let control = ExportControl::new();
    for _ in 0..200 {
        std::thread::scope(|s| {
            s.spawn(|| {
                while !control.is_busy() {
                    std::thread::yield_now();
                }
                control.cancel();
            });
            let guard = control.begin().unwrap();
            let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
            while guard.check_cancelled().is_ok() {
                assert!(std::time::Instant::now() < deadline, "cancel was dropped");
                std::thread::yield_now();
            }
        });
    }
}

#[test]
fn dropping_an_active_guard_marks_failure() {
    let control = ExportControl::new();
    {
        let guard = control.begin().unwrap();
        guard.enter(ExportState::Rendering);
    }
    assert_eq!(control.state(), ExportState::Failed);
    assert!(!control.is_busy());
}

#[test]
fn settle_maps_errors_to_terminal_states() {
    let control = ExportControl::new();
    let guard = control.begin().unwrap();
    guard.settle::<()>(&Err(ExportError::memory("full")));
    assert_eq!(control.state(), ExportState::Failed);
    assert!(control.state().is_terminal());
    assert!(!control.state().is_active());
}

#[test]
fn cancel_token_clones_share_state() {
    let token = CancelToken::new();
    let other = token.clone();
    assert!(token.check().is_ok());
    other.cancel();
    assert!(token.is_cancelled());
    assert!(matches!(token.check(), Err(ExportError::Cancelled)));
}
