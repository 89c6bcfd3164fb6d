//! End-to-end autofocus runs against the mock microscope: the two-phase
//! sweep must land the focus stage on the sharpest candidate and publish
//! the entropy curve.

use lsm_engine::config::Settings;
use lsm_engine::context::{event_channel, AcquisitionEvent, EventReceiver};
use lsm_engine::engine::AcquisitionEngine;
use lsm_engine::hardware::mock::MockMicroscope;
use lsm_engine::hardware::Stage;
use lsm_engine::registry::FeatureDescriptor;
use std::sync::Arc;

fn search_settings() -> Settings {
    let mut settings = Settings::default();
    settings.acquisition.buffer_capacity = 16;
    settings.acquisition.data_poll_timeout_ms = 10;
    settings.acquisition.idle_poll_limit = 200;
    settings.autofocus.coarse_range = 20.0;
    settings.autofocus.coarse_step_size = 5.0;
    settings.autofocus.fine_range = 4.0;
    settings.autofocus.fine_step_size = 1.0;
    settings
}

fn run_search(settings: Settings, best_focus: f64) -> (u64, EventReceiver, Arc<MockMicroscope>) {
    let scope = Arc::new(MockMicroscope::new(32, 32).with_best_focus(best_focus));
    let (events, event_rx) = event_channel();
    let engine = AcquisitionEngine::new(scope.clone(), Arc::new(settings), events);

    let features = vec![vec![FeatureDescriptor::named("autofocus")]];
    let report = engine.run(&features).expect("run");
    assert_eq!(report.frames_produced, report.frames_consumed);
    (report.frames_produced, event_rx, scope)
}

fn plot_points(event_rx: &EventReceiver) -> Vec<(f64, f64)> {
    event_rx
        .try_iter()
        .find_map(|event| match event {
            AcquisitionEvent::AutofocusPlot(points) => Some(points),
            _ => None,
        })
        .expect("autofocus plot event")
}

#[test]
fn two_phase_search_lands_on_the_sharpest_focus() {
    // coarse candidates {-10,-5,0,5,10}, fine recentres on 5 -> {3,4,5,6,7}
    let (frames, event_rx, scope) = run_search(search_settings(), 7.0);
    assert_eq!(frames, 11, "10 candidates plus the winner frame");

    let points = plot_points(&event_rx);
    assert_eq!(points.len(), 10);

    let landed = scope.mock_stage().position('f');
    assert!(
        (landed - 7.0).abs() < 1e-9,
        "stage should settle on the best candidate, got {landed}"
    );

    // the published curve agrees with where the stage went
    let (best_pos, _) = points
        .iter()
        .copied()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .expect("non-empty plot");
    assert!((best_pos - landed).abs() < 1e-9);
}

#[test]
fn coarse_only_search_skips_the_fine_sweep() {
    let mut settings = search_settings();
    settings.autofocus.fine_selected = false;

    let (frames, event_rx, scope) = run_search(settings, 5.0);
    assert_eq!(frames, 6, "5 candidates plus the winner frame");
    assert_eq!(plot_points(&event_rx).len(), 5);

    let landed = scope.mock_stage().position('f');
    assert!((landed - 5.0).abs() < 1e-9, "got {landed}");
}
