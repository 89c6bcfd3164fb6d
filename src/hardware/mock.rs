//! In-process mock hardware for tests and the demo binary.
//!
//! [`MockStage`] models a bounded multi-axis stage with an instantaneous
//! move and a short simulated constant-velocity sweep. [`MockMicroscope`]
//! renders deterministic synthetic frames whose texture contrast peaks at
//! a configurable focus position, so focus-metric code has a real optimum
//! to find.

use super::{MicroscopeControl, ScanStage, Stage};
use crate::buffer::FrameSlot;
use crate::error::EngineResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Travel limits applied to every axis, in micrometers.
const AXIS_MIN: f64 = -100_000.0;
const AXIS_MAX: f64 = 100_000.0;

#[derive(Debug, Default)]
struct ScanState {
    axis: char,
    stop_mm: f64,
    armed: bool,
    running: bool,
    /// position() polls remaining until the sweep reports the stop position
    polls_left: u32,
}

/// Bounded stage with a move log and a simulated sweep.
pub struct MockStage {
    positions: Mutex<HashMap<char, f64>>,
    moves: Mutex<Vec<(char, f64)>>,
    speed: Mutex<f64>,
    scan: Mutex<ScanState>,
}

impl MockStage {
    const DEFAULT_SPEED: f64 = 8.0;

    /// A stage with every axis at zero.
    pub fn new() -> Self {
        Self {
            positions: Mutex::new(HashMap::new()),
            moves: Mutex::new(Vec::new()),
            speed: Mutex::new(Self::DEFAULT_SPEED),
            scan: Mutex::new(ScanState::default()),
        }
    }

    /// Every accepted move, in command order.
    pub fn move_log(&self) -> Vec<(char, f64)> {
        self.moves.lock().clone()
    }
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for MockStage {
    fn move_axis_absolute(&self, axis: char, position: f64, _wait_until_done: bool) -> bool {
        if !(AXIS_MIN..=AXIS_MAX).contains(&position) {
            debug!(axis = %axis, position, "mock stage rejecting out-of-range move");
            return false;
        }
        self.positions.lock().insert(axis, position);
        self.moves.lock().push((axis, position));
        true
    }

    fn position(&self, axis: char) -> f64 {
        let mut scan = self.scan.lock();
        if scan.running && scan.axis == axis {
            if scan.polls_left > 0 {
                scan.polls_left -= 1;
            }
            if scan.polls_left == 0 {
                // sweep complete: land on the stop position (stage units
                // are mm here, engine positions are um)
                let stop_um = scan.stop_mm * 1000.0;
                scan.running = false;
                self.positions.lock().insert(axis, stop_um);
                return stop_um;
            }
        }
        self.positions.lock().get(&axis).copied().unwrap_or(0.0)
    }

    fn stop(&self) {
        self.scan.lock().running = false;
    }
}

impl ScanStage for MockStage {
    fn default_speed(&self) -> f64 {
        Self::DEFAULT_SPEED
    }

    fn set_speed(&self, speed: f64) {
        *self.speed.lock() = speed;
    }

    fn speed(&self) -> f64 {
        *self.speed.lock()
    }

    fn configure_scan(&self, axis: char, _start_mm: f64, stop_mm: f64, encoder_divide: u32) {
        debug!(axis = %axis, stop_mm, encoder_divide, "mock stage arming sweep");
        let mut scan = self.scan.lock();
        scan.axis = axis;
        scan.stop_mm = stop_mm;
        scan.armed = true;
        scan.running = false;
    }

    fn start_scan(&self, axis: char) {
        let mut scan = self.scan.lock();
        if scan.armed && scan.axis == axis {
            scan.running = true;
            scan.polls_left = 3;
        }
    }

    fn stop_scan(&self) {
        let mut scan = self.scan.lock();
        scan.armed = false;
        scan.running = false;
    }
}

/// Mock microscope rendering synthetic frames.
///
/// Frame texture amplitude follows a Lorentzian of the focus axis
/// position around `best_focus`, so sharpness metrics computed on the
/// frames peak there.
pub struct MockMicroscope {
    stage: Arc<MockStage>,
    width: usize,
    height: usize,
    channel: Mutex<u32>,
    channel_order: Vec<u32>,
    trigger_source: Mutex<Option<String>>,
    resolution: Mutex<(String, String)>,
    best_focus: f64,
    exposures: Mutex<Vec<(u32, f64)>>,
    acquiring: Mutex<bool>,
}

impl MockMicroscope {
    /// A single-channel mock with the given frame shape.
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_channels(width, height, vec![1])
    }

    /// A mock cycling over the given channel ids in order.
    pub fn with_channels(width: usize, height: usize, channel_order: Vec<u32>) -> Self {
        assert!(!channel_order.is_empty(), "mock needs at least one channel");
        Self {
            stage: Arc::new(MockStage::new()),
            width,
            height,
            channel: Mutex::new(0),
            channel_order,
            trigger_source: Mutex::new(None),
            resolution: Mutex::new(("high".into(), "N/A".into())),
            best_focus: 0.0,
            exposures: Mutex::new(Vec::new()),
            acquiring: Mutex::new(false),
        }
    }

    /// Place the focus optimum the synthetic frames sharpen toward.
    pub fn with_best_focus(mut self, best_focus: f64) -> Self {
        self.best_focus = best_focus;
        self
    }

    /// The stage as its concrete type, for move-log assertions.
    pub fn mock_stage(&self) -> Arc<MockStage> {
        Arc::clone(&self.stage)
    }

    /// `(channel, focus position)` recorded at each exposure, in order.
    pub fn exposure_log(&self) -> Vec<(u32, f64)> {
        self.exposures.lock().clone()
    }

    /// Currently selected trigger source, if external.
    pub fn trigger_source(&self) -> Option<String> {
        self.trigger_source.lock().clone()
    }

    /// Active `(resolution_mode, zoom)` pair.
    pub fn resolution(&self) -> (String, String) {
        self.resolution.lock().clone()
    }

    /// Whether `prepare_acquisition` has run without a matching end.
    pub fn is_acquiring(&self) -> bool {
        *self.acquiring.lock()
    }
}

impl MicroscopeControl for MockMicroscope {
    fn prepare_acquisition(&self) -> EngineResult<()> {
        *self.acquiring.lock() = true;
        Ok(())
    }

    fn end_acquisition(&self) -> EngineResult<()> {
        *self.acquiring.lock() = false;
        Ok(())
    }

    fn current_channel(&self) -> u32 {
        *self.channel.lock()
    }

    fn prepare_channel(&self, channel: u32) -> EngineResult<()> {
        *self.channel.lock() = channel;
        Ok(())
    }

    fn prepare_next_channel(&self) -> EngineResult<()> {
        let mut current = self.channel.lock();
        let next = match self.channel_order.iter().position(|&id| id == *current) {
            Some(index) => self.channel_order[(index + 1) % self.channel_order.len()],
            None => self.channel_order[0],
        };
        *current = next;
        Ok(())
    }

    fn set_external_trigger(&self, source: Option<&str>) -> EngineResult<()> {
        *self.trigger_source.lock() = source.map(str::to_owned);
        Ok(())
    }

    fn change_resolution(&self, resolution_mode: &str, zoom: &str) -> EngineResult<()> {
        *self.resolution.lock() = (resolution_mode.to_owned(), zoom.to_owned());
        Ok(())
    }

    fn stage(&self) -> Arc<dyn ScanStage> {
        Arc::clone(&self.stage) as Arc<dyn ScanStage>
    }

    fn expose(&self, slot: &mut FrameSlot) -> EngineResult<()> {
        let focus = self.stage.position('f');
        self.exposures.lock().push((self.current_channel(), focus));
        let defocus = (focus - self.best_focus).abs();
        // Lorentzian contrast falloff around the simulated best focus
        let amplitude = 200.0 / (1.0 + (defocus / 25.0) * (defocus / 25.0));
        // defocus blurs the texture: a single-pole low-pass whose strength
        // grows continuously with distance from the optimum, so the frame
        // loses frequency content (not just gain) as focus degrades
        let alpha = defocus / (defocus + 10.0);

        slot.width = self.width;
        slot.height = self.height;
        slot.channel = self.current_channel();
        slot.pixels.resize(self.width * self.height, 0.0);
        // fixed-seed LCG: the same specimen texture at every exposure, so
        // two frames differ only through the focus-dependent blur and
        // contrast
        let mut state = 0x9e37_79b9_u64;
        let mut smoothed = 0.0;
        for pixel in slot.pixels.iter_mut() {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let noise = ((state >> 33) as f64) / ((u32::MAX as f64) / 2.0) - 1.0;
            smoothed = alpha * smoothed + (1.0 - alpha) * noise;
            *pixel = 100.0 + amplitude * smoothed;
        }
        Ok(())
    }

    fn frame_shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::normalized_dct_shannon_entropy;

    #[test]
    fn out_of_range_move_is_rejected_in_place() {
        let stage = MockStage::new();
        assert!(stage.move_axis_absolute('z', 50.0, true));
        assert!(!stage.move_axis_absolute('z', 1e9, true));
        assert_eq!(stage.position('z'), 50.0);
        assert_eq!(stage.move_log(), vec![('z', 50.0)]);
    }

    #[test]
    fn sweep_settles_on_stop_position() {
        let stage = MockStage::new();
        stage.move_axis_absolute('z', 0.0, true);
        stage.configure_scan('z', 0.0, 0.2, 4);
        stage.start_scan('z');
        let mut last = stage.position('z');
        for _ in 0..5 {
            last = stage.position('z');
        }
        assert!((last - 200.0).abs() < 1e-9);
    }

    #[test]
    fn channel_cycling_follows_configured_order() {
        let scope = MockMicroscope::with_channels(8, 8, vec![1, 3]);
        scope.prepare_next_channel().expect("cycle");
        assert_eq!(scope.current_channel(), 1);
        scope.prepare_next_channel().expect("cycle");
        assert_eq!(scope.current_channel(), 3);
        scope.prepare_next_channel().expect("cycle");
        assert_eq!(scope.current_channel(), 1);
    }

    #[test]
    fn frames_sharpen_toward_best_focus() {
        let scope = MockMicroscope::new(32, 32).with_best_focus(70.0);
        let stage = scope.mock_stage();
        let entropy_at = |f: f64| {
            stage.move_axis_absolute('f', f, true);
            let mut slot = FrameSlot {
                frame_id: 0,
                position: Default::default(),
                channel: 0,
                pixels: Vec::new(),
                width: 0,
                height: 0,
            };
            scope.expose(&mut slot).expect("expose");
            normalized_dct_shannon_entropy(&slot.pixels, slot.width, slot.height, 3.0)
        };
        let far = entropy_at(700.0);
        let near = entropy_at(70.0);
        assert!(near > far, "focused frame should score higher ({near} vs {far})");
    }

    #[test]
    fn entropy_ranking_near_the_optimum_is_deterministic() {
        let scope = MockMicroscope::new(32, 32).with_best_focus(5.0);
        let stage = scope.mock_stage();
        let entropy_at = |f: f64| {
            stage.move_axis_absolute('f', f, true);
            let mut slot = FrameSlot {
                frame_id: 0,
                position: Default::default(),
                channel: 0,
                pixels: Vec::new(),
                width: 0,
                height: 0,
            };
            scope.expose(&mut slot).expect("expose");
            normalized_dct_shannon_entropy(&slot.pixels, slot.width, slot.height, 3.0)
        };

        // re-exposing at the same focus must reproduce the same score
        assert_eq!(entropy_at(0.0), entropy_at(0.0));

        // a sweep over a candidate grid peaks at the best focus, with the
        // neighbors strictly ordered by distance from it
        let scores: Vec<(f64, f64)> = [-10.0, -5.0, 0.0, 5.0, 10.0]
            .into_iter()
            .map(|f| (f, entropy_at(f)))
            .collect();
        let (best, _) = scores
            .iter()
            .copied()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .expect("non-empty grid");
        assert_eq!(best, 5.0, "scores: {scores:?}");
        assert!(entropy_at(5.0) > entropy_at(0.0));
        assert!(entropy_at(0.0) > entropy_at(-5.0));
    }
}
