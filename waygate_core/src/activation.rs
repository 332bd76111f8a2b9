//! Per-portal activation timer.
//!
//! ```text
//! Broken --repair--> Repairing --t>=repair--> Deactivated --start--> Activating
//!    ^                                            ^                      |
//!    +----------- break (any state)               |               t>=activation
//!                                                 |                      v
//!                                  t<=0 -- Deactivating <--stop-- Activated
//! ```
//!
//! Deactivation drains the timer at twice the activation rate.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActivationPhase {
    #[default]
    Broken,
    Repairing,
    Deactivated,
    Activating,
    Activated,
    Deactivating,
}

/// Durations, in seconds, that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivationTimings {
    pub repair: f32,
    pub activation: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActivationState {
    phase: ActivationPhase,
    timer: f32,
}

impl ActivationState {
    /// A portal whose world object is already intact.
    pub fn repaired() -> Self {
        Self {
            phase: ActivationPhase::Deactivated,
            timer: 0.0,
        }
    }

    pub fn phase(&self) -> ActivationPhase {
        self.phase
    }

    pub fn timer(&self) -> f32 {
        self.timer
    }

    pub fn is_activated(&self) -> bool {
        self.phase == ActivationPhase::Activated
    }

    pub fn repair(&mut self) {
        if self.phase == ActivationPhase::Broken {
            self.phase = ActivationPhase::Repairing;
            self.timer = 0.0;
        }
    }

    pub fn mark_broken(&mut self) {
        self.phase = ActivationPhase::Broken;
        self.timer = 0.0;
    }

    /// Begin activating. Only has an effect from `Deactivated`.
    pub fn start(&mut self) {
        if self.phase == ActivationPhase::Deactivated {
            self.phase = ActivationPhase::Activating;
        }
    }

    pub fn stop(&mut self) {
        if matches!(
            self.phase,
            ActivationPhase::Activating | ActivationPhase::Activated
        ) {
            self.phase = ActivationPhase::Deactivating;
        }
    }

    /// Advance by `dt` seconds. Returns the new phase when it changed.
    pub fn tick(&mut self, dt: f32, timings: ActivationTimings) -> Option<ActivationPhase> {
        let before = self.phase;
        match self.phase {
            ActivationPhase::Broken | ActivationPhase::Deactivated => {}
            ActivationPhase::Repairing => {
                self.timer += dt;
                if self.timer >= timings.repair {
                    self.phase = ActivationPhase::Deactivated;
                    self.timer = 0.0;
                }
            }
            ActivationPhase::Activating => {
                self.timer += dt;
                if self.timer >= timings.activation {
                    self.phase = ActivationPhase::Activated;
                }
            }
            ActivationPhase::Activated => {
                self.timer = timings.activation;
            }
            ActivationPhase::Deactivating => {
                self.timer -= 2.0 * dt;
                if self.timer <= 0.0 {
                    self.phase = ActivationPhase::Deactivated;
                    self.timer = 0.0;
                }
            }
        }
        self.timer = self.timer.clamp(0.0, self.governing_duration(timings));
        (self.phase != before).then_some(self.phase)
    }

    /// Fraction of the governing duration elapsed, in `[0, 1]`.
    pub fn progress(&self, timings: ActivationTimings) -> f32 {
        let duration = self.governing_duration(timings);
        if duration <= 0.0 {
            return 0.0;
        }
        (self.timer / duration).clamp(0.0, 1.0)
    }

    fn governing_duration(&self, timings: ActivationTimings) -> f32 {
        match self.phase {
            ActivationPhase::Repairing => timings.repair.max(0.0),
            _ => timings.activation.max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMINGS: ActivationTimings = ActivationTimings {
        repair: 3.0,
        activation: 1.0,
    };
    const DT: f32 = 0.25;

    fn run(state: &mut ActivationState, seconds: f32) {
        let ticks = (seconds / DT).round() as usize;
        for _ in 0..ticks {
            state.tick(DT, TIMINGS);
        }
    }

    #[test]
    fn starts_broken_and_repairs_into_deactivated() {
        let mut state = ActivationState::default();
        assert_eq!(state.phase(), ActivationPhase::Broken);
        state.start();
        assert_eq!(state.phase(), ActivationPhase::Broken);

        state.repair();
        assert_eq!(state.phase(), ActivationPhase::Repairing);
        run(&mut state, 2.75);
        assert_eq!(state.phase(), ActivationPhase::Repairing);
        assert!(state.progress(TIMINGS) > 0.9);
        assert_eq!(state.tick(DT, TIMINGS), Some(ActivationPhase::Deactivated));
        assert_eq!(state.timer(), 0.0);
    }

    #[test]
    fn activation_takes_full_duration_and_deactivation_half() {
        let mut state = ActivationState::repaired();
        state.start();
        run(&mut state, 0.75);
        assert_eq!(state.phase(), ActivationPhase::Activating);
        run(&mut state, 0.25);
        assert!(state.is_activated());
        assert_eq!(state.progress(TIMINGS), 1.0);

        state.stop();
        assert_eq!(state.phase(), ActivationPhase::Deactivating);
        run(&mut state, 0.25);
        assert_eq!(state.phase(), ActivationPhase::Deactivating);
        run(&mut state, 0.25);
        assert_eq!(state.phase(), ActivationPhase::Deactivated);
        assert_eq!(state.timer(), 0.0);
    }

    #[test]
    fn start_is_ignored_while_deactivating() {
        let mut state = ActivationState::repaired();
        state.start();
        run(&mut state, 1.0);
        state.stop();
        state.start();
        assert_eq!(state.phase(), ActivationPhase::Deactivating);
    }

    #[test]
    fn stop_during_activation_winds_down_from_current_progress() {
        let mut state = ActivationState::repaired();
        state.start();
        run(&mut state, 0.5);
        state.stop();
        assert_eq!(state.tick(DT, TIMINGS), Some(ActivationPhase::Deactivated));
    }

    #[test]
    fn activated_timer_stays_pinned() {
        let mut state = ActivationState::repaired();
        state.start();
        run(&mut state, 3.0);
        assert!(state.is_activated());
        assert_eq!(state.timer(), TIMINGS.activation);
    }

    #[test]
    fn breaking_resets_everything() {
        let mut state = ActivationState::repaired();
        state.start();
        run(&mut state, 1.0);
        state.mark_broken();
        assert_eq!(state.phase(), ActivationPhase::Broken);
        assert_eq!(state.timer(), 0.0);
        assert_eq!(state.tick(DT, TIMINGS), None);
    }
}
