//! Stream-time hysteresis over raw per-space verdicts.
//!
//! A raw verdict that differs from the confirmed state becomes a pending candidate and is
//! committed only once it has been observed continuously for `delay` seconds of
//! presentation time. Any agreeing or contradicting sample in between clears or restarts
//! the candidate.

/// Per-space confirmation state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SpaceRuntimeState {
    pub confirmed_occupied: bool,
    pub pending_occupied: Option<bool>,
    pub pending_since: Option<f64>,
}

impl SpaceRuntimeState {
    pub fn is_pending(&self) -> bool {
        self.pending_occupied.is_some()
    }

    fn clear_pending(&mut self) {
        self.pending_occupied = None;
        self.pending_since = None;
    }
}

/// A committed change of confirmed state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    pub index: usize,
    pub occupied: bool,
    /// Timestamp of the sample that committed the change.
    pub at: f64,
}

#[derive(Clone, Debug)]
pub struct TemporalDebouncer {
    delay: f64,
    states: Vec<SpaceRuntimeState>,
}

impl TemporalDebouncer {
    /// `delay` is in stream seconds; negative values are treated as 0.
    pub fn new(spaces: usize, delay: f64) -> Self {
        Self {
            delay: delay.max(0.0),
            states: vec![SpaceRuntimeState::default(); spaces],
        }
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<&SpaceRuntimeState> {
        self.states.get(index)
    }

    pub fn is_confirmed_occupied(&self, index: usize) -> bool {
        self.states
            .get(index)
            .map(|s| s.confirmed_occupied)
            .unwrap_or(false)
    }

    /// Feed one raw verdict for space `index` at stream time `t`.
    pub fn observe(&mut self, index: usize, raw: bool, t: f64) -> Option<Transition> {
        let delay = self.delay;
        let state = self.states.get_mut(index)?;

        if raw == state.confirmed_occupied {
            state.clear_pending();
            return None;
        }

        match (state.pending_occupied, state.pending_since) {
            (Some(pending), Some(since)) if pending == raw && t >= since => {
                if t - since >= delay {
                    state.confirmed_occupied = raw;
                    state.clear_pending();
                    Some(Transition {
                        index,
                        occupied: raw,
                        at: t,
                    })
                } else {
                    None
                }
            }
            _ => {
                state.pending_occupied = Some(raw);
                state.pending_since = Some(t);
                None
            }
        }
    }

    /// Forget every pending candidate and confirmed state.
    pub fn reset(&mut self) {
        for state in &mut self.states {
            *state = SpaceRuntimeState::default();
        }
    }

    /// Forget the state of one space.
    pub fn reset_space(&mut self, index: usize) {
        if let Some(state) = self.states.get_mut(index) {
            *state = SpaceRuntimeState::default();
        }
    }

    /// Resize to `spaces`, resetting all state.
    pub fn resize(&mut self, spaces: usize) {
        self.states = vec![SpaceRuntimeState::default(); spaces];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_flip_never_commits() {
        let mut d = TemporalDebouncer::new(1, 1.0);
        assert_eq!(d.observe(0, true, 0.0), None);
        assert_eq!(d.observe(0, true, 0.5), None);
        assert_eq!(d.observe(0, false, 0.9), None);
        assert!(!d.state(0).unwrap().is_pending());
        assert_eq!(d.observe(0, true, 1.5), None);
        assert!(!d.is_confirmed_occupied(0));
    }

    #[test]
    fn sustained_flip_commits_once_at_delay() {
        let mut d = TemporalDebouncer::new(1, 1.0);
        assert_eq!(d.observe(0, true, 2.0), None);
        assert_eq!(d.observe(0, true, 2.9), None);
        assert_eq!(
            d.observe(0, true, 3.0),
            Some(Transition {
                index: 0,
                occupied: true,
                at: 3.0
            })
        );
        assert_eq!(d.observe(0, true, 3.1), None);
        assert!(d.is_confirmed_occupied(0));
    }

    #[test]
    fn release_also_needs_delay() {
        let mut d = TemporalDebouncer::new(1, 1.0);
        d.observe(0, true, 0.0);
        d.observe(0, true, 1.0);
        assert!(d.is_confirmed_occupied(0));
        assert_eq!(d.observe(0, false, 1.2), None);
        assert!(d.observe(0, false, 2.5).is_some());
        assert!(!d.is_confirmed_occupied(0));
    }

    #[test]
    fn timestamp_going_backwards_restarts_window() {
        let mut d = TemporalDebouncer::new(1, 1.0);
        d.observe(0, true, 10.0);
        assert_eq!(d.observe(0, true, 0.2), None);
        assert_eq!(d.state(0).unwrap().pending_since, Some(0.2));
        assert_eq!(d.observe(0, true, 1.0), None);
        assert!(d.observe(0, true, 1.5).is_some());
    }

    #[test]
    fn zero_delay_commits_on_second_sample() {
        let mut d = TemporalDebouncer::new(1, 0.0);
        assert_eq!(d.observe(0, true, 5.0), None);
        assert!(d.observe(0, true, 5.0).is_some());
    }

    #[test]
    fn unknown_index_is_ignored() {
        let mut d = TemporalDebouncer::new(2, 1.0);
        assert_eq!(d.observe(5, true, 0.0), None);
    }
}
