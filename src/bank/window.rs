//! A teller window is a two-state machine: idle until a customer sits
//! down, serving until the sampled completion tick arrives. Completion is
//! exact-match on purpose; the window's node advances in unit ticks, so
//! the completion tick is never skipped over.

use rand::Rng;

use crate::{SimError, SimTime};

pub const DEFAULT_SERVICE_RANGE: (SimTime, SimTime) = (1, 10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowState {
    Idle,
    Serving { customer_id: i32, completion: SimTime },
}

#[derive(Debug, Clone)]
pub struct Window {
    id: u32,
    state: WindowState,
    service_range: (SimTime, SimTime),
}

impl Window {
    pub fn new(id: u32, service_range: (SimTime, SimTime)) -> Self {
        Self {
            id,
            state: WindowState::Idle,
            service_range,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, WindowState::Idle)
    }

    /// Seats a customer and samples the service duration. Returns the tick
    /// at which `service_complete` becomes legal.
    pub fn service_start<R: Rng>(
        &mut self,
        customer_id: i32,
        now: SimTime,
        rng: &mut R,
    ) -> Result<SimTime, SimError> {
        if !self.is_idle() {
            return Err(SimError::WindowBusy(self.id));
        }
        let duration = rng.gen_range(self.service_range.0..=self.service_range.1);
        let completion = now + duration;
        self.state = WindowState::Serving {
            customer_id,
            completion,
        };
        Ok(completion)
    }

    /// Legal exactly once, exactly at the completion tick. Returns the
    /// customer who just left.
    pub fn service_complete(&mut self, now: SimTime) -> Result<i32, SimError> {
        match self.state {
            WindowState::Idle => Err(SimError::WindowIdle(self.id)),
            WindowState::Serving { completion, .. } if completion != now => {
                Err(SimError::ServiceNotDue {
                    id: self.id,
                    due: completion,
                    now,
                })
            }
            WindowState::Serving { customer_id, .. } => {
                self.state = WindowState::Idle;
                Ok(customer_id)
            }
        }
    }

    /// The completion tick, when one is pending.
    pub fn due(&self) -> Option<SimTime> {
        match self.state {
            WindowState::Idle => None,
            WindowState::Serving { completion, .. } => Some(completion),
        }
    }
}

#[cfg(test)]
mod window_tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn complete_fires_exactly_at_the_sampled_tick() {
        let mut window = Window::new(0, DEFAULT_SERVICE_RANGE);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let due = window.service_start(42, 2, &mut rng).unwrap();
        assert!((3..=12).contains(&due));

        for now in 2..due {
            assert!(matches!(
                window.service_complete(now),
                Err(SimError::ServiceNotDue { .. })
            ));
        }
        assert_eq!(window.service_complete(due).unwrap(), 42);
        assert!(window.is_idle());
        // Never twice per interval.
        assert!(matches!(
            window.service_complete(due),
            Err(SimError::WindowIdle(0))
        ));
    }

    #[test]
    fn start_is_illegal_while_serving() {
        let mut window = Window::new(1, (2, 2));
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        window.service_start(1, 0, &mut rng).unwrap();
        assert!(matches!(
            window.service_start(2, 1, &mut rng),
            Err(SimError::WindowBusy(1))
        ));
    }

    #[test]
    fn complete_is_illegal_from_idle() {
        let mut window = Window::new(3, DEFAULT_SERVICE_RANGE);
        assert!(matches!(
            window.service_complete(7),
            Err(SimError::WindowIdle(3))
        ));
    }
}
