//! Stochastic generators: the customer source feeding the branch and the
//! batch sources the depot runs. Both are pure functions of (tick, seeded
//! rng), so runs replay exactly under the same config.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::SimTime;

pub const DEFAULT_SPACING_RANGE: (SimTime, SimTime) = (1, 10);
pub const DEFAULT_BATCH_RANGE: (u32, u32) = (1, 4);

/// Sequential customer ids, one batch per sampled event tick.
#[derive(Debug)]
pub struct CustomerSource {
    next_id: i32,
    schedule: EventClock,
}

impl CustomerSource {
    pub fn new(rng: ChaCha8Rng, spacing_range: (SimTime, SimTime)) -> Self {
        Self {
            next_id: 0,
            schedule: EventClock::new(rng, spacing_range),
        }
    }

    /// The arrivals due at `now`, empty on every off-tick. Ids are issued
    /// in order and never reused.
    pub fn poll(&mut self, now: SimTime) -> Option<i32> {
        if !self.schedule.fires(now) {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        Some(id)
    }

    pub fn issued(&self) -> i32 {
        self.next_id
    }
}

/// One batch of uniform size on each sampled event tick.
#[derive(Debug)]
pub struct BatchSource {
    batch_range: (u32, u32),
    schedule: EventClock,
}

impl BatchSource {
    pub fn new(
        rng: ChaCha8Rng,
        batch_range: (u32, u32),
        spacing_range: (SimTime, SimTime),
    ) -> Self {
        Self {
            batch_range,
            schedule: EventClock::new(rng, spacing_range),
        }
    }

    pub fn poll(&mut self, now: SimTime) -> Option<u32> {
        if !self.schedule.fires(now) {
            return None;
        }
        Some(
            self.schedule
                .rng
                .gen_range(self.batch_range.0..=self.batch_range.1),
        )
    }
}

/// Samples the next event tick uniformly ahead of the previous one. The
/// first event lands within one spacing of tick 0.
#[derive(Debug)]
struct EventClock {
    rng: ChaCha8Rng,
    spacing_range: (SimTime, SimTime),
    next_event: SimTime,
}

impl EventClock {
    fn new(mut rng: ChaCha8Rng, spacing_range: (SimTime, SimTime)) -> Self {
        let next_event = rng.gen_range(spacing_range.0..=spacing_range.1);
        Self {
            rng,
            spacing_range,
            next_event,
        }
    }

    fn fires(&mut self, now: SimTime) -> bool {
        if now != self.next_event {
            return false;
        }
        self.next_event =
            now + self.rng.gen_range(self.spacing_range.0..=self.spacing_range.1);
        true
    }
}

#[cfg(test)]
mod arrivals_tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn ids_are_sequential_and_spacing_is_in_range() {
        let rng = ChaCha8Rng::seed_from_u64(11);
        let mut source = CustomerSource::new(rng, DEFAULT_SPACING_RANGE);
        let mut events = Vec::new();
        for now in 0..200 {
            if let Some(id) = source.poll(now) {
                events.push((now, id));
            }
        }
        assert!(!events.is_empty());
        for (index, &(_, id)) in events.iter().enumerate() {
            assert_eq!(id, index as i32);
        }
        for pair in events.windows(2) {
            let gap = pair[1].0 - pair[0].0;
            assert!((1..=10).contains(&gap));
        }
        assert_eq!(source.issued() as usize, events.len());
    }

    #[test]
    fn batches_stay_inside_the_configured_range() {
        let rng = ChaCha8Rng::seed_from_u64(23);
        let mut source = BatchSource::new(rng, DEFAULT_BATCH_RANGE, DEFAULT_SPACING_RANGE);
        let mut fired = 0;
        for now in 0..300 {
            if let Some(batch) = source.poll(now) {
                assert!((1..=4).contains(&batch));
                fired += 1;
            }
        }
        assert!(fired >= 20);
    }

    #[test]
    fn same_seed_replays_the_same_run() {
        let make = || CustomerSource::new(ChaCha8Rng::seed_from_u64(7), DEFAULT_SPACING_RANGE);
        let mut a = make();
        let mut b = make();
        for now in 0..100 {
            assert_eq!(a.poll(now), b.poll(now));
        }
    }
}
