//! The five node roles a branch runs, each a `NodeLogic` on its own
//! thread. Deliveries are buffered by `on_interaction` and consumed by the
//! following `tick`, so every transition sees the complete picture for its
//! tick before it emits anything.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::bank::arrivals::{BatchSource, CustomerSource};
use crate::bank::queue::QueueHall;
use crate::bank::storage::Storage;
use crate::bank::window::Window;
use crate::bus::{Interaction, InteractionClass, ALL_CLASSES};
use crate::node::{NodeLogic, Outbox};
use crate::{SimConfig, SimTime};

// Per-role rng streams derived from the one config seed.
const ARRIVALS_STREAM: u64 = 0x61;
const QUEUES_STREAM: u64 = 0x71;
const WINDOWS_STREAM: u64 = 0x77;
const DEPOT_PRODUCER_STREAM: u64 = 0x64;
const DEPOT_CONSUMER_STREAM: u64 = 0x65;

fn role_rng(config: &SimConfig, stream: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(config.seed.wrapping_mul(0x9e37_79b9).wrapping_add(stream))
}

/// Issues sequential customer ids on stochastic arrival ticks.
pub struct ArrivalsNode {
    source: CustomerSource,
}

impl ArrivalsNode {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            source: CustomerSource::new(role_rng(config, ARRIVALS_STREAM), config.spacing_range),
        }
    }

    pub fn issued(&self) -> i32 {
        self.source.issued()
    }
}

impl NodeLogic for ArrivalsNode {
    fn name(&self) -> &'static str {
        "arrivals"
    }

    fn publications(&self) -> &'static [InteractionClass] {
        &[InteractionClass::AddCustomer]
    }

    fn tick(&mut self, now: SimTime, outbox: &mut Outbox) {
        if let Some(customer_id) = self.source.poll(now) {
            debug!(customer_id, at = now, "customer walked in");
            outbox.push(Interaction::AddCustomer { customer_id });
        }
    }
}

/// Runs the queue hall: seats arrivals, dispatches heads to free windows,
/// rebalances on the configured interval, and reports queue sizes on
/// change.
pub struct QueueNode {
    hall: QueueHall,
    rng: ChaCha8Rng,
    rebalance_interval: SimTime,
    free_windows: Vec<i32>,
    arrivals: Vec<i32>,
    reported_sizes: [i32; 2],
    pub seated: u32,
    pub dispatched: u32,
}

impl QueueNode {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            hall: QueueHall::new(),
            rng: role_rng(config, QUEUES_STREAM),
            rebalance_interval: config.rebalance_interval,
            free_windows: Vec::new(),
            arrivals: Vec::new(),
            reported_sizes: [0, 0],
            seated: 0,
            dispatched: 0,
        }
    }

    pub fn waiting(&self) -> usize {
        self.hall.total()
    }

    fn report_sizes(&mut self, outbox: &mut Outbox) {
        for queue_id in 0..2u32 {
            let size = self.hall.queue(queue_id).len() as i32;
            if size != self.reported_sizes[queue_id as usize] {
                self.reported_sizes[queue_id as usize] = size;
                outbox.push(Interaction::CurrentQueueSize {
                    queue_id: queue_id as i32,
                    size,
                });
            }
        }
    }
}

impl NodeLogic for QueueNode {
    fn name(&self) -> &'static str {
        "queues"
    }

    fn publications(&self) -> &'static [InteractionClass] {
        &[
            InteractionClass::AssignCustomerToQueue,
            InteractionClass::CurrentQueueSize,
            InteractionClass::CustomerChangeQueue,
            InteractionClass::MoveCustomerToWindow,
            InteractionClass::AssignCustomerToWindow,
        ]
    }

    fn subscriptions(&self) -> &'static [InteractionClass] {
        &[InteractionClass::AddCustomer, InteractionClass::FreeWindow]
    }

    fn on_interaction(&mut self, interaction: &Interaction, _at: SimTime) {
        match interaction {
            Interaction::AddCustomer { customer_id } => self.arrivals.push(*customer_id),
            Interaction::FreeWindow { window_id } => self.free_windows.push(*window_id),
            _ => {}
        }
    }

    fn tick(&mut self, now: SimTime, outbox: &mut Outbox) {
        for customer_id in std::mem::take(&mut self.arrivals) {
            self.seated += 1;
            let queue_id = self.hall.assign_to_shorter(customer_id);
            outbox.push(Interaction::AssignCustomerToQueue {
                customer_id,
                queue_id: queue_id as i32,
            });
        }

        // Each free window takes the head of the longer queue, while any
        // customer is waiting.
        while !self.free_windows.is_empty() && self.hall.total() > 0 {
            let window_id = self.free_windows.remove(0);
            match self.hall.dequeue_longest() {
                Ok((customer_id, _)) => {
                    self.dispatched += 1;
                    outbox.push(Interaction::MoveCustomerToWindow { window_id });
                    outbox.push(Interaction::AssignCustomerToWindow {
                        customer_id,
                        window_id,
                    });
                }
                Err(_) => {
                    self.free_windows.insert(0, window_id);
                    break;
                }
            }
        }

        if self.rebalance_interval > 0 && now % self.rebalance_interval == 0 {
            if let Some(relocation) = self.hall.rebalance(&mut self.rng) {
                info!(
                    customer_id = relocation.customer_id,
                    to_queue = relocation.to_queue,
                    at = now,
                    "customer changed queue"
                );
                outbox.push(Interaction::CustomerChangeQueue {
                    customer_id: relocation.customer_id,
                    queue_id: relocation.to_queue as i32,
                });
            }
        }

        self.report_sizes(outbox);
    }
}

/// Runs the teller windows, announcing each one as it frees up. All
/// windows start free and say so on the first tick.
pub struct WindowNode {
    windows: Vec<Window>,
    rng: ChaCha8Rng,
    seats: Vec<(i32, i32)>,
    announced: bool,
    pub served: u32,
}

impl WindowNode {
    pub fn new(config: &SimConfig) -> Self {
        let windows = (0..config.windows)
            .map(|id| Window::new(id, config.service_range))
            .collect();
        Self {
            windows,
            rng: role_rng(config, WINDOWS_STREAM),
            seats: Vec::new(),
            announced: false,
            served: 0,
        }
    }
}

impl NodeLogic for WindowNode {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn publications(&self) -> &'static [InteractionClass] {
        &[InteractionClass::FreeWindow]
    }

    fn subscriptions(&self) -> &'static [InteractionClass] {
        &[InteractionClass::AssignCustomerToWindow]
    }

    fn on_interaction(&mut self, interaction: &Interaction, _at: SimTime) {
        if let Interaction::AssignCustomerToWindow {
            customer_id,
            window_id,
        } = interaction
        {
            self.seats.push((*customer_id, *window_id));
        }
    }

    fn tick(&mut self, now: SimTime, outbox: &mut Outbox) {
        if !self.announced {
            self.announced = true;
            for window in &self.windows {
                outbox.push(Interaction::FreeWindow {
                    window_id: window.id() as i32,
                });
            }
        }

        for window in &mut self.windows {
            if window.due() == Some(now) {
                match window.service_complete(now) {
                    Ok(customer_id) => {
                        self.served += 1;
                        debug!(customer_id, window_id = window.id(), at = now, "service done");
                        outbox.push(Interaction::FreeWindow {
                            window_id: window.id() as i32,
                        });
                    }
                    Err(err) => warn!(%err, "completion slipped"),
                }
            }
        }

        for (customer_id, window_id) in std::mem::take(&mut self.seats) {
            match self.windows.get_mut(window_id as usize) {
                Some(window) => match window.service_start(customer_id, now, &mut self.rng) {
                    Ok(due) => debug!(customer_id, window_id, due, "service started"),
                    Err(err) => warn!(%err, customer_id, "seat order for a busy window"),
                },
                None => warn!(window_id, "seat order for an unknown window"),
            }
        }
    }
}

/// Tally of everything one class delivered over the run.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassCounters {
    counts: [u64; ALL_CLASSES.len()],
}

impl ClassCounters {
    pub fn record(&mut self, class: InteractionClass) {
        self.counts[class as usize] += 1;
    }

    pub fn count(&self, class: InteractionClass) -> u64 {
        self.counts[class as usize]
    }
}

/// Listens to everything and keeps the run's statistics: per-class event
/// counters and the per-queue length series.
#[derive(Default)]
pub struct LedgerNode {
    pub counters: ClassCounters,
    pub queue_sizes: Vec<(SimTime, i32, i32)>,
}

impl LedgerNode {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeLogic for LedgerNode {
    fn name(&self) -> &'static str {
        "ledger"
    }

    fn subscriptions(&self) -> &'static [InteractionClass] {
        &ALL_CLASSES
    }

    fn on_interaction(&mut self, interaction: &Interaction, at: SimTime) {
        self.counters.record(interaction.class());
        if let Interaction::CurrentQueueSize { queue_id, size } = interaction {
            self.queue_sizes.push((at, *queue_id, *size));
        }
    }

    fn tick(&mut self, _now: SimTime, _outbox: &mut Outbox) {}
}

/// Owns the product store and its two batch generators. Everything here
/// is node-local; rejected batches are counted, logged, and dropped.
pub struct DepotNode {
    storage: Storage,
    producer: BatchSource,
    consumer: BatchSource,
    pub produced: u64,
    pub consumed: u64,
    pub rejected_adds: u64,
    pub rejected_takes: u64,
}

impl DepotNode {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            storage: Storage::new(config.storage_max),
            producer: BatchSource::new(
                role_rng(config, DEPOT_PRODUCER_STREAM),
                config.batch_range,
                config.spacing_range,
            ),
            consumer: BatchSource::new(
                role_rng(config, DEPOT_CONSUMER_STREAM),
                config.batch_range,
                config.spacing_range,
            ),
            produced: 0,
            consumed: 0,
            rejected_adds: 0,
            rejected_takes: 0,
        }
    }

    pub fn stock(&self) -> u32 {
        self.storage.available()
    }
}

impl NodeLogic for DepotNode {
    fn name(&self) -> &'static str {
        "depot"
    }

    fn tick(&mut self, now: SimTime, _outbox: &mut Outbox) {
        if let Some(batch) = self.producer.poll(now) {
            match self.storage.add_to(batch) {
                Ok(level) => {
                    self.produced += batch as u64;
                    debug!(batch, level, at = now, "stocked");
                }
                Err(err) => {
                    self.rejected_adds += 1;
                    debug!(%err, at = now, "stock batch rejected");
                }
            }
        }
        if let Some(batch) = self.consumer.poll(now) {
            match self.storage.take_from(batch) {
                Ok(level) => {
                    self.consumed += batch as u64;
                    debug!(batch, level, at = now, "withdrew");
                }
                Err(err) => {
                    self.rejected_takes += 1;
                    debug!(%err, at = now, "withdrawal rejected");
                }
            }
        }
    }
}

#[cfg(test)]
mod nodes_tests {
    use super::*;

    fn config() -> SimConfig {
        SimConfig::new("nodes-test").with_seed(17)
    }

    #[test]
    fn queue_node_seats_arrival_then_dispatches_to_free_window() {
        let mut node = QueueNode::new(&config());
        let mut outbox = Outbox::new();

        node.on_interaction(&Interaction::AddCustomer { customer_id: 0 }, 1);
        node.tick(1, &mut outbox);
        assert_eq!(node.waiting(), 1);

        node.on_interaction(&Interaction::FreeWindow { window_id: 1 }, 2);
        let mut outbox = Outbox::new();
        node.tick(2, &mut outbox);
        assert_eq!(node.waiting(), 0);
        assert_eq!(node.dispatched, 1);
    }

    #[test]
    fn free_window_with_nobody_waiting_is_remembered() {
        let mut node = QueueNode::new(&config());
        node.on_interaction(&Interaction::FreeWindow { window_id: 0 }, 1);
        let mut outbox = Outbox::new();
        node.tick(1, &mut outbox);
        assert_eq!(node.dispatched, 0);

        node.on_interaction(&Interaction::AddCustomer { customer_id: 5 }, 2);
        let mut outbox = Outbox::new();
        node.tick(2, &mut outbox);
        assert_eq!(node.dispatched, 1);
    }

    #[test]
    fn window_node_announces_all_windows_on_first_tick() {
        let mut node = WindowNode::new(&config());
        let mut outbox = Outbox::new();
        node.tick(1, &mut outbox);
        assert!(!outbox.is_empty());
    }

    #[test]
    fn depot_conserves_stock_over_a_long_run() {
        let mut node = DepotNode::new(&config());
        let mut outbox = Outbox::new();
        for now in 1..=500 {
            node.tick(now, &mut outbox);
            assert!(node.stock() <= 20);
        }
        assert_eq!(node.produced - node.consumed, node.stock() as u64);
    }
}
