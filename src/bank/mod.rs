//! The bank branch: domain state machines plus the five-node assembly
//! that runs them over the federation.

pub mod arrivals;
pub mod nodes;
pub mod queue;
pub mod storage;
pub mod window;

use std::thread;

use tracing::info;

use crate::bank::nodes::{ArrivalsNode, ClassCounters, DepotNode, LedgerNode, QueueNode, WindowNode};
use crate::federation::Federation;
use crate::node::NodeRunner;
use crate::{SimConfig, SimError, SimTime};

/// End-of-run statistics, assembled from the joined node logics.
#[derive(Debug)]
pub struct BranchReport {
    pub customers_arrived: i32,
    pub customers_seated: u32,
    pub customers_dispatched: u32,
    pub customers_served: u32,
    pub still_waiting: usize,
    pub counters: ClassCounters,
    pub queue_sizes: Vec<(SimTime, i32, i32)>,
    pub depot_stock: u32,
    pub depot_produced: u64,
    pub depot_consumed: u64,
}

/// One complete branch simulation: a federation hub plus the five node
/// threads, driven from tick 0 to the configured terminal.
pub struct BranchSim {
    config: SimConfig,
}

impl BranchSim {
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn run(&self) -> Result<BranchReport, SimError> {
        let config = &self.config;
        let federation = Federation::create(&config.federation_name);
        info!(
            federation = %federation.name(),
            terminal = config.terminal,
            seed = config.seed,
            "branch opening"
        );

        let arrivals = NodeRunner::new(
            &federation,
            ArrivalsNode::new(config),
            config.lookahead,
            config.terminal,
        )?;
        let queues = NodeRunner::new(
            &federation,
            QueueNode::new(config),
            config.lookahead,
            config.terminal,
        )?;
        let windows = NodeRunner::new(
            &federation,
            WindowNode::new(config),
            config.lookahead,
            config.terminal,
        )?;
        let ledger = NodeRunner::new(
            &federation,
            LedgerNode::new(),
            config.lookahead,
            config.terminal,
        )?;
        let depot = NodeRunner::new(
            &federation,
            DepotNode::new(config),
            config.lookahead,
            config.terminal,
        )?;

        let arrivals = thread::spawn(move || arrivals.run());
        let queues = thread::spawn(move || queues.run());
        let windows = thread::spawn(move || windows.run());
        let ledger = thread::spawn(move || ledger.run());
        let depot = thread::spawn(move || depot.run());

        let arrivals = arrivals.join().map_err(|_| SimError::ThreadPanic)??;
        let queues = queues.join().map_err(|_| SimError::ThreadPanic)??;
        let windows = windows.join().map_err(|_| SimError::ThreadPanic)??;
        let ledger = ledger.join().map_err(|_| SimError::ThreadPanic)??;
        let depot = depot.join().map_err(|_| SimError::ThreadPanic)??;

        let report = BranchReport {
            customers_arrived: arrivals.issued(),
            customers_seated: queues.seated,
            customers_dispatched: queues.dispatched,
            customers_served: windows.served,
            still_waiting: queues.waiting(),
            counters: ledger.counters,
            queue_sizes: ledger.queue_sizes,
            depot_stock: depot.stock(),
            depot_produced: depot.produced,
            depot_consumed: depot.consumed,
        };
        info!(
            arrived = report.customers_arrived,
            served = report.customers_served,
            waiting = report.still_waiting,
            "branch closed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod branch_tests {
    use super::*;
    use crate::bus::InteractionClass;

    #[test]
    fn full_branch_run_conserves_customers_and_stock() {
        let config = SimConfig::new("branch-e2e")
            .with_seed(42)
            .with_time_bounds(150, 1);
        let windows = config.windows;
        let report = BranchSim::new(config).unwrap().run().unwrap();

        // The run is long enough for the whole pipeline to cycle.
        assert!(report.customers_arrived > 5);
        assert!(report.customers_served > 0);

        // Every customer the queue node saw is either waiting or was sent
        // to a window; nobody is duplicated or lost.
        assert_eq!(
            report.customers_seated,
            report.customers_dispatched + report.still_waiting as u32
        );
        // Arrivals stamped past the terminal never reach the queue node,
        // and the ledger misses messages the queue emits at the terminal.
        assert!(report.customers_seated <= report.customers_arrived as u32);
        assert!(
            report.counters.count(InteractionClass::AssignCustomerToQueue)
                <= report.customers_seated as u64
        );

        // Each window announces itself once, then once per completed
        // service; completions at the terminal tick are stamped past the
        // ledger's horizon.
        let free_seen = report.counters.count(InteractionClass::FreeWindow);
        assert!(free_seen >= windows as u64);
        assert!(free_seen <= windows as u64 + report.customers_served as u64);

        // Size reports exist and the series never goes negative.
        assert!(!report.queue_sizes.is_empty());
        assert!(report.queue_sizes.iter().all(|&(_, _, size)| size >= 0));

        // Depot bookkeeping balances against the remaining stock.
        assert_eq!(
            report.depot_produced - report.depot_consumed,
            report.depot_stock as u64
        );
    }

    #[test]
    fn same_seed_gives_the_same_report() {
        let run = |seed| {
            let config = SimConfig::new("branch-replay")
                .with_seed(seed)
                .with_time_bounds(80, 1);
            BranchSim::new(config).unwrap().run().unwrap()
        };
        let a = run(7);
        let b = run(7);
        assert_eq!(a.customers_arrived, b.customers_arrived);
        assert_eq!(a.customers_served, b.customers_served);
        assert_eq!(a.depot_stock, b.depot_stock);
        assert_eq!(a.queue_sizes, b.queue_sizes);
    }
}
