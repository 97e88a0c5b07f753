use std::collections::BTreeSet;

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::bus::{Interaction, InteractionClass, RawInteraction};
use crate::federation::{Federation, Signal};
use crate::{SimError, SimTime};

/// Lifecycle phase of a node's coordinator session. Phases only ever move
/// forward; `phase()` is an observer for callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionPhase {
    Disconnected,
    Connected,
    BarrierRegistered,
    BarrierAnnounced,
    BarrierAchieved,
    Synchronized,
    Regulating,
    Constrained,
    Running,
    Resigning,
    Destroyed,
}

/// Registering a barrier someone else already registered is expected during
/// a normal start, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    Registered,
    AlreadyRegistered,
}

/// A node's handle on the federation: its local clock, its half of the
/// signal channel, and the operations of the synchronization protocol.
/// `request_time_advance` is the node's only suspension point.
pub struct Session {
    federation: Federation,
    id: usize,
    name: String,
    rx: Receiver<Signal>,
    phase: SessionPhase,
    time: SimTime,
    lookahead: SimTime,
    regulating: bool,
    constrained: bool,
    halted: bool,
    publishes: BTreeSet<InteractionClass>,
    staged: Vec<RawInteraction>,
}

impl Session {
    pub(crate) fn joined(
        federation: Federation,
        id: usize,
        name: String,
        rx: Receiver<Signal>,
    ) -> Self {
        Self {
            federation,
            id,
            name,
            rx,
            phase: SessionPhase::Connected,
            time: 0,
            lookahead: 0,
            regulating: false,
            constrained: false,
            halted: false,
            publishes: BTreeSet::new(),
            staged: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Current simulated time. Monotonically non-decreasing.
    pub fn now(&self) -> SimTime {
        self.time
    }

    pub fn lookahead(&self) -> SimTime {
        self.lookahead
    }

    pub fn is_regulating(&self) -> bool {
        self.regulating
    }

    pub fn is_constrained(&self) -> bool {
        self.constrained
    }

    /// True until the federation's shared running flag is cleared or this
    /// node hears a halt. The node loop polls this once per tick.
    pub fn is_running(&self) -> bool {
        !self.halted && self.federation.is_running()
    }

    pub fn register_barrier(&mut self, label: &str) -> Result<BarrierOutcome, SimError> {
        let outcome = self.federation.register_barrier(self.id, label)?;
        if let BarrierOutcome::AlreadyRegistered = outcome {
            info!(node = %self.name, label, "barrier already registered, continuing");
        }
        self.advance_phase(SessionPhase::BarrierRegistered);
        Ok(outcome)
    }

    /// Block until the given barrier has been announced to this node.
    pub fn wait_for_announced(&mut self, label: &str) -> Result<(), SimError> {
        self.wait_for(|signal| matches!(signal, Signal::BarrierAnnounced(l) if l == label))?;
        self.advance_phase(SessionPhase::BarrierAnnounced);
        Ok(())
    }

    pub fn achieve_barrier(&mut self, label: &str) -> Result<(), SimError> {
        self.federation.achieve_barrier(self.id, label)?;
        self.advance_phase(SessionPhase::BarrierAchieved);
        info!(node = %self.name, label, "achieved barrier, waiting for federation");
        Ok(())
    }

    /// Block until every joined node has achieved the barrier.
    pub fn wait_for_synchronized(&mut self, label: &str) -> Result<(), SimError> {
        self.wait_for(|signal| matches!(signal, Signal::Synchronized(l) if l == label))?;
        self.advance_phase(SessionPhase::Synchronized);
        Ok(())
    }

    /// Opt into the lockstep protocol as a sender: promise never to stamp
    /// an outgoing message earlier than `now + lookahead`.
    pub fn enable_time_regulation(&mut self, lookahead: SimTime) -> Result<SimTime, SimError> {
        self.federation.enable_time_regulation(self.id, lookahead)?;
        let mut enabled_at = self.time;
        self.wait_for(|signal| {
            if let Signal::RegulationEnabled(at) = signal {
                enabled_at = *at;
                true
            } else {
                false
            }
        })?;
        self.regulating = true;
        self.lookahead = lookahead;
        self.time = enabled_at;
        self.advance_phase(SessionPhase::Regulating);
        Ok(enabled_at)
    }

    /// Opt into the lockstep protocol as a receiver: never be granted past
    /// the other regulating nodes' send floor.
    pub fn enable_time_constrained(&mut self) -> Result<SimTime, SimError> {
        self.federation.enable_time_constrained(self.id)?;
        let mut enabled_at = self.time;
        self.wait_for(|signal| {
            if let Signal::ConstrainedEnabled(at) = signal {
                enabled_at = *at;
                true
            } else {
                false
            }
        })?;
        self.constrained = true;
        self.time = enabled_at;
        self.advance_phase(SessionPhase::Constrained);
        Ok(enabled_at)
    }

    /// Declare an interaction class this node will send. Once per class,
    /// during setup.
    pub fn declare_publication(&mut self, class: InteractionClass) -> Result<(), SimError> {
        self.federation.declare_publication(self.id, class)?;
        self.publishes.insert(class);
        Ok(())
    }

    /// Declare an interaction class this node wants delivered. Once per
    /// class, during setup.
    pub fn declare_subscription(&mut self, class: InteractionClass) -> Result<(), SimError> {
        self.federation.declare_subscription(self.id, class)
    }

    /// Send one interaction. Sending a class this node never declared is a
    /// programming error, not a runtime condition.
    pub fn send(&mut self, interaction: &Interaction, tag: Vec<u8>) {
        let class = interaction.class();
        assert!(
            self.publishes.contains(&class),
            "node `{}` sent {class:?} without declaring its publication",
            self.name
        );
        self.federation
            .send_interaction(self.id, interaction.encode(tag));
    }

    /// Suspend until the federation grants the advance. Returns the granted
    /// time together with every message stamped at or before it, in
    /// timestamp order. This is the only call that blocks inside a tick.
    pub fn request_time_advance(
        &mut self,
        target: SimTime,
    ) -> Result<(SimTime, Vec<RawInteraction>), SimError> {
        self.advance_phase(SessionPhase::Running);
        let mut received = std::mem::take(&mut self.staged);
        if self.halted {
            return Ok((self.time, received));
        }
        self.federation.request_time_advance(self.id, target)?;
        loop {
            match self.rx.recv().map_err(|_| SimError::ConnectionLost)? {
                Signal::Delivery(raw) => received.push(raw),
                Signal::Grant(granted) => {
                    self.time = granted;
                    debug!(node = %self.name, time = granted, "time advanced");
                    return Ok((granted, received));
                }
                Signal::Halt => {
                    // Cooperative stop while suspended: hand back whatever
                    // was already delivered, without advancing. The caller
                    // sees `is_running() == false` and winds down.
                    self.halted = true;
                    return Ok((self.time, received));
                }
                other => {
                    debug!(node = %self.name, ?other, "stray setup signal during advance");
                }
            }
        }
    }

    pub fn resign(&mut self) -> Result<(), SimError> {
        self.advance_phase(SessionPhase::Resigning);
        self.federation.resign(self.id)
    }

    /// Tear the federation down if this node is the last one out. Losing
    /// the race to remaining nodes is reported, not fatal.
    pub fn destroy(&mut self) -> Result<(), SimError> {
        let result = self.federation.destroy(self.id);
        self.advance_phase(SessionPhase::Destroyed);
        result
    }

    /// Block on the signal channel until `matched` accepts a signal.
    /// Deliveries that arrive in between are staged for the next advance;
    /// anything else out of order is logged and dropped.
    fn wait_for(&mut self, mut matched: impl FnMut(&Signal) -> bool) -> Result<(), SimError> {
        loop {
            let signal = self.rx.recv().map_err(|_| SimError::ConnectionLost)?;
            if matched(&signal) {
                return Ok(());
            }
            match signal {
                Signal::Delivery(raw) => self.staged.push(raw),
                Signal::Halt => {
                    self.halted = true;
                    return Err(SimError::ConnectionLost);
                }
                other => warn!(node = %self.name, ?other, "unexpected signal while waiting"),
            }
        }
    }

    fn advance_phase(&mut self, phase: SessionPhase) {
        if phase > self.phase {
            self.phase = phase;
        }
    }
}
