//! Node lifecycle and the per-tick cooperative loop. A `NodeRunner` walks a
//! `NodeLogic` through the whole protocol: join, barrier rendezvous, time
//! policy, publish/subscribe declarations, then the tick loop, and finally
//! the resign/destroy teardown. One runner per OS thread.

use tracing::{info, warn};

use crate::bus::{Interaction, InteractionClass};
use crate::federation::{Federation, Session};
use crate::{SimError, SimTime};

/// The barrier every node passes before its first tick.
pub const READY_TO_RUN: &str = "ReadyToRun";

/// Outgoing interactions collected during one tick and sent as a batch
/// after the transition finishes.
#[derive(Debug, Default)]
pub struct Outbox {
    queued: Vec<Interaction>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interaction: Interaction) {
        self.queued.push(interaction);
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    fn drain(&mut self) -> Vec<Interaction> {
        std::mem::take(&mut self.queued)
    }
}

/// Behavior of one simulation node. Receive callbacks are kept separate
/// from the per-tick transition: all deliveries for a tick are consumed
/// before the transition runs and emits anything new.
pub trait NodeLogic: Send {
    /// Stable node name, also used as the federation join name.
    fn name(&self) -> &'static str;

    /// Interaction classes this node sends.
    fn publications(&self) -> &'static [InteractionClass] {
        &[]
    }

    /// Interaction classes this node wants delivered.
    fn subscriptions(&self) -> &'static [InteractionClass] {
        &[]
    }

    /// One delivered interaction, invoked once per message in timestamp
    /// order, before `tick` runs for the granted time.
    fn on_interaction(&mut self, _interaction: &Interaction, _at: SimTime) {}

    /// The per-tick transition. Runs exactly once per granted advance.
    fn tick(&mut self, now: SimTime, outbox: &mut Outbox);

    /// How far past `now` the next advance request should reach.
    fn advance_by(&self, _now: SimTime) -> SimTime {
        1
    }
}

/// Drives one `NodeLogic` through the federation protocol to the terminal
/// time, then hands the logic back for inspection.
pub struct NodeRunner<L: NodeLogic> {
    session: Session,
    logic: L,
    lookahead: SimTime,
    terminal: SimTime,
}

impl<L: NodeLogic> NodeRunner<L> {
    pub fn new(
        federation: &Federation,
        logic: L,
        lookahead: SimTime,
        terminal: SimTime,
    ) -> Result<Self, SimError> {
        let session = federation.connect(logic.name())?;
        Ok(Self {
            session,
            logic,
            lookahead,
            terminal,
        })
    }

    /// Setup through teardown. Setup-time transport errors abort the node;
    /// nothing inside the tick loop does.
    pub fn run(mut self) -> Result<L, SimError> {
        self.rendezvous()?;
        self.tick_loop()?;
        self.teardown();
        Ok(self.logic)
    }

    /// Barrier rendezvous, time policy, and declarations. Declarations and
    /// the time policy happen before the barrier is achieved so that no
    /// node starts ticking against peers that are not yet regulating or
    /// subscribed.
    fn rendezvous(&mut self) -> Result<(), SimError> {
        let session = &mut self.session;
        session.register_barrier(READY_TO_RUN)?;
        session.wait_for_announced(READY_TO_RUN)?;

        session.enable_time_regulation(self.lookahead)?;
        session.enable_time_constrained()?;
        info!(node = %session.name(), "time policy enabled");

        for class in self.logic.publications() {
            session.declare_publication(*class)?;
        }
        for class in self.logic.subscriptions() {
            session.declare_subscription(*class)?;
        }
        info!(node = %session.name(), "published and subscribed");

        session.achieve_barrier(READY_TO_RUN)?;
        session.wait_for_synchronized(READY_TO_RUN)?;
        Ok(())
    }

    fn tick_loop(&mut self) -> Result<(), SimError> {
        let mut outbox = Outbox::new();
        loop {
            if !self.session.is_running() {
                break;
            }
            let now = self.session.now();
            let target = now.saturating_add(self.logic.advance_by(now));
            if target > self.terminal {
                break;
            }

            let (granted, deliveries) = self.session.request_time_advance(target)?;
            if !self.session.is_running() {
                break;
            }

            for raw in deliveries {
                match Interaction::decode(&raw) {
                    Ok(interaction) => {
                        let at = raw.timestamp.unwrap_or(granted);
                        self.logic.on_interaction(&interaction, at);
                    }
                    // One bad payload never takes the tick down with it.
                    Err(err) => warn!(node = %self.session.name(), %err, "skipping message"),
                }
            }

            self.logic.tick(granted, &mut outbox);
            for interaction in outbox.drain() {
                self.session.send(&interaction, Vec::new());
            }
        }
        Ok(())
    }

    /// Resign and, if last out, destroy. Teardown races are logged and
    /// swallowed; local shutdown always completes.
    fn teardown(&mut self) {
        if let Err(err) = self.session.resign() {
            warn!(node = %self.session.name(), %err, "resign failed during teardown");
        }
        match self.session.destroy() {
            Ok(()) => info!(node = %self.session.name(), "destroyed federation"),
            Err(SimError::NodesStillJoined) => {
                info!(node = %self.session.name(), "left destruction to remaining nodes")
            }
            Err(err) => warn!(node = %self.session.name(), %err, "destroy failed"),
        }
    }
}
