use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, info};

use crate::bus::{InteractionClass, RawInteraction};
use crate::federation::{BarrierOutcome, Session, Signal};
use crate::{SimError, SimTime};

/// A message buffered for one subscriber until a grant carries it over.
/// Ordered by (timestamp, global send sequence) so delivery is strict in
/// simulated time, with sender order breaking ties.
#[derive(Debug)]
struct QueuedDelivery {
    at: SimTime,
    seq: u64,
    raw: RawInteraction,
}

impl PartialEq for QueuedDelivery {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for QueuedDelivery {}

impl PartialOrd for QueuedDelivery {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedDelivery {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.cmp(&other.at).then_with(|| self.seq.cmp(&other.seq))
    }
}

struct NodeSlot {
    name: String,
    tx: Sender<Signal>,
    joined: bool,
    regulating: bool,
    constrained: bool,
    lookahead: SimTime,
    time: SimTime,
    pending: Option<SimTime>,
    inbox: BinaryHeap<Reverse<QueuedDelivery>>,
    publishes: BTreeSet<InteractionClass>,
    subscribes: BTreeSet<InteractionClass>,
}

impl NodeSlot {
    /// Lower bound on the timestamp of anything this node may still send.
    /// With a pending request the node cannot send until granted, so the
    /// bound moves up to the request target.
    fn send_floor(&self) -> SimTime {
        self.pending
            .unwrap_or(self.time)
            .saturating_add(self.lookahead)
    }

    fn push(&mut self, signal: Signal) {
        if self.tx.send(signal).is_err() {
            // Receiver thread is gone; stop counting this node.
            self.joined = false;
        }
    }
}

#[derive(Default)]
struct Barrier {
    achieved: BTreeSet<usize>,
    synchronized: bool,
}

struct HubState {
    nodes: Vec<NodeSlot>,
    barriers: BTreeMap<String, Barrier>,
    running: bool,
    destroyed: bool,
    send_seq: u64,
}

/// The federation hub. Cloning yields another handle to the same federation;
/// nodes join through `connect` and interact through their `Session`.
#[derive(Clone)]
pub struct Federation {
    name: Arc<String>,
    state: Arc<Mutex<HubState>>,
}

impl Federation {
    pub fn create(name: &str) -> Self {
        info!(federation = name, "federation created");
        Self {
            name: Arc::new(name.to_string()),
            state: Arc::new(Mutex::new(HubState {
                nodes: Vec::new(),
                barriers: BTreeMap::new(),
                running: true,
                destroyed: false,
                send_seq: 0,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join the federation. Fails fatally once the federation is destroyed
    /// or its state is unrecoverable.
    pub fn connect(&self, node_name: &str) -> Result<Session, SimError> {
        let mut state = self.lock()?;
        if state.destroyed {
            return Err(SimError::ConnectionLost);
        }
        let (tx, rx) = unbounded();
        // A late joiner still hears about every barrier already registered.
        for label in state.barriers.keys() {
            if tx.send(Signal::BarrierAnnounced(label.clone())).is_err() {
                return Err(SimError::ConnectionLost);
            }
        }
        let id = state.nodes.len();
        state.nodes.push(NodeSlot {
            name: node_name.to_string(),
            tx,
            joined: true,
            regulating: false,
            constrained: false,
            lookahead: 0,
            time: 0,
            pending: None,
            inbox: BinaryHeap::new(),
            publishes: BTreeSet::new(),
            subscribes: BTreeSet::new(),
        });
        info!(federation = %self.name, node = node_name, "node joined");
        Ok(Session::joined(self.clone(), id, node_name.to_string(), rx))
    }

    /// Cooperative stop: clear the running flag and wake every node that is
    /// blocked in a time-advance request.
    pub fn shutdown(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if !state.running {
            return;
        }
        state.running = false;
        for slot in &mut state.nodes {
            if slot.joined {
                slot.push(Signal::Halt);
            }
        }
        info!(federation = %self.name, "running flag cleared");
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.running && !state.destroyed)
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HubState>, SimError> {
        self.state.lock().map_err(|_| SimError::ConnectionLost)
    }

    pub(crate) fn register_barrier(
        &self,
        id: usize,
        label: &str,
    ) -> Result<BarrierOutcome, SimError> {
        let mut state = self.lock()?;
        if state.barriers.contains_key(label) {
            debug!(node = id, label, "barrier already registered elsewhere");
            return Ok(BarrierOutcome::AlreadyRegistered);
        }
        state.barriers.insert(label.to_string(), Barrier::default());
        let announce = Signal::BarrierAnnounced;
        for slot in state.nodes.iter_mut().filter(|slot| slot.joined) {
            slot.push(announce(label.to_string()));
        }
        Ok(BarrierOutcome::Registered)
    }

    pub(crate) fn achieve_barrier(&self, id: usize, label: &str) -> Result<(), SimError> {
        let mut state = self.lock()?;
        let barrier = state
            .barriers
            .get_mut(label)
            .unwrap_or_else(|| panic!("barrier `{label}` achieved before being registered"));
        barrier.achieved.insert(id);
        state.check_barriers();
        Ok(())
    }

    pub(crate) fn enable_time_regulation(
        &self,
        id: usize,
        lookahead: SimTime,
    ) -> Result<(), SimError> {
        let mut state = self.lock()?;
        let slot = &mut state.nodes[id];
        slot.regulating = true;
        slot.lookahead = lookahead;
        let at = slot.time;
        slot.push(Signal::RegulationEnabled(at));
        Ok(())
    }

    pub(crate) fn enable_time_constrained(&self, id: usize) -> Result<(), SimError> {
        let mut state = self.lock()?;
        let slot = &mut state.nodes[id];
        slot.constrained = true;
        let at = slot.time;
        slot.push(Signal::ConstrainedEnabled(at));
        Ok(())
    }

    pub(crate) fn declare_publication(
        &self,
        id: usize,
        class: InteractionClass,
    ) -> Result<(), SimError> {
        let mut state = self.lock()?;
        state.nodes[id].publishes.insert(class);
        Ok(())
    }

    pub(crate) fn declare_subscription(
        &self,
        id: usize,
        class: InteractionClass,
    ) -> Result<(), SimError> {
        let mut state = self.lock()?;
        state.nodes[id].subscribes.insert(class);
        Ok(())
    }

    /// Stamp and route one interaction to every subscriber except the
    /// sender. The message sits in each subscriber's inbox until a grant at
    /// or past its timestamp carries it over, which extends the grant-rule
    /// ordering guarantee to messages.
    pub(crate) fn send_interaction(&self, id: usize, mut raw: RawInteraction) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if !state.running {
            return;
        }
        let sender = &state.nodes[id];
        // The lookahead contract: nothing may be stamped earlier than the
        // sender's clock plus its promised lookahead.
        let stamp = sender.time.saturating_add(sender.lookahead);
        raw.timestamp = Some(stamp);
        let seq = state.send_seq;
        state.send_seq += 1;

        let class = raw.class;
        for i in 0..state.nodes.len() {
            let slot = &mut state.nodes[i];
            if i == id || !slot.joined || !slot.subscribes.contains(&class) {
                continue;
            }
            slot.inbox.push(Reverse(QueuedDelivery {
                at: stamp,
                seq,
                raw: raw.clone(),
            }));
        }
    }

    /// Record a pending advance request and run the grant rule. The calling
    /// session blocks on its channel afterwards; the grant signal arrives
    /// from whichever evaluation makes it legal.
    pub(crate) fn request_time_advance(&self, id: usize, target: SimTime) -> Result<(), SimError> {
        let mut state = self.lock()?;
        let slot = &mut state.nodes[id];
        if !slot.joined {
            let name = slot.name.clone();
            return Err(SimError::NotJoined(name));
        }
        if target <= slot.time {
            return Err(SimError::TimeTravel {
                requested: target,
                now: slot.time,
            });
        }
        slot.pending = Some(target);
        state.evaluate();
        Ok(())
    }

    pub(crate) fn resign(&self, id: usize) -> Result<(), SimError> {
        let mut state = self.lock()?;
        let slot = &mut state.nodes[id];
        slot.joined = false;
        slot.pending = None;
        slot.publishes.clear();
        slot.subscribes.clear();
        let name = slot.name.clone();
        // The departed node no longer bounds anyone; re-run both rendezvous
        // and grant checks.
        state.check_barriers();
        state.evaluate();
        info!(federation = %self.name, node = %name, "node resigned");
        Ok(())
    }

    pub(crate) fn destroy(&self, _id: usize) -> Result<(), SimError> {
        let mut state = self.lock()?;
        if state.destroyed {
            debug!(federation = %self.name, "no need to destroy, already gone");
            return Ok(());
        }
        if state.nodes.iter().any(|slot| slot.joined) {
            return Err(SimError::NodesStillJoined);
        }
        state.destroyed = true;
        state.running = false;
        info!(federation = %self.name, "federation destroyed");
        Ok(())
    }
}

impl HubState {
    /// Grant every pending request the lockstep rule currently allows,
    /// repeating until a fixpoint: each grant raises the granted node's send
    /// floor and may legalize someone else's request.
    fn evaluate(&mut self) {
        loop {
            let mut granted_any = false;
            for id in 0..self.nodes.len() {
                let slot = &self.nodes[id];
                if !slot.joined {
                    continue;
                }
                let Some(target) = slot.pending else {
                    continue;
                };
                if slot.constrained && target >= self.lbts_excluding(id) {
                    continue;
                }
                self.grant(id, target);
                granted_any = true;
            }
            if !granted_any {
                break;
            }
        }
    }

    /// Lower bound on timestamps still to come from every *other* joined
    /// regulating node. A constrained node is granted only strictly below
    /// this, so the delivery set handed over with a grant is complete.
    fn lbts_excluding(&self, id: usize) -> SimTime {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(i, slot)| *i != id && slot.joined && slot.regulating)
            .map(|(_, slot)| slot.send_floor())
            .min()
            .unwrap_or(SimTime::MAX)
    }

    /// Flush every delivery stamped at or before `target`, then the grant
    /// itself. Delivery strictly precedes the grant on the channel, so the
    /// session returns from its advance request with the messages in hand.
    fn grant(&mut self, id: usize, target: SimTime) {
        let slot = &mut self.nodes[id];
        slot.pending = None;
        slot.time = target;
        while slot
            .inbox
            .peek()
            .is_some_and(|Reverse(delivery)| delivery.at <= target)
        {
            if let Some(Reverse(delivery)) = slot.inbox.pop() {
                slot.push(Signal::Delivery(delivery.raw));
            }
        }
        slot.push(Signal::Grant(target));
        debug!(node = id, time = target, "time advance granted");
    }

    fn check_barriers(&mut self) {
        let joined: BTreeSet<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.joined)
            .map(|(i, _)| i)
            .collect();
        if joined.is_empty() {
            return;
        }
        let mut synchronized = Vec::new();
        for (label, barrier) in self.barriers.iter_mut() {
            if !barrier.synchronized && joined.is_subset(&barrier.achieved) {
                barrier.synchronized = true;
                synchronized.push(label.clone());
            }
        }
        for label in synchronized {
            for slot in self.nodes.iter_mut().filter(|slot| slot.joined) {
                slot.push(Signal::Synchronized(label.clone()));
            }
        }
    }
}
