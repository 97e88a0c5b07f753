//! `pankki::federation` is the synchronization substrate: a process-local hub
//! every node joins, plus the per-node `Session` handle that exposes barrier
//! rendezvous, time regulation, and the lockstep time-advance request.
//!
//! The sole ordering guarantee of the whole crate lives in
//! `Federation::evaluate`: a regulating, constrained node is granted time T
//! only once every other regulating node has reached or passed T minus its
//! lookahead. Message delivery piggybacks on grants, which makes the
//! guarantee transitive to interactions.

use crate::bus::RawInteraction;
use crate::SimTime;

mod hub;
mod session;

pub use hub::Federation;
pub use session::{BarrierOutcome, Session, SessionPhase};

/// One signal per grant, delivery, or lifecycle event. The hub pushes these
/// into a session's channel; the session blocks on receipt instead of
/// pumping callbacks.
#[derive(Debug)]
pub(crate) enum Signal {
    BarrierAnnounced(String),
    Synchronized(String),
    RegulationEnabled(SimTime),
    ConstrainedEnabled(SimTime),
    Delivery(RawInteraction),
    Grant(SimTime),
    Halt,
}

#[cfg(test)]
mod federation_tests {
    use std::thread;

    use crate::bus::{Interaction, InteractionClass};
    use crate::SimError;

    use super::*;

    const READY: &str = "ReadyToRun";

    fn rendezvous(session: &mut Session) {
        session.register_barrier(READY).unwrap();
        session.wait_for_announced(READY).unwrap();
        session.enable_time_regulation(1).unwrap();
        session.enable_time_constrained().unwrap();
        session.achieve_barrier(READY).unwrap();
        session.wait_for_synchronized(READY).unwrap();
    }

    #[test]
    fn barrier_already_registered_is_informational() {
        let federation = Federation::create("test");
        let mut a = federation.connect("a").unwrap();
        let mut b = federation.connect("b").unwrap();

        assert!(matches!(
            a.register_barrier(READY).unwrap(),
            BarrierOutcome::Registered
        ));
        assert!(matches!(
            b.register_barrier(READY).unwrap(),
            BarrierOutcome::AlreadyRegistered
        ));
        a.wait_for_announced(READY).unwrap();
        b.wait_for_announced(READY).unwrap();
    }

    #[test]
    fn session_walks_the_lifecycle_phases_in_order() {
        let federation = Federation::create("test");
        let mut a = federation.connect("a").unwrap();
        assert_eq!(a.phase(), SessionPhase::Connected);

        a.register_barrier(READY).unwrap();
        assert_eq!(a.phase(), SessionPhase::BarrierRegistered);
        a.wait_for_announced(READY).unwrap();
        assert_eq!(a.phase(), SessionPhase::BarrierAnnounced);
        a.achieve_barrier(READY).unwrap();
        assert_eq!(a.phase(), SessionPhase::BarrierAchieved);
        a.wait_for_synchronized(READY).unwrap();
        assert_eq!(a.phase(), SessionPhase::Synchronized);

        a.enable_time_regulation(1).unwrap();
        assert_eq!(a.phase(), SessionPhase::Regulating);
        a.enable_time_constrained().unwrap();
        assert_eq!(a.phase(), SessionPhase::Constrained);
        a.request_time_advance(1).unwrap();
        assert_eq!(a.phase(), SessionPhase::Running);

        // Re-achieving a barrier mid-run never drags the phase backward.
        a.achieve_barrier(READY).unwrap();
        assert_eq!(a.phase(), SessionPhase::Running);

        a.resign().unwrap();
        assert_eq!(a.phase(), SessionPhase::Resigning);
        a.destroy().unwrap();
        assert_eq!(a.phase(), SessionPhase::Destroyed);
    }

    #[test]
    fn late_joiner_sees_existing_barrier_announcement() {
        let federation = Federation::create("test");
        let mut a = federation.connect("a").unwrap();
        a.register_barrier(READY).unwrap();
        a.wait_for_announced(READY).unwrap();

        let mut b = federation.connect("b").unwrap();
        b.wait_for_announced(READY).unwrap();
    }

    #[test]
    fn connect_after_destroy_is_fatal() {
        let federation = Federation::create("test");
        {
            let mut a = federation.connect("a").unwrap();
            a.resign().unwrap();
            a.destroy().unwrap();
        }
        assert!(matches!(
            federation.connect("late"),
            Err(SimError::ConnectionLost)
        ));
    }

    #[test]
    fn destroy_with_nodes_joined_is_a_teardown_race() {
        let federation = Federation::create("test");
        let mut a = federation.connect("a").unwrap();
        let _b = federation.connect("b").unwrap();
        a.resign().unwrap();
        assert!(matches!(a.destroy(), Err(SimError::NodesStillJoined)));
    }

    #[test]
    fn advance_into_the_past_is_rejected() {
        let federation = Federation::create("test");
        let mut a = federation.connect("a").unwrap();
        a.enable_time_regulation(1).unwrap();
        a.enable_time_constrained().unwrap();

        let (granted, _) = a.request_time_advance(5).unwrap();
        assert_eq!(granted, 5);
        assert!(matches!(
            a.request_time_advance(5),
            Err(SimError::TimeTravel { requested: 5, now: 5 })
        ));
    }

    #[test]
    fn lone_node_advances_freely() {
        let federation = Federation::create("test");
        let mut a = federation.connect("a").unwrap();
        a.enable_time_regulation(1).unwrap();
        a.enable_time_constrained().unwrap();
        for target in 1..=10 {
            let (granted, deliveries) = a.request_time_advance(target).unwrap();
            assert_eq!(granted, target);
            assert!(deliveries.is_empty());
        }
        assert_eq!(a.now(), 10);
    }

    #[test]
    fn resign_unblocks_waiting_peers() {
        let federation = Federation::create("test");
        let mut a = federation.connect("a").unwrap();
        let mut b = federation.connect("b").unwrap();

        let handle = thread::spawn(move || {
            rendezvous(&mut b);
            // b asks far ahead of a's floor and must wait until a resigns.
            let (granted, _) = b.request_time_advance(50).unwrap();
            granted
        });

        rendezvous(&mut a);
        for target in 1..=3 {
            a.request_time_advance(target).unwrap();
        }
        a.resign().unwrap();
        assert_eq!(handle.join().unwrap(), 50);
    }

    /// The lockstep property: for a message stamped s, the receiver has
    /// never been granted time strictly past s before receiving it.
    #[test]
    fn no_grant_past_an_unreceived_message() {
        let federation = Federation::create("test");
        let mut sender = federation.connect("sender").unwrap();
        let mut receiver = federation.connect("receiver").unwrap();

        let ticks: SimTime = 40;
        let handle = thread::spawn(move || {
            receiver.register_barrier(READY).unwrap();
            receiver.wait_for_announced(READY).unwrap();
            receiver.enable_time_regulation(1).unwrap();
            receiver.enable_time_constrained().unwrap();
            receiver
                .declare_subscription(InteractionClass::AddCustomer)
                .unwrap();
            receiver.achieve_barrier(READY).unwrap();
            receiver.wait_for_synchronized(READY).unwrap();
            let mut observed = Vec::new();
            let mut now = 0;
            while now < ticks + 2 {
                let before = receiver.now();
                let (granted, deliveries) = receiver.request_time_advance(before + 1).unwrap();
                for raw in deliveries {
                    observed.push((before, raw.timestamp.unwrap()));
                }
                now = granted;
            }
            observed
        });

        sender.register_barrier(READY).unwrap();
        sender.wait_for_announced(READY).unwrap();
        sender.enable_time_regulation(1).unwrap();
        sender.enable_time_constrained().unwrap();
        sender
            .declare_publication(InteractionClass::AddCustomer)
            .unwrap();
        sender.achieve_barrier(READY).unwrap();
        sender.wait_for_synchronized(READY).unwrap();
        for tick in 1..=ticks {
            let (granted, _) = sender.request_time_advance(tick).unwrap();
            sender.send(
                &Interaction::AddCustomer {
                    customer_id: granted as i32,
                },
                Vec::new(),
            );
        }
        sender.resign().unwrap();

        let observed = handle.join().unwrap();
        assert_eq!(observed.len(), ticks as usize);
        for (time_before_receipt, stamp) in observed {
            assert!(
                time_before_receipt <= stamp,
                "receiver was at {time_before_receipt} before receiving a message stamped {stamp}"
            );
        }
    }

    #[test]
    fn shutdown_wakes_a_blocked_node() {
        let federation = Federation::create("test");
        let mut a = federation.connect("a").unwrap();
        let _b_keeps_a_bounded = {
            let mut b = federation.connect("b").unwrap();
            b.enable_time_regulation(1).unwrap();
            b
        };
        a.enable_time_regulation(1).unwrap();
        a.enable_time_constrained().unwrap();

        let hub = federation.clone();
        let handle = thread::spawn(move || {
            // a cannot be granted 100 while b sits at 0.
            let (granted, _) = a.request_time_advance(100).unwrap();
            (granted, a.is_running())
        });
        thread::sleep(std::time::Duration::from_millis(20));
        hub.shutdown();

        let (granted, running) = handle.join().unwrap();
        assert_eq!(granted, 0);
        assert!(!running);
    }

    #[test]
    fn deliveries_arrive_in_timestamp_order() {
        let federation = Federation::create("test");
        let mut sender = federation.connect("sender").unwrap();
        let mut receiver = federation.connect("receiver").unwrap();

        sender.enable_time_regulation(1).unwrap();
        sender.enable_time_constrained().unwrap();
        sender
            .declare_publication(InteractionClass::FreeWindow)
            .unwrap();
        receiver
            .declare_subscription(InteractionClass::FreeWindow)
            .unwrap();

        // Sender runs ahead alone (receiver is not yet regulating), queueing
        // one message per tick; the receiver then drains them in one advance.
        for tick in 1..=5 {
            sender.request_time_advance(tick).unwrap();
            sender.send(
                &Interaction::FreeWindow {
                    window_id: tick as i32,
                },
                Vec::new(),
            );
        }

        receiver.enable_time_regulation(1).unwrap();
        receiver.enable_time_constrained().unwrap();
        sender.resign().unwrap();

        let (_, deliveries) = receiver.request_time_advance(20).unwrap();
        let stamps: Vec<SimTime> = deliveries
            .iter()
            .map(|raw| raw.timestamp.unwrap())
            .collect();
        assert_eq!(stamps.len(), 5);
        let mut sorted = stamps.clone();
        sorted.sort_unstable();
        assert_eq!(stamps, sorted);
    }
}
