use thiserror::Error;

use crate::bus::InteractionClass;
use crate::SimTime;

/// Error enum for feedback on federation and domain failures.
///
/// Transport variants are fatal for the node that hits them during setup;
/// domain variants are per-tick local failures the caller reacts to and moves
/// past. The node loop itself never stops on any of these.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("federation transport is closed")]
    ConnectionLost,
    #[error("node `{0}` is not joined to the federation")]
    NotJoined(String),
    #[error("cannot advance to {requested}, node is already at {now}")]
    TimeTravel { requested: SimTime, now: SimTime },
    #[error("malformed `{class:?}` payload: {reason}")]
    Decode {
        class: InteractionClass,
        reason: String,
    },
    #[error("storage is {available}/{max}, no room for {requested} more")]
    CapacityExceeded {
        requested: u32,
        available: u32,
        max: u32,
    },
    #[error("storage holds {available}, cannot give {requested}")]
    InsufficientStock { requested: u32, available: u32 },
    #[error("queue {0} is empty")]
    EmptyQueue(u32),
    #[error("window {0} is already serving a customer")]
    WindowBusy(u32),
    #[error("window {0} has no service in progress")]
    WindowIdle(u32),
    #[error("window {id} service completes at {due}, not {now}")]
    ServiceNotDue { id: u32, due: SimTime, now: SimTime },
    #[error("cannot destroy the federation, other nodes are still joined")]
    NodesStillJoined,
    #[error("node thread panicked")]
    ThreadPanic,
    #[error("invalid configuration: {0}")]
    Config(String),
}
