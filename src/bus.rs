//! Typed interaction layer: the fixed message-class table, the `Interaction`
//! sum type nodes pattern-match on, and the big-endian integer codec that
//! turns both into the raw wire form the federation hub routes.
//!
//! The class table is ordinary static data built once; adding a class means
//! adding an enum variant, and every `match` in the crate goes non-exhaustive
//! until the new class is handled.

use crate::{SimError, SimTime};

/// Identity of an interaction class. Routing and publish/subscribe
/// declarations are keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InteractionClass {
    AddCustomer,
    AssignCustomerToQueue,
    CurrentQueueSize,
    CustomerChangeQueue,
    MoveCustomerToWindow,
    AssignCustomerToWindow,
    FreeWindow,
}

/// Every class the federation knows about, in schema order.
pub const ALL_CLASSES: [InteractionClass; 7] = [
    InteractionClass::AddCustomer,
    InteractionClass::AssignCustomerToQueue,
    InteractionClass::CurrentQueueSize,
    InteractionClass::CustomerChangeQueue,
    InteractionClass::MoveCustomerToWindow,
    InteractionClass::AssignCustomerToWindow,
    InteractionClass::FreeWindow,
];

impl InteractionClass {
    pub fn name(&self) -> &'static str {
        match self {
            InteractionClass::AddCustomer => "addCustomer",
            InteractionClass::AssignCustomerToQueue => "assignCustomerToQueue",
            InteractionClass::CurrentQueueSize => "currentQueueSize",
            InteractionClass::CustomerChangeQueue => "customerChangeQueue",
            InteractionClass::MoveCustomerToWindow => "moveCustomerToWindow",
            InteractionClass::AssignCustomerToWindow => "assignCustomerToWindow",
            InteractionClass::FreeWindow => "freeWindow",
        }
    }

    /// Ordered parameter names for this class. The wire contract all nodes
    /// agree on; parameter order is meaningful.
    pub fn parameters(&self) -> &'static [&'static str] {
        match self {
            InteractionClass::AddCustomer => &["customerId"],
            InteractionClass::AssignCustomerToQueue => &["customerId", "queueId"],
            InteractionClass::CurrentQueueSize => &["queueId", "size"],
            InteractionClass::CustomerChangeQueue => &["customerId", "queueId"],
            InteractionClass::MoveCustomerToWindow => &["windowId"],
            InteractionClass::AssignCustomerToWindow => &["customerId", "windowId"],
            InteractionClass::FreeWindow => &["windowId"],
        }
    }
}

/// Wire form of a single interaction: class identity, ordered parameter
/// name/payload pairs, an opaque sender tag, and the send timestamp the hub
/// stamps on it. Immutable once sent.
#[derive(Debug, Clone)]
pub struct RawInteraction {
    pub class: InteractionClass,
    pub params: Vec<(&'static str, Vec<u8>)>,
    pub tag: Vec<u8>,
    pub timestamp: Option<SimTime>,
}

/// A decoded interaction. One variant per class so dispatch is an exhaustive
/// `match` rather than a chain of handle comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    AddCustomer { customer_id: i32 },
    AssignCustomerToQueue { customer_id: i32, queue_id: i32 },
    CurrentQueueSize { queue_id: i32, size: i32 },
    CustomerChangeQueue { customer_id: i32, queue_id: i32 },
    MoveCustomerToWindow { window_id: i32 },
    AssignCustomerToWindow { customer_id: i32, window_id: i32 },
    FreeWindow { window_id: i32 },
}

impl Interaction {
    pub fn class(&self) -> InteractionClass {
        match self {
            Interaction::AddCustomer { .. } => InteractionClass::AddCustomer,
            Interaction::AssignCustomerToQueue { .. } => InteractionClass::AssignCustomerToQueue,
            Interaction::CurrentQueueSize { .. } => InteractionClass::CurrentQueueSize,
            Interaction::CustomerChangeQueue { .. } => InteractionClass::CustomerChangeQueue,
            Interaction::MoveCustomerToWindow { .. } => InteractionClass::MoveCustomerToWindow,
            Interaction::AssignCustomerToWindow { .. } => InteractionClass::AssignCustomerToWindow,
            Interaction::FreeWindow { .. } => InteractionClass::FreeWindow,
        }
    }

    /// Ordered parameter values, matching `class().parameters()` positionally.
    fn values(&self) -> Vec<i32> {
        match *self {
            Interaction::AddCustomer { customer_id } => vec![customer_id],
            Interaction::AssignCustomerToQueue {
                customer_id,
                queue_id,
            } => vec![customer_id, queue_id],
            Interaction::CurrentQueueSize { queue_id, size } => vec![queue_id, size],
            Interaction::CustomerChangeQueue {
                customer_id,
                queue_id,
            } => vec![customer_id, queue_id],
            Interaction::MoveCustomerToWindow { window_id } => vec![window_id],
            Interaction::AssignCustomerToWindow {
                customer_id,
                window_id,
            } => vec![customer_id, window_id],
            Interaction::FreeWindow { window_id } => vec![window_id],
        }
    }

    /// Encode into the wire form. The timestamp stays unset; the hub stamps
    /// it when the message is actually sent.
    pub fn encode(&self, tag: Vec<u8>) -> RawInteraction {
        let names = self.class().parameters();
        let params = names
            .iter()
            .zip(self.values())
            .map(|(name, value)| (*name, encode_i32(value)))
            .collect();
        RawInteraction {
            class: self.class(),
            params,
            tag,
            timestamp: None,
        }
    }

    /// Decode a raw message back into its typed form. A failure here is
    /// isolated to this one message; the caller logs and skips it.
    pub fn decode(raw: &RawInteraction) -> Result<Self, SimError> {
        let expected = raw.class.parameters();
        if raw.params.len() != expected.len() {
            return Err(SimError::Decode {
                class: raw.class,
                reason: format!(
                    "expected {} parameters, found {}",
                    expected.len(),
                    raw.params.len()
                ),
            });
        }
        let mut values = [0i32; 2];
        for (i, (name, bytes)) in raw.params.iter().enumerate() {
            values[i] = decode_i32(raw.class, name, bytes)?;
        }
        Ok(match raw.class {
            InteractionClass::AddCustomer => Interaction::AddCustomer {
                customer_id: values[0],
            },
            InteractionClass::AssignCustomerToQueue => Interaction::AssignCustomerToQueue {
                customer_id: values[0],
                queue_id: values[1],
            },
            InteractionClass::CurrentQueueSize => Interaction::CurrentQueueSize {
                queue_id: values[0],
                size: values[1],
            },
            InteractionClass::CustomerChangeQueue => Interaction::CustomerChangeQueue {
                customer_id: values[0],
                queue_id: values[1],
            },
            InteractionClass::MoveCustomerToWindow => Interaction::MoveCustomerToWindow {
                window_id: values[0],
            },
            InteractionClass::AssignCustomerToWindow => Interaction::AssignCustomerToWindow {
                customer_id: values[0],
                window_id: values[1],
            },
            InteractionClass::FreeWindow => Interaction::FreeWindow {
                window_id: values[0],
            },
        })
    }
}

/// 32-bit big-endian integer encoding, the one primitive the schema needs.
fn encode_i32(value: i32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

fn decode_i32(class: InteractionClass, name: &str, bytes: &[u8]) -> Result<i32, SimError> {
    let arr: [u8; 4] = bytes.try_into().map_err(|_| SimError::Decode {
        class,
        reason: format!("parameter `{name}` has {} bytes, expected 4", bytes.len()),
    })?;
    Ok(i32::from_be_bytes(arr))
}
