//! Teller queues and the hall that holds them. Customers flow in at the
//! tail, out at the head, and occasionally sideways: on a fixed interval
//! the hall picks a random customer and moves it to the other queue, but
//! only when that queue is strictly shorter. Conservation holds across
//! every operation: no customer is duplicated or dropped.

use std::collections::VecDeque;

use rand::Rng;

use crate::SimError;

#[derive(Debug, Clone, Default)]
pub struct TellerQueue {
    customers: VecDeque<i32>,
}

impl TellerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, customer_id: i32) {
        self.customers.push_back(customer_id);
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    pub fn contains(&self, customer_id: i32) -> bool {
        self.customers.contains(&customer_id)
    }

    pub fn dequeue_front(&mut self) -> Option<i32> {
        self.customers.pop_front()
    }

    fn remove_at(&mut self, index: usize) -> Option<i32> {
        self.customers.remove(index)
    }
}

/// A move produced by one rebalance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub customer_id: i32,
    pub to_queue: u32,
}

/// The pair of queues one branch runs. Queue ids are 0 and 1 throughout
/// the wire schema.
#[derive(Debug, Clone, Default)]
pub struct QueueHall {
    queues: [TellerQueue; 2],
}

impl QueueHall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, queue_id: u32) -> &TellerQueue {
        &self.queues[queue_id as usize]
    }

    pub fn total(&self) -> usize {
        self.queues[0].len() + self.queues[1].len()
    }

    /// New arrivals join the shorter queue, queue 0 on a tie.
    pub fn assign_to_shorter(&mut self, customer_id: i32) -> u32 {
        let queue_id = if self.queues[1].len() < self.queues[0].len() {
            1
        } else {
            0
        };
        self.queues[queue_id as usize].assign(customer_id);
        queue_id as u32
    }

    /// Head of the longer queue, ties going to queue 0.
    pub fn dequeue_longest(&mut self) -> Result<(i32, u32), SimError> {
        let queue_id = if self.queues[1].len() > self.queues[0].len() {
            1u32
        } else {
            0u32
        };
        match self.queues[queue_id as usize].dequeue_front() {
            Some(customer_id) => Ok((customer_id, queue_id)),
            None => Err(SimError::EmptyQueue(queue_id)),
        }
    }

    /// One randomized pass: pick a queue, pick one of its customers, and
    /// move it only if the other queue is strictly shorter. Returns the
    /// move when one happened.
    pub fn rebalance<R: Rng>(&mut self, rng: &mut R) -> Option<Relocation> {
        let from = rng.gen_range(0..2usize);
        let to = 1 - from;
        if self.queues[from].is_empty() || self.queues[to].len() >= self.queues[from].len() {
            return None;
        }
        let index = rng.gen_range(0..self.queues[from].len());
        let customer_id = self.queues[from].remove_at(index)?;
        self.queues[to].assign(customer_id);
        Some(Relocation {
            customer_id,
            to_queue: to as u32,
        })
    }
}
