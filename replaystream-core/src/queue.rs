//! Single-flight FIFO request queue
//!
//! At most one operation is in flight. Completions identify themselves with
//! the ticket they were started with; a completion whose ticket does not
//! match the in-flight slot belongs to a cancelled request and is ignored.

use std::collections::VecDeque;

use tokio::task::JoinHandle;

use crate::request::{Operation, RequestKind};

/// Identifies one dispatch of an operation.
pub type Ticket = u64;

#[derive(Debug)]
struct InFlight {
    ticket: Ticket,
    op: Operation,
    task: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: VecDeque<Operation>,
    in_flight: Option<InFlight>,
    next_ticket: Ticket,
}

impl RequestQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, op: Operation) {
        tracing::trace!(kind = %op.kind(), depth = self.pending.len(), "request queued");
        self.pending.push_back(op);
    }

    pub fn dequeue(&mut self) -> Option<Operation> {
        self.pending.pop_front()
    }

    /// Put an operation back at the head, ahead of everything else.
    pub fn push_front(&mut self, op: Operation) {
        self.pending.push_front(op);
    }

    /// Occupy the in-flight slot and hand out the ticket for it.
    ///
    /// # Panics
    ///
    /// Panics if another request is already in flight.
    pub fn begin(&mut self, op: Operation) -> Ticket {
        assert!(
            self.in_flight.is_none(),
            "{} started while {} is in flight",
            op.kind(),
            self.in_flight_kind().map_or("nothing", RequestKind::as_str)
        );
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.in_flight = Some(InFlight {
            ticket,
            op,
            task: None,
        });
        ticket
    }

    /// Attach the task running the in-flight request so it can be aborted.
    pub fn attach(&mut self, ticket: Ticket, task: JoinHandle<()>) {
        match &mut self.in_flight {
            Some(slot) if slot.ticket == ticket => slot.task = Some(task),
            _ => task.abort(),
        }
    }

    /// Release the in-flight slot if `ticket` owns it.
    pub fn finish(&mut self, ticket: Ticket) -> Option<Operation> {
        if self.in_flight.as_ref().map(|slot| slot.ticket) != Some(ticket) {
            return None;
        }
        self.in_flight.take().map(|slot| slot.op)
    }

    /// Abort the in-flight request and drop every pending one.
    ///
    /// The dropped operations are returned so their deferred results can be
    /// resolved; none of them is executed.
    pub fn cancel_all(&mut self) -> Vec<Operation> {
        let mut dropped = Vec::with_capacity(self.pending.len() + 1);
        if let Some(slot) = self.in_flight.take() {
            if let Some(task) = slot.task {
                task.abort();
            }
            dropped.push(slot.op);
        }
        dropped.extend(self.pending.drain(..));
        dropped
    }

    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    #[must_use]
    pub fn in_flight_kind(&self) -> Option<RequestKind> {
        self.in_flight.as_ref().map(|slot| slot.op.kind())
    }

    /// `true` while anything is in flight or waiting.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.is_in_flight() || !self.pending.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_kinds(&self) -> impl Iterator<Item = RequestKind> + '_ {
        self.pending.iter().map(Operation::kind)
    }
}
