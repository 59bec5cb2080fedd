//! Outgoing datagram queue.
//!
//! Two FIFO queues, one per priority class, with at most one datagram in
//! flight to the modem. A datagram stays in its queue until the modem reports
//! the outcome. Any send failure aborts everything still pending.

use crate::datagram::{
    CompletionHandler, DatagramId, DatagramIdGenerator, DatagramType, PendingDatagram,
    SatelliteDatagram,
};
use crate::error::{SatelliteError, SatelliteResult};
use crate::transfer::TransferState;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, info, warn};

const MAX_DISPATCH_ACTIONS: usize = 4;

/// Work for the controller after a queue operation, in execution order.
/// Progress is reported before the submit it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAction {
    /// Hand the datagram with this id to the modem.
    Submit(DatagramId),
    /// Report send-side progress to the transfer state aggregator.
    ReportSend {
        state: TransferState,
        pending: u32,
        result: SatelliteResult,
    },
}

pub type DispatchActions = Vec<DispatchAction, MAX_DISPATCH_ACTIONS>;

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: DatagramId,
    started_at: Instant,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    pub total_enqueued: u32,
    pub total_sent: u32,
    pub total_failed: u32,
    pub total_aborted: u32,
    pub total_rejected: u32,
    pub last_send_latency_ms: u64,
}

#[derive(Debug)]
pub struct DatagramDispatcher {
    emergency: VecDeque<PendingDatagram>,
    non_emergency: VecDeque<PendingDatagram>,
    in_flight: Option<InFlight>,
    ids: DatagramIdGenerator,
    max_pending: usize,
    stats: DispatchStats,
}

fn push_action(actions: &mut DispatchActions, action: DispatchAction) {
    let pushed = actions.push(action);
    debug_assert!(pushed.is_ok(), "dispatch action buffer overflow");
}

impl DatagramDispatcher {
    pub fn new(max_pending: usize) -> Self {
        Self {
            emergency: VecDeque::new(),
            non_emergency: VecDeque::new(),
            in_flight: None,
            ids: DatagramIdGenerator::new(),
            max_pending,
            stats: DispatchStats::default(),
        }
    }

    /// Queue a datagram and start sending if the modem is free.
    ///
    /// Returns the assigned id, or `None` if the datagram was rejected. A
    /// rejected datagram has already been completed with `NoResources`.
    pub fn enqueue(
        &mut self,
        datagram: SatelliteDatagram,
        handler: CompletionHandler,
        now: Instant,
    ) -> (Option<DatagramId>, DispatchActions) {
        let mut actions = DispatchActions::new();

        if self.pending_count() >= self.max_pending {
            warn!(pending = self.pending_count(), "datagram queue full, rejecting");
            self.stats.total_rejected = self.stats.total_rejected.saturating_add(1);
            handler(Err(SatelliteError::NoResources));
            return (None, actions);
        }

        let emergency = &self.emergency;
        let non_emergency = &self.non_emergency;
        let Some(id) = self.ids.next_id(|candidate| {
            emergency.iter().chain(non_emergency.iter()).any(|p| p.id == candidate)
        }) else {
            warn!("datagram id space exhausted, rejecting");
            self.stats.total_rejected = self.stats.total_rejected.saturating_add(1);
            handler(Err(SatelliteError::NoResources));
            return (None, actions);
        };

        let datagram_type = datagram.datagram_type;
        let pending = PendingDatagram::new(id, datagram, now, handler);
        match datagram_type {
            DatagramType::Emergency => self.emergency.push_back(pending),
            DatagramType::NonEmergency => self.non_emergency.push_back(pending),
        }
        self.stats.total_enqueued = self.stats.total_enqueued.saturating_add(1);
        debug!(id, ?datagram_type, pending = self.pending_count(), "datagram queued");

        if self.in_flight.is_none() {
            self.dispatch_one(now, &mut actions);
        }
        (Some(id), actions)
    }

    /// Oldest emergency datagram first, then the oldest regular one.
    fn dispatch_one(&mut self, now: Instant, actions: &mut DispatchActions) {
        debug_assert!(self.in_flight.is_none(), "dispatch while a send is in flight");

        let next = self
            .emergency
            .front()
            .or_else(|| self.non_emergency.front())
            .map(|p| p.id);

        let Some(id) = next else {
            return;
        };

        self.in_flight = Some(InFlight { id, started_at: now });
        info!(id, pending = self.pending_count(), "dispatching datagram");
        push_action(
            actions,
            DispatchAction::ReportSend {
                state: TransferState::Sending,
                pending: self.pending_count() as u32,
                result: Ok(()),
            },
        );
        push_action(actions, DispatchAction::Submit(id));
    }

    /// Handle the modem's answer for the in-flight datagram.
    pub fn on_send_complete(
        &mut self,
        id: DatagramId,
        result: SatelliteResult,
        now: Instant,
    ) -> DispatchActions {
        let mut actions = DispatchActions::new();

        match self.in_flight {
            Some(in_flight) if in_flight.id == id => {
                self.stats.last_send_latency_ms =
                    now.saturating_duration_since(in_flight.started_at).as_millis() as u64;
            }
            _ => {
                warn!(id, in_flight = ?self.in_flight.map(|f| f.id), "completion for a datagram that is not in flight");
                return actions;
            }
        }
        self.in_flight = None;

        let Some(datagram) = self.remove(id) else {
            warn!(id, "in-flight datagram missing from queues");
            return actions;
        };

        match result {
            Ok(()) => {
                info!(id, latency_ms = self.stats.last_send_latency_ms, "datagram sent");
                self.stats.total_sent = self.stats.total_sent.saturating_add(1);
                datagram.complete(Ok(()));
                push_action(
                    &mut actions,
                    DispatchAction::ReportSend {
                        state: TransferState::SendSuccess,
                        pending: self.pending_count() as u32,
                        result: Ok(()),
                    },
                );
                if self.pending_count() > 0 {
                    self.dispatch_one(now, &mut actions);
                } else {
                    push_action(
                        &mut actions,
                        DispatchAction::ReportSend {
                            state: TransferState::Idle,
                            pending: 0,
                            result: Ok(()),
                        },
                    );
                }
            }
            Err(err) => {
                warn!(id, %err, pending = self.pending_count(), "datagram send failed, aborting pending datagrams");
                self.stats.total_failed = self.stats.total_failed.saturating_add(1);
                datagram.complete(Err(err));
                self.abort_pending();
                push_action(
                    &mut actions,
                    DispatchAction::ReportSend {
                        state: TransferState::SendFailed,
                        pending: 0,
                        result: Err(err),
                    },
                );
                push_action(
                    &mut actions,
                    DispatchAction::ReportSend {
                        state: TransferState::Idle,
                        pending: 0,
                        result: Ok(()),
                    },
                );
            }
        }
        actions
    }

    /// Drop everything, including the in-flight datagram, completing each with
    /// `reason`. Used when the modem goes away underneath the queue.
    pub fn abort_all(&mut self, reason: SatelliteError) -> DispatchActions {
        let mut actions = DispatchActions::new();
        if self.pending_count() == 0 {
            return actions;
        }
        info!(pending = self.pending_count(), %reason, "aborting all datagrams");
        self.in_flight = None;
        for datagram in self.emergency.drain(..).chain(self.non_emergency.drain(..)) {
            self.stats.total_aborted = self.stats.total_aborted.saturating_add(1);
            datagram.complete(Err(reason));
        }
        push_action(
            &mut actions,
            DispatchAction::ReportSend {
                state: TransferState::Idle,
                pending: 0,
                result: Ok(()),
            },
        );
        actions
    }

    fn abort_pending(&mut self) {
        for datagram in self.emergency.drain(..).chain(self.non_emergency.drain(..)) {
            debug!(id = datagram.id, "aborting datagram");
            self.stats.total_aborted = self.stats.total_aborted.saturating_add(1);
            datagram.complete(Err(SatelliteError::RequestAborted));
        }
    }

    fn remove(&mut self, id: DatagramId) -> Option<PendingDatagram> {
        for queue in [&mut self.emergency, &mut self.non_emergency] {
            if let Some(pos) = queue.iter().position(|p| p.id == id) {
                return queue.remove(pos);
            }
        }
        None
    }

    pub fn datagram(&self, id: DatagramId) -> Option<&SatelliteDatagram> {
        self.emergency
            .iter()
            .chain(self.non_emergency.iter())
            .find(|p| p.id == id)
            .map(|p| &p.datagram)
    }

    pub fn pending_count(&self) -> usize {
        self.emergency.len() + self.non_emergency.len()
    }

    pub fn emergency_pending(&self) -> usize {
        self.emergency.len()
    }

    pub fn non_emergency_pending(&self) -> usize {
        self.non_emergency.len()
    }

    pub fn in_flight(&self) -> Option<DatagramId> {
        self.in_flight.map(|f| f.id)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending_count() == 0
    }

    pub fn get_stats(&self) -> &DispatchStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> CompletionHandler {
        Box::new(|_| {})
    }

    #[test]
    fn test_in_flight_datagram_stays_queued_until_completion() {
        let mut dispatcher = DatagramDispatcher::new(8);
        let now = Instant::now();
        let (id, actions) = dispatcher.enqueue(SatelliteDatagram::non_emergency(vec![1]), noop(), now);
        let id = id.unwrap();
        assert_eq!(actions.last(), Some(&DispatchAction::Submit(id)));
        assert_eq!(dispatcher.in_flight(), Some(id));
        assert_eq!(dispatcher.pending_count(), 1);
        assert!(dispatcher.datagram(id).is_some());
    }

    #[test]
    fn test_stale_completion_ignored() {
        let mut dispatcher = DatagramDispatcher::new(8);
        let now = Instant::now();
        dispatcher.enqueue(SatelliteDatagram::emergency(vec![1]), noop(), now);
        let actions = dispatcher.on_send_complete(42, Ok(()), now);
        assert!(actions.is_empty());
        assert_eq!(dispatcher.in_flight(), Some(0));
    }
}
