use crate::error::SatelliteResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Datagram ids cycle through the 16-bit space.
pub type DatagramId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatagramType {
    /// SOS and other emergency traffic, always dispatched first.
    Emergency,
    /// Location sharing and any other regular traffic.
    NonEmergency,
}

impl DatagramType {
    pub fn is_emergency(self) -> bool {
        matches!(self, DatagramType::Emergency)
    }
}

/// Payload as handed in by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatelliteDatagram {
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub datagram_type: DatagramType,
    /// Whether the pointing UI should take the full screen while sending.
    #[serde(default)]
    pub wants_full_screen_ui: bool,
}

impl SatelliteDatagram {
    pub fn new(payload: impl Into<Vec<u8>>, datagram_type: DatagramType) -> Self {
        Self {
            payload: payload.into(),
            datagram_type,
            wants_full_screen_ui: false,
        }
    }

    pub fn emergency(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(payload, DatagramType::Emergency)
    }

    pub fn non_emergency(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(payload, DatagramType::NonEmergency)
    }
}

/// Invoked exactly once when the datagram completes, fails or is aborted.
pub type CompletionHandler = Box<dyn FnOnce(SatelliteResult) + Send>;

/// A datagram sitting in one of the dispatch queues.
pub struct PendingDatagram {
    pub id: DatagramId,
    pub datagram: SatelliteDatagram,
    pub enqueued_at: Instant,
    handler: Option<CompletionHandler>,
}

impl PendingDatagram {
    pub fn new(
        id: DatagramId,
        datagram: SatelliteDatagram,
        enqueued_at: Instant,
        handler: CompletionHandler,
    ) -> Self {
        Self {
            id,
            datagram,
            enqueued_at,
            handler: Some(handler),
        }
    }

    pub fn complete(mut self, result: SatelliteResult) {
        if let Some(handler) = self.handler.take() {
            handler(result);
        }
    }
}

impl fmt::Debug for PendingDatagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingDatagram")
            .field("id", &self.id)
            .field("type", &self.datagram.datagram_type)
            .field("len", &self.datagram.payload.len())
            .finish()
    }
}

/// Cyclic id counter. Ids still held by pending datagrams are skipped, so an
/// id is only handed out again once its previous holder has completed.
#[derive(Debug, Default)]
pub struct DatagramIdGenerator {
    next: DatagramId,
}

impl DatagramIdGenerator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Returns `None` only when every id in the space is in use.
    pub fn next_id(&mut self, in_use: impl Fn(DatagramId) -> bool) -> Option<DatagramId> {
        for _ in 0..=u32::from(DatagramId::MAX) {
            let candidate = self.next;
            self.next = self.next.wrapping_add(1);
            if !in_use(candidate) {
                return Some(candidate);
            }
        }
        None
    }

    pub fn peek(&self) -> DatagramId {
        self.next
    }
}
