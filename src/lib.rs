//! # Satellite Session Core
//!
//! Session control for a device-side satellite modem: turning satellite mode
//! on and off, dispatching outgoing datagrams, and tracking the radio session
//! through its power, transfer and listening phases.
//!
//! ## Features
//!
//! - **Datagram dispatch**: emergency traffic first, one send in flight, cascading abort on failure
//! - **Session state machine**: listening window after each transfer, cellular co-existence control
//! - **Enablement orchestration**: request resolution, radio quiescence, persisted mode flag
//! - **Carrier attach restrictions**: per-subscription reasons driving the modem attach state
//! - **Async service**: single-task tokio actor with a cloneable handle
//!
//! ## Quick Start
//!
//! ```rust
//! use satsession::{RecordingTransport, SatelliteController, SessionConfig, TransportEvent};
//! use satsession::settings::InMemorySettings;
//!
//! let (transport, log) = RecordingTransport::new();
//! let mut controller = SatelliteController::new(
//!     SessionConfig::default(),
//!     Some(Box::new(transport)),
//!     Box::new(InMemorySettings::default()),
//! );
//! controller.on_transport_event(TransportEvent::ProvisionStateChanged(true));
//! controller.request_satellite_enabled(true, false, Box::new(|result: satsession::SatelliteResult| println!("{:?}", result)));
//! assert!(log.last_set_enabled().is_some());
//! ```
//!
//! ## Architecture
//!
//! - [`dispatcher`] - Two-priority outgoing datagram queue
//! - [`session`] - Session state machine and listening timer
//! - [`enablement`] - Enable/disable request orchestration
//! - [`transfer`] - Send and receive transfer state aggregation
//! - [`attach`] - Carrier satellite attach restrictions
//! - [`controller`] - Wires the components together on one event loop
//! - [`service`] - Tokio actor around the controller
//! - [`simulator`] - Simulated modem for demos and tests

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod attach;
pub mod config;
pub mod controller;
pub mod datagram;
pub mod dispatcher;
pub mod enablement;
pub mod error;
pub mod listener;
pub mod provision;
pub mod radio;
pub mod service;
pub mod session;
pub mod settings;
pub mod simulator;
pub mod transfer;
pub mod transport;

// Re-export main public types for convenience
pub use attach::{RestrictionReason, SubscriptionId};
pub use config::SessionConfig;
pub use controller::{SatelliteController, SessionSnapshot};
pub use datagram::{DatagramId, DatagramType, SatelliteDatagram};
pub use dispatcher::DatagramDispatcher;
pub use enablement::EnablementOrchestrator;
pub use error::{SatelliteError, SatelliteResult, ServiceError};
pub use radio::CoexistenceRadio;
pub use service::{SatelliteHandle, SatelliteService};
pub use session::{SessionState, SessionStateMachine};
pub use transfer::{TransferState, TransferStateAggregator};
pub use transport::{ModemCommand, ModemTransport, RecordingTransport, TransportEvent};
