use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result codes reported by the modem, the dispatch queue and the
/// enablement orchestrator. `Success` is `Ok(())`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
pub enum SatelliteError {
    #[error("generic service error")]
    Generic,
    #[error("server error")]
    Server,
    #[error("modem error")]
    Modem,
    #[error("network error")]
    Network,
    #[error("invalid internal state")]
    InvalidInternalState,
    #[error("invalid modem state")]
    InvalidModemState,
    #[error("invalid arguments")]
    InvalidArguments,
    #[error("request failed")]
    RequestFailed,
    #[error("radio not available")]
    RadioNotAvailable,
    #[error("request not supported")]
    RequestNotSupported,
    #[error("no resources")]
    NoResources,
    #[error("service not provisioned")]
    NotProvisioned,
    #[error("service provision in progress")]
    ProvisionInProgress,
    #[error("request aborted")]
    RequestAborted,
    #[error("access barred")]
    AccessBarred,
    #[error("network timeout")]
    NetworkTimeout,
    #[error("not reachable")]
    NotReachable,
    #[error("not authorized")]
    NotAuthorized,
    #[error("request already in progress")]
    RequestInProgress,
}

impl SatelliteError {
    /// Stable numeric code for status reporting. Zero is reserved for success.
    pub fn code(self) -> u8 {
        match self {
            SatelliteError::Generic => 1,
            SatelliteError::Server => 2,
            SatelliteError::Modem => 3,
            SatelliteError::Network => 4,
            SatelliteError::InvalidInternalState => 5,
            SatelliteError::InvalidModemState => 6,
            SatelliteError::InvalidArguments => 7,
            SatelliteError::RequestFailed => 8,
            SatelliteError::RadioNotAvailable => 9,
            SatelliteError::RequestNotSupported => 10,
            SatelliteError::NoResources => 11,
            SatelliteError::NotProvisioned => 12,
            SatelliteError::ProvisionInProgress => 13,
            SatelliteError::RequestAborted => 14,
            SatelliteError::AccessBarred => 15,
            SatelliteError::NetworkTimeout => 16,
            SatelliteError::NotReachable => 17,
            SatelliteError::NotAuthorized => 18,
            SatelliteError::RequestInProgress => 19,
        }
    }

    /// Inverse of [`SatelliteError::code`]; `0` maps to `Ok(())`.
    pub fn from_code(code: u8) -> Result<(), SatelliteError> {
        let err = match code {
            0 => return Ok(()),
            2 => SatelliteError::Server,
            3 => SatelliteError::Modem,
            4 => SatelliteError::Network,
            5 => SatelliteError::InvalidInternalState,
            6 => SatelliteError::InvalidModemState,
            7 => SatelliteError::InvalidArguments,
            8 => SatelliteError::RequestFailed,
            9 => SatelliteError::RadioNotAvailable,
            10 => SatelliteError::RequestNotSupported,
            11 => SatelliteError::NoResources,
            12 => SatelliteError::NotProvisioned,
            13 => SatelliteError::ProvisionInProgress,
            14 => SatelliteError::RequestAborted,
            15 => SatelliteError::AccessBarred,
            16 => SatelliteError::NetworkTimeout,
            17 => SatelliteError::NotReachable,
            18 => SatelliteError::NotAuthorized,
            19 => SatelliteError::RequestInProgress,
            _ => SatelliteError::Generic,
        };
        Err(err)
    }
}

pub type SatelliteResult<T = ()> = Result<T, SatelliteError>;

/// Errors surfaced by the service wrapper and configuration loading.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("satellite service event loop has stopped")]
    ChannelClosed,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("settings store error: {0}")]
    Settings(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}
