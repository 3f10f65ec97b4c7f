/// Connection probing against the monitored replica set member
pub mod mongodb;
pub mod retry;

use crate::config::Endpoint;
use async_trait::async_trait;
use std::fmt;
use std::io;
use thiserror::Error;

/// Client status reported for a successful connect
pub const STATUS_OK: i32 = 0;
/// Client status reported for any failed connect
pub const STATUS_ERROR: i32 = -1;

/// Classified result of one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    /// Could not create a socket
    NoSocket,
    /// connect() failed
    ConnectFailed,
    /// The address did not resolve
    AddressResolutionFailed,
    /// Connected, but the node is not a writable primary
    ConnectedButNotPrimary,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }

    /// Numeric classification code, in declaration order
    pub fn code(&self) -> u8 {
        match self {
            ProbeOutcome::Success => 0,
            ProbeOutcome::NoSocket => 1,
            ProbeOutcome::ConnectFailed => 2,
            ProbeOutcome::AddressResolutionFailed => 3,
            ProbeOutcome::ConnectedButNotPrimary => 4,
        }
    }

    /// Raw client status matching this outcome
    pub fn status(&self) -> i32 {
        if self.is_success() {
            STATUS_OK
        } else {
            STATUS_ERROR
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Success => write!(f, "CONN OK"),
            ProbeOutcome::NoSocket => write!(f, "NO SOCKET"),
            ProbeOutcome::ConnectFailed => write!(f, "CONN FAIL"),
            ProbeOutcome::AddressResolutionFailed => write!(f, "CON ADDR FAIL"),
            ProbeOutcome::ConnectedButNotPrimary => write!(f, "CONN NOT MASTER"),
        }
    }
}

/// Failure reported by a connector
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not create a socket: {0}")]
    NoSocket(#[source] io::Error),

    #[error("connect failed: {0}")]
    ConnectFailed(#[source] io::Error),

    #[error("address resolution failed: {0}")]
    AddressResolution(String),

    #[error("connected to a node that is not a writable primary")]
    NotPrimary,
}

impl ConnectError {
    pub fn outcome(&self) -> ProbeOutcome {
        match self {
            ConnectError::NoSocket(_) => ProbeOutcome::NoSocket,
            ConnectError::ConnectFailed(_) => ProbeOutcome::ConnectFailed,
            ConnectError::AddressResolution(_) => ProbeOutcome::AddressResolutionFailed,
            ConnectError::NotPrimary => ProbeOutcome::ConnectedButNotPrimary,
        }
    }
}

/// The external client capability the verifier drives
///
/// Implementations must not hold any resource once `connect` returns an
/// error, so that repeated attempts cannot leak handles.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Send;

    /// Perform one connection attempt
    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Connection, ConnectError>;

    /// Describe a live connection (used once to confirm reachability)
    fn describe(&self, connection: &Self::Connection) -> String;

    /// Release a live connection
    async fn release(&self, connection: Self::Connection);
}

/// Result of one probe: outcome, raw status, and the live connection on success
pub struct Probe<C> {
    pub outcome: ProbeOutcome,
    pub status: i32,
    pub error: Option<ConnectError>,
    pub connection: Option<C>,
}

impl<C> fmt::Debug for Probe<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("outcome", &self.outcome)
            .field("status", &self.status)
            .field("error", &self.error)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

/// Make exactly one connection attempt and classify it
pub async fn probe<K: Connector + ?Sized>(
    connector: &K,
    endpoint: &Endpoint,
) -> Probe<K::Connection> {
    match connector.connect(endpoint).await {
        Ok(connection) => Probe {
            outcome: ProbeOutcome::Success,
            status: STATUS_OK,
            error: None,
            connection: Some(connection),
        },
        Err(error) => {
            let outcome = error.outcome();
            log::debug!("Probe of {} failed: {}", endpoint, error);
            Probe {
                outcome,
                status: outcome.status(),
                error: Some(error),
                connection: None,
            }
        }
    }
}
