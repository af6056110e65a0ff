use std::fmt;
use std::io;

pub type BoltResult<T> = Result<T, BoltError>;

/// Top level error space of the driver. Transport and protocol errors are
/// terminal for the connection that raised them; server failures are
/// recoverable through `RESET`.
#[derive(Debug, Clone, PartialEq)]
pub enum BoltError {
    Transport(TransportError),
    Protocol(ProtocolError),
    Pool(PoolError),
    Address(AddressError),
    Routing(RoutingError),
    /// Failure reported by the server, carried verbatim from the FAILURE
    /// summary metadata.
    Server { code: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportError {
    PermissionDenied,
    ConnectionRefused,
    ConnectionReset,
    Interrupted,
    NetworkUnreachable,
    TimedOut,
    Tls,
    EndOfTransmission,
    Io(io::ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProtocolError {
    /// Unexpected marker, signature or message shape.
    Violation,
    /// The value or message cannot be expressed in the negotiated version.
    UnsupportedType,
    UnexpectedMarker(u8),
    /// Read past the end of buffered data.
    Underflow,
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoolError {
    Full,
    AcquisitionTimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AddressError {
    NameNotResolved,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoutingError {
    UnableToRetrieveRoutingTable,
    NoServersToSelect,
    UnableToRefreshRoutingTable,
    UnexpectedDiscoveryResponse,
}

impl BoltError {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            BoltError::Transport(TransportError::PermissionDenied) => "TRANSPORT_PERMISSION_DENIED",
            BoltError::Transport(TransportError::ConnectionRefused) => "TRANSPORT_CONNECTION_REFUSED",
            BoltError::Transport(TransportError::ConnectionReset) => "TRANSPORT_CONNECTION_RESET",
            BoltError::Transport(TransportError::Interrupted) => "TRANSPORT_INTERRUPTED",
            BoltError::Transport(TransportError::NetworkUnreachable) => "TRANSPORT_NETWORK_UNREACHABLE",
            BoltError::Transport(TransportError::TimedOut) => "TRANSPORT_TIMED_OUT",
            BoltError::Transport(TransportError::Tls) => "TRANSPORT_TLS_ERROR",
            BoltError::Transport(TransportError::EndOfTransmission) => "TRANSPORT_END_OF_TRANSMISSION",
            BoltError::Transport(TransportError::Io(_)) => "TRANSPORT_IO_ERROR",
            BoltError::Protocol(ProtocolError::Violation) => "PROTOCOL_VIOLATION",
            BoltError::Protocol(ProtocolError::UnsupportedType) => "PROTOCOL_UNSUPPORTED_TYPE",
            BoltError::Protocol(ProtocolError::UnexpectedMarker(_)) => "PROTOCOL_UNEXPECTED_MARKER",
            BoltError::Protocol(ProtocolError::Underflow) => "PROTOCOL_UNDERFLOW",
            BoltError::Protocol(ProtocolError::UnsupportedVersion(_)) => "PROTOCOL_UNSUPPORTED_VERSION",
            BoltError::Pool(PoolError::Full) => "POOL_FULL",
            BoltError::Pool(PoolError::AcquisitionTimedOut) => "POOL_ACQUISITION_TIMED_OUT",
            BoltError::Address(AddressError::NameNotResolved) => "ADDRESS_NAME_NOT_RESOLVED",
            BoltError::Routing(RoutingError::UnableToRetrieveRoutingTable) => {
                "ROUTING_UNABLE_TO_RETRIEVE_ROUTING_TABLE"
            }
            BoltError::Routing(RoutingError::NoServersToSelect) => "ROUTING_NO_SERVERS_TO_SELECT",
            BoltError::Routing(RoutingError::UnableToRefreshRoutingTable) => {
                "ROUTING_UNABLE_TO_REFRESH_ROUTING_TABLE"
            }
            BoltError::Routing(RoutingError::UnexpectedDiscoveryResponse) => {
                "ROUTING_UNEXPECTED_DISCOVERY_RESPONSE"
            }
            BoltError::Server { .. } => "SERVER_FAILURE",
        }
    }

    /// True for errors that render the connection unusable.
    #[inline]
    pub fn is_fatal_for_connection(&self) -> bool {
        match self {
            BoltError::Transport(_) | BoltError::Protocol(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BoltError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BoltError::Server { code, message } => write!(f, "{}: {}", code, message),
            BoltError::Protocol(ProtocolError::UnexpectedMarker(marker)) => {
                write!(f, "{} (0x{:02X})", self.code(), marker)
            }
            BoltError::Protocol(ProtocolError::UnsupportedVersion(version)) => {
                write!(f, "{} ({})", self.code(), version)
            }
            BoltError::Transport(TransportError::Io(kind)) => {
                write!(f, "{} ({:?})", self.code(), kind)
            }
            _ => f.write_str(self.code()),
        }
    }
}

impl std::error::Error for BoltError {}

impl From<io::Error> for BoltError {
    #[inline]
    fn from(error: io::Error) -> Self {
        BoltError::Transport(match error.kind() {
            io::ErrorKind::PermissionDenied => TransportError::PermissionDenied,
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => {
                TransportError::ConnectionReset
            }
            io::ErrorKind::Interrupted => TransportError::Interrupted,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::TimedOut,
            io::ErrorKind::UnexpectedEof => TransportError::EndOfTransmission,
            kind => TransportError::Io(kind),
        })
    }
}

impl From<TransportError> for BoltError {
    #[inline]
    fn from(error: TransportError) -> Self {
        BoltError::Transport(error)
    }
}

impl From<ProtocolError> for BoltError {
    #[inline]
    fn from(error: ProtocolError) -> Self {
        BoltError::Protocol(error)
    }
}

impl From<PoolError> for BoltError {
    #[inline]
    fn from(error: PoolError) -> Self {
        BoltError::Pool(error)
    }
}

impl From<AddressError> for BoltError {
    #[inline]
    fn from(error: AddressError) -> Self {
        BoltError::Address(error)
    }
}

impl From<RoutingError> for BoltError {
    #[inline]
    fn from(error: RoutingError) -> Self {
        BoltError::Routing(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let err: BoltError = io::Error::from(io::ErrorKind::ConnectionRefused).into();
        assert_eq!(err, BoltError::Transport(TransportError::ConnectionRefused));

        let err: BoltError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert_eq!(err, BoltError::Transport(TransportError::TimedOut));

        let err: BoltError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert_eq!(err, BoltError::Transport(TransportError::EndOfTransmission));
    }

    #[test]
    fn test_fatality() {
        assert!(BoltError::Protocol(ProtocolError::Violation).is_fatal_for_connection());
        assert!(BoltError::Transport(TransportError::TimedOut).is_fatal_for_connection());
        assert!(!BoltError::Pool(PoolError::Full).is_fatal_for_connection());
        assert!(!BoltError::Server { code: "x".into(), message: "y".into() }.is_fatal_for_connection());
    }

    #[test]
    fn test_stable_codes() {
        assert_eq!(BoltError::Pool(PoolError::Full).code(), "POOL_FULL");
        assert_eq!(
            BoltError::Routing(RoutingError::UnableToRetrieveRoutingTable).code(),
            "ROUTING_UNABLE_TO_RETRIEVE_ROUTING_TABLE"
        );
        assert_eq!(
            format!("{}", BoltError::Protocol(ProtocolError::UnexpectedMarker(0xC7))),
            "PROTOCOL_UNEXPECTED_MARKER (0xC7)"
        );
    }
}
