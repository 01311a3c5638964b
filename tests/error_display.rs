//! Tests for Display implementations on error types.

use std::net::SocketAddr;

use wirehop::{
    SocketError,
    auth::AuthError,
    correlation::{CorrelationError, RequestError},
    envelope::ProtocolError,
};

#[test]
fn correlation_error_messages() {
    assert_eq!(
        CorrelationError::DuplicateId(4).to_string(),
        "request id 4 is already pending"
    );
    assert_eq!(
        CorrelationError::UnexpectedResponse(9).to_string(),
        "unexpected response: no pending request with id 9"
    );
    assert_eq!(
        RequestError::TimedOut { id: 2 }.to_string(),
        "request 2 timed out"
    );
}

#[test]
fn socket_error_wraps_its_sources() {
    let io = SocketError::from(std::io::Error::other("socket closed"));
    assert_eq!(io.to_string(), "transport error: socket closed");

    let auth = SocketError::from(AuthError::MissingCredentials);
    assert_eq!(
        auth.to_string(),
        "authentication failed: no usable credentials presented"
    );

    let proto = SocketError::from(ProtocolError::UnexpectedBinary);
    assert_eq!(
        proto.to_string(),
        "protocol error: expected a text unit, received binary"
    );

    let peer: SocketAddr = "10.0.0.1:9000".parse().expect("valid address");
    assert_eq!(
        SocketError::PeerRejected(peer).to_string(),
        "peer 10.0.0.1:9000 rejected by policy"
    );
}

#[test]
fn closed_errors_are_recognised() {
    assert!(SocketError::Closed.is_closed());
    assert!(SocketError::from(CorrelationError::ManagerStopped).is_closed());
    assert!(!SocketError::from(CorrelationError::DuplicateId(1)).is_closed());
}
