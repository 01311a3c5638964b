//! Utilities for exercising [`wirehop`] sockets with in-memory transports.
//!
//! [`socket_pair`] connects a [`Socket`](wirehop::Socket) to a [`RawPeer`]
//! over a `tokio::io::duplex` stream so tests can script the remote side unit
//! by unit. [`connected_pair`] joins two real sockets.
//!
//! ```rust
//! use wirehop::SocketBuilder;
//! use wirehop_testing::socket_pair;
//!
//! # async fn example() {
//! let (socket, mut peer) = socket_pair(SocketBuilder::new()).await.expect("pair");
//! socket.send("HELLO", &()).await.expect("send");
//! assert_eq!(peer.next_message().await.code, "HELLO");
//! # }
//! ```

pub mod logging;
pub mod peer;

pub use logging::{LoggerHandle, logger};
pub use peer::{RawPeer, connected_pair, socket_pair};

/// Result type for fallible tests.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
