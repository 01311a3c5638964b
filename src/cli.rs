//! Command line interface for the `wirehop` demo binary.
//!
//! `serve` runs an echo peer and `call` sends one request to it.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};

/// Command line arguments for the `wirehop` binary.
#[derive(Debug, Parser)]
#[command(name = "wirehop", version, about = "Correlated request/response demo")]
pub struct Cli {
    /// Largest inbound message accepted, in bytes.
    #[arg(long, global = true, default_value_t = 1024 * 1024)]
    pub max_message_size: usize,
    /// Action to perform.
    #[command(subcommand)]
    pub command: Command,
}

/// Demo actions.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept connections and echo every message back as a response.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:7878")]
        listen: SocketAddr,
        /// Require peers to present this bearer token.
        #[arg(long)]
        token: Option<String>,
        /// Seconds to wait for a peer's credentials.
        #[arg(long, default_value_t = 5)]
        handshake_timeout: u64,
    },
    /// Send one request and print the response.
    Call {
        /// Address of the serving peer.
        #[arg(long, default_value = "127.0.0.1:7878")]
        addr: SocketAddr,
        /// Bearer token to present.
        #[arg(long)]
        token: Option<String>,
        /// Message code.
        code: String,
        /// JSON payload.
        #[arg(default_value = "null")]
        payload: String,
        /// Seconds to wait for the response; zero waits indefinitely.
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn parses_call_arguments() {
        let cli = Cli::parse_from(["wirehop", "call", "--token", "t", "ECHO", r#"{"n":1}"#]);
        let Command::Call {
            code,
            payload,
            token,
            timeout,
            ..
        } = cli.command
        else {
            panic!("expected call subcommand");
        };
        assert_eq!(code, "ECHO");
        assert_eq!(payload, r#"{"n":1}"#);
        assert_eq!(token.as_deref(), Some("t"));
        assert_eq!(timeout, 10);
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::parse_from(["wirehop", "serve"]);
        assert!(matches!(
            cli.command,
            Command::Serve { token: None, handshake_timeout: 5, .. }
        ));
        assert_eq!(cli.max_message_size, 1024 * 1024);
    }
}
