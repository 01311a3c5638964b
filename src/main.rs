//! Demo binary for `wirehop`.
//!
//! `wirehop serve` answers every `ECHO` request with its own payload;
//! `wirehop call` sends one request and prints the response.

mod cli;

use std::{error::Error, time::Duration};

use async_trait::async_trait;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use wirehop::{
    Authenticator,
    ConnectionInfo,
    HandlerError,
    Message,
    SocketBuilder,
    hooks::hook,
};

use crate::cli::{Cli, Command};

/// Accepts peers presenting one fixed bearer token.
struct StaticToken(String);

#[async_trait]
impl Authenticator for StaticToken {
    async fn authenticate_jwt(&self, _info: &ConnectionInfo, token: &str) -> Result<(), HandlerError> {
        if token == self.0 {
            Ok(())
        } else {
            Err("invalid token".into())
        }
    }

    async fn authenticate_user_pass(
        &self,
        _info: &ConnectionInfo,
        _username: &str,
        _password: &str,
    ) -> Result<(), HandlerError> {
        Err("password login is disabled".into())
    }
}

fn builder(cli: &Cli) -> SocketBuilder { SocketBuilder::new().max_message_size(cli.max_message_size) }

async fn serve(
    cli: &Cli,
    listener: TcpListener,
    token: Option<String>,
    handshake_timeout: Duration,
) -> Result<(), Box<dyn Error>> {
    info!(addr = %listener.local_addr()?, "listening");
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        };
        let mut setup = builder(cli)
            .handshake_timeout(handshake_timeout)
            .hook(
                "ECHO",
                hook(|inbound| async move {
                    let request = inbound.message();
                    let echo = Message::new("ECHO", request.data.clone()).in_reply_to(request.id);
                    inbound.socket().send_message(echo).await?;
                    Ok(())
                }),
            );
        if let Some(token) = &token {
            setup = setup.authenticator(StaticToken(token.clone()));
        }
        tokio::spawn(async move {
            match setup.accept_tcp(stream).await {
                Ok(socket) => {
                    if let Err(e) = socket.wait().await {
                        warn!(%peer, error = %e, "connection ended with error");
                    }
                }
                Err(e) => warn!(%peer, error = %e, "connection refused"),
            }
        });
    }
}

async fn call(
    cli: &Cli,
    addr: std::net::SocketAddr,
    token: Option<String>,
    code: &str,
    payload: &str,
    timeout: Duration,
) -> Result<(), Box<dyn Error>> {
    let payload: serde_json::Value = serde_json::from_str(payload)?;
    let mut setup = builder(cli);
    if let Some(token) = token {
        setup = setup.jwt(token);
    }
    let socket = setup.connect(addr).await?;
    let response = socket.request(code, &payload, Some(timeout)).await?;
    println!("{} {}", response.code, String::from_utf8_lossy(&response.data));
    socket.close().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Serve {
            listen,
            token,
            handshake_timeout,
        } => {
            let listener = TcpListener::bind(listen).await?;
            serve(
                &cli,
                listener,
                token.clone(),
                Duration::from_secs(*handshake_timeout),
            )
            .await
        }
        Command::Call {
            addr,
            token,
            code,
            payload,
            timeout,
        } => {
            call(
                &cli,
                *addr,
                token.clone(),
                code,
                payload,
                Duration::from_secs(*timeout),
            )
            .await
        }
    }
}
