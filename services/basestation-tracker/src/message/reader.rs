//! TCP reader for the BaseStation feed
//!
//! Connects to the feed, frames it into lines and forwards each line over a
//! channel. A read timeout drops the connection and reconnects; a failed
//! connect ends the reader with an error.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ReaderError;

/// Events delivered by the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Connected to the feed at the given address
    Connected(String),
    /// One non-empty line of the feed
    Line(String),
    /// Connection dropped, a reconnect follows unless cancelled
    Disconnected(String),
}

/// BaseStation feed reader
#[derive(Debug, Clone)]
pub struct MessageReader {
    host: String,
    port: u16,
    read_timeout: Duration,
}

impl MessageReader {
    pub fn new(host: &str, port: u16, read_timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            read_timeout,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Read the feed until cancelled or the event receiver goes away
    pub async fn run(
        self,
        events: UnboundedSender<ReaderEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ReaderError> {
        let address = self.address();

        loop {
            let stream = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = TcpStream::connect(&address) => result.map_err(|source| ReaderError::Connect {
                    address: address.clone(),
                    source,
                })?,
            };

            info!("Connected to {}", address);
            if events.send(ReaderEvent::Connected(address.clone())).is_err() {
                return Ok(());
            }

            let lines = LinesStream::new(BufReader::new(stream).lines()).timeout(self.read_timeout);
            tokio::pin!(lines);

            loop {
                let item = tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = events.send(ReaderEvent::Disconnected(address.clone()));
                        return Ok(());
                    }
                    item = lines.next() => item,
                };

                match item {
                    Some(Ok(Ok(line))) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if events.send(ReaderEvent::Line(line)).is_err() {
                            debug!("Line receiver closed, stopping reader");
                            return Ok(());
                        }
                    }
                    Some(Ok(Err(e))) => {
                        warn!("Read error on {}: {}", address, e);
                        break;
                    }
                    Some(Err(_)) => {
                        warn!(
                            "No data from {} for {}ms, reconnecting",
                            address,
                            self.read_timeout.as_millis()
                        );
                        break;
                    }
                    None => {
                        warn!("Connection to {} closed by remote", address);
                        break;
                    }
                }
            }

            if events.send(ReaderEvent::Disconnected(address.clone())).is_err() {
                return Ok(());
            }
        }
    }
}
