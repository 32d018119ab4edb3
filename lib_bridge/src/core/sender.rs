use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::SinkExt;

use crate::core::connection::Connection;
use crate::core::error::SendFailure;
use crate::core::pool::Frame;

/// Writes one text frame to one connection, bounded by the send timeout.
///
/// Exactly one write attempt per call; retry policy belongs to the caller and
/// this bridge specifies none. The timeout covers sink lock acquisition as
/// well as the write itself, so a worker is never parked on a single
/// connection for longer than the configured bound.
#[derive(Clone)]
pub struct FrameSender {
    timeout: Duration,
}

impl FrameSender {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn send(&self, connection: &Connection, frame: &Frame) -> Result<(), SendFailure> {
        // A connection removed from the registry after the snapshot was taken
        // fails here, cleanly, before touching the transport.
        if !connection.is_open() {
            return Err(SendFailure::TransportClosed);
        }

        let write = async {
            let mut sink = connection.sink().lock().await;
            sink.send(Message::Text(frame.text().clone())).await
        };

        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SendFailure::Io(e.to_string())),
            Err(_) => Err(SendFailure::Timeout),
        }
    }
}
