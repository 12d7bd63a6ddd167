//! Certificate watch-stream ingestion
//!
//! Long-polls the certificates watch endpoint and decodes the newline-framed
//! `{type, object}` envelopes. Any transport error, decode error or non-200
//! response closes the stream, reports on the error channel, sleeps and
//! reopens; the reopen loop is unbounded. Events and errors travel on
//! separate channels and are never conflated.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use super::client::{KubeClient, KubeError};
use super::resources::CertificateEvent;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 64;

/// Spawn the watcher. It reconnects forever and stops only when the event
/// receiver is dropped.
pub fn monitor_certificate_events(
    kube: &KubeClient,
) -> (mpsc::Receiver<CertificateEvent>, mpsc::Receiver<KubeError>) {
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (error_tx, error_rx) = mpsc::channel(CHANNEL_CAPACITY);

    // Long-poll connection: no overall request timeout, unlike the shared
    // cluster API client.
    let http = reqwest::Client::new();
    let url = kube.watch_url();

    tokio::spawn(async move {
        loop {
            match stream_events(&http, &url, &event_tx).await {
                // The consumer is gone; nothing left to feed.
                Ok(()) => return,
                Err(err) => {
                    if error_tx.send(err).await.is_err() {
                        return;
                    }
                }
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    });

    (event_rx, error_rx)
}

/// Run one watch connection until it fails. `Ok` means the event receiver
/// has been dropped.
async fn stream_events(
    http: &reqwest::Client,
    url: &str,
    events: &mpsc::Sender<CertificateEvent>,
) -> Result<(), KubeError> {
    let response = http.get(url).send().await?;
    if !response.status().is_success() {
        return Err(KubeError::UnexpectedStatus {
            operation: "watching certificates".to_string(),
            status: response.status(),
        });
    }
    debug!("certificate watch stream open");

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buffer.extend_from_slice(&chunk);

        while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
            let frame: Vec<u8> = buffer.drain(..=newline).collect();
            let frame = &frame[..frame.len() - 1];
            if frame.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }

            let event: CertificateEvent =
                serde_json::from_slice(frame).map_err(|e| KubeError::Decode {
                    what: "watch event".to_string(),
                    message: e.to_string(),
                })?;
            if events.send(event).await.is_err() {
                return Ok(());
            }
        }
    }

    Err(KubeError::Decode {
        what: "watch stream".to_string(),
        message: "stream ended".to_string(),
    })
}
