use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use trader_core::{ExchangeError, ExchangeResult};

/// Handle to a running WebSocket stream.
///
/// Dropping the handle stops the stream.
pub struct StreamHandle {
    stop: oneshot::Sender<()>,
    done: JoinHandle<()>,
}

impl StreamHandle {
    /// Let the stream run for `duration`, then stop it and wait for closure.
    /// Returns early if the server closes the stream first.
    pub async fn run_for(self, duration: Duration) {
        let StreamHandle { stop, mut done } = self;
        let closed_early = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = &mut done => true,
        };
        if closed_early {
            debug!("Stream closed before the sampling window ended");
            return;
        }
        let _ = stop.send(());
        let _ = done.await;
    }
}

/// Connect to `url` and feed every decoded JSON frame to `handler`.
///
/// Frames that fail to decode and transport errors go to `on_error`;
/// a transport error ends the stream.
pub async fn serve<E, H, F>(
    url: &str,
    mut handler: H,
    mut on_error: F,
) -> ExchangeResult<StreamHandle>
where
    E: DeserializeOwned + Send + 'static,
    H: FnMut(E) + Send + 'static,
    F: FnMut(ExchangeError) + Send + 'static,
{
    let (ws, _) = connect_async(url).await.map_err(|e| {
        ExchangeError::ConnectionFailed(format!("WebSocket connect to {}: {}", url, e))
    })?;
    info!(url = %url, "Stream connected");

    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let (mut write, mut read) = ws.split();
    let url = url.to_string();

    let done = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<E>(&text) {
                        Ok(event) => handler(event),
                        Err(e) => {
                            on_error(ExchangeError::ParseError(format!("stream frame: {}", e)))
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        on_error(ExchangeError::Stream(e.to_string()));
                        break;
                    }
                }
            }
        }
        info!(url = %url, "Stream closed");
    });

    Ok(StreamHandle {
        stop: stop_tx,
        done,
    })
}

/// Stream events into `handler` for a fixed duration, then close the stream.
pub async fn watch_for<E, H>(url: &str, duration: Duration, handler: H) -> ExchangeResult<()>
where
    E: DeserializeOwned + Send + 'static,
    H: FnMut(E) + Send + 'static,
{
    let handle = serve(url, handler, |err| warn!(error = %err, "Stream error")).await?;
    handle.run_for(duration).await;
    Ok(())
}

/// Collect the events of a stream for a fixed duration.
pub async fn collect_for<E>(url: &str, duration: Duration) -> ExchangeResult<Vec<E>>
where
    E: DeserializeOwned + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    watch_for(url, duration, move |event: E| {
        let _ = tx.send(event);
    })
    .await?;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    Ok(events)
}
