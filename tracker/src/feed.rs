//! The live position feed.

use anyhow::Result;
use futures::channel::mpsc;
use futures::stream::{BoxStream, Fuse, Stream, StreamExt};
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_tungstenite::tungstenite::Message;

use model::{LonLat, VehicleID};

/// One position report pushed by the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    #[serde(rename = "cid")]
    pub vehicle: VehicleID,
    pub ts: String,
    pub lon: f64,
    pub lat: f64,
}

impl LiveEvent {
    pub fn pos(&self) -> LonLat {
        LonLat::new(self.lon, self.lat)
    }
}

#[derive(Serialize)]
struct Subscribe<'a> {
    cultivator_ids: &'a [VehicleID],
}

/// A subscription to live positions, delivered in arrival order. It never ends on its own while
/// the source is alive; once it has ended, it stays ended. Reconnecting means building a new one.
pub struct LiveFeed {
    events: Fuse<BoxStream<'static, LiveEvent>>,
}

impl LiveFeed {
    pub fn from_stream<S: Stream<Item = LiveEvent> + Send + 'static>(events: S) -> Self {
        Self {
            events: events.boxed().fuse(),
        }
    }

    /// A feed fed by hand. It ends once every sender is dropped.
    pub fn channel() -> (mpsc::UnboundedSender<LiveEvent>, Self) {
        let (tx, rx) = mpsc::unbounded();
        (tx, Self::from_stream(rx))
    }

    /// One JSON event per line. Lines that don't parse are skipped.
    pub fn from_lines<R: AsyncBufRead + Unpin + Send + 'static>(reader: R) -> Self {
        let events = futures::stream::unfold(reader.lines(), |mut lines| async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(ev) = parse_line(&line) {
                            return Some((ev, lines));
                        }
                    }
                    Ok(None) => return None,
                    Err(err) => {
                        warn!("Live feed stopped: {}", err);
                        return None;
                    }
                }
            }
        });
        Self::from_stream(events)
    }

    /// Opens the backend's WebSocket (`ws://host/ws`) and subscribes to positions of these
    /// vehicles. Every text frame carries one event.
    pub async fn connect(url: &str, ids: &[VehicleID]) -> Result<Self> {
        let (mut socket, _) = tokio_tungstenite::connect_async(url).await?;
        socket.send(Message::Text(subscribe_message(ids)?)).await?;
        info!("Subscribed to live positions of {} vehicles at {}", ids.len(), url);

        let events = futures::stream::unfold(socket, |mut socket| async move {
            loop {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(ev) = parse_line(&text) {
                            return Some((ev, socket));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return None,
                    // Pings are answered by the socket itself
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("Live feed stopped: {}", err);
                        return None;
                    }
                }
            }
        });
        Ok(Self::from_stream(events))
    }

    pub async fn next_event(&mut self) -> Option<LiveEvent> {
        self.events.next().await
    }

    pub fn is_terminated(&self) -> bool {
        futures::stream::FusedStream::is_terminated(&self.events)
    }
}

fn subscribe_message(ids: &[VehicleID]) -> Result<String> {
    Ok(serde_json::to_string(&Subscribe {
        cultivator_ids: ids,
    })?)
}

fn parse_line(line: &str) -> Option<LiveEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(ev) => Some(ev),
        Err(err) => {
            warn!("Skipping malformed live event {:?}: {}", line, err);
            None
        }
    }
}
