//! Image pull progress, relayed as a one-way frame sequence.

use std::collections::HashMap;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::docker::engine::{Engine, EngineResult, PullProgressEvent, PullStream};

/// One frame of a pull response.
#[derive(Debug, Clone, PartialEq)]
pub enum PullFrame {
    Progress(PullProgressEvent),
    /// Sent once after the last progress event of a successful pull.
    Complete,
    /// Terminal; the pull is not resumed.
    Failed(String),
}

impl Serialize for PullFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Progress(event) => event.serialize(serializer),
            Self::Complete => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("status", "complete")?;
                map.end()
            }
            Self::Failed(message) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", message)?;
                map.end()
            }
        }
    }
}

/// Latest progress per layer, in the order layers first appeared.
///
/// Events without a layer id (e.g. "Pulling from library/nginx") are kept as
/// separate entries.
#[derive(Debug, Default)]
pub struct PullProgressBoard {
    entries: Vec<PullProgressEvent>,
    by_layer: HashMap<String, usize>,
}

impl PullProgressBoard {
    pub fn apply(&mut self, event: &PullProgressEvent) {
        match &event.id {
            Some(id) => match self.by_layer.get(id) {
                Some(&slot) => self.entries[slot] = event.clone(),
                None => {
                    self.by_layer.insert(id.clone(), self.entries.len());
                    self.entries.push(event.clone());
                }
            },
            None => self.entries.push(event.clone()),
        }
    }

    pub fn entries(&self) -> &[PullProgressEvent] {
        &self.entries
    }

    /// Status of the most recent entry, e.g. "Status: Downloaded newer image".
    pub fn final_status(&self) -> Option<&str> {
        self.entries.last().map(|event| event.status.as_str())
    }

    /// Number of distinct layers seen.
    pub fn layers(&self) -> usize {
        self.by_layer.len()
    }
}

struct PullRelay {
    image: String,
    upstream: PullStream,
    board: PullProgressBoard,
    buffered: Option<Option<EngineResult<PullProgressEvent>>>,
    done: bool,
}

/// Start pulling `image` and return its frame sequence.
///
/// The first upstream item is awaited here so that a pull failing before any
/// progress can still be answered with a regular error response. Every later
/// failure becomes a [`PullFrame::Failed`] frame that ends the sequence.
pub async fn relay_pull<E: Engine + ?Sized>(
    engine: &E,
    image: &str,
) -> EngineResult<BoxStream<'static, PullFrame>> {
    let mut upstream = engine.pull_image(image);
    let first = match upstream.next().await {
        Some(Err(e)) => return Err(e),
        first => first,
    };

    tracing::info!(image, "Pull started");
    let relay = PullRelay {
        image: image.to_string(),
        upstream,
        board: PullProgressBoard::default(),
        buffered: Some(first),
        done: false,
    };

    Ok(stream::unfold(relay, |mut relay| async move {
        if relay.done {
            return None;
        }
        let item = match relay.buffered.take() {
            Some(item) => item,
            None => relay.upstream.next().await,
        };
        let frame = match item {
            Some(Ok(event)) => {
                relay.board.apply(&event);
                PullFrame::Progress(event)
            }
            Some(Err(e)) => {
                tracing::warn!(image = %relay.image, "Pull failed: {e}");
                relay.done = true;
                PullFrame::Failed(e.to_string())
            }
            None => {
                tracing::info!(
                    image = %relay.image,
                    layers = relay.board.layers(),
                    entries = relay.board.entries().len(),
                    status = relay.board.final_status().unwrap_or_default(),
                    "Pull complete"
                );
                relay.done = true;
                PullFrame::Complete
            }
        };
        Some((frame, relay))
    })
    .boxed())
}
