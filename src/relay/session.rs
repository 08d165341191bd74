use futures::{Stream, StreamExt};
use uuid::Uuid;

use super::RelayKind;

/// One client connection bound to a container and relay kind.
///
/// Owns at most one upstream at a time. [`Session::release`] takes it out
/// and is a no-op once nothing is attached; dropping the session releases
/// whatever is still held, so every exit path of a handler lets go of the
/// engine stream.
pub struct Session<U> {
    id: Uuid,
    container_id: String,
    kind: RelayKind,
    upstream: Option<U>,
}

impl<U> Session<U> {
    pub fn new(container_id: &str, kind: RelayKind) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, container_id, %kind, "Session opened");
        Self {
            id,
            container_id: container_id.to_string(),
            kind,
            upstream: None,
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Bind a fresh upstream, releasing any previous one first.
    pub fn attach(&mut self, upstream: U) {
        drop(self.release());
        self.upstream = Some(upstream);
        tracing::debug!(session = %self.id, kind = %self.kind, "Upstream attached");
    }

    pub fn is_attached(&self) -> bool {
        self.upstream.is_some()
    }

    pub fn upstream(&mut self) -> Option<&mut U> {
        self.upstream.as_mut()
    }

    /// Detach the upstream. Returns it so callers needing an orderly
    /// shutdown can perform one; dropping the result releases it.
    pub fn release(&mut self) -> Option<U> {
        let upstream = self.upstream.take();
        if upstream.is_some() {
            tracing::debug!(
                session = %self.id,
                container_id = %self.container_id,
                kind = %self.kind,
                "Upstream released"
            );
        }
        upstream
    }
}

impl<U> Drop for Session<U> {
    fn drop(&mut self) {
        drop(self.release());
    }
}

/// Next item of an optional upstream; pends forever when nothing is attached
/// so a `select!` branch on it simply never fires.
pub async fn next_from<S>(upstream: Option<&mut S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match upstream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
