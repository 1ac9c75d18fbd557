//! The client handle passed to every operation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::api::CloudApi;
use crate::config::DEFAULT_POLL_INTERVAL;
use crate::models::Id;

/// Shortest interval between two action polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Shared handle to the cloud API plus the settings operations need.
///
/// Cloning is cheap. Operations receive the handle explicitly; nothing in the
/// crate reaches for a process-wide client.
pub struct Client<C: ?Sized> {
    api: Arc<C>,
    poll_interval: Duration,
}

impl<C: CloudApi + ?Sized> Client<C> {
    /// Wrap an API implementation using the default poll interval.
    pub fn new(api: Arc<C>) -> Self {
        Self {
            api,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set how often action progress is polled. Raised to
    /// [`MIN_POLL_INTERVAL`] if shorter.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// The wrapped API.
    pub fn api(&self) -> &C {
        &self.api
    }

    /// A shared reference to the wrapped API.
    pub fn api_arc(&self) -> Arc<C> {
        Arc::clone(&self.api)
    }

    /// How often action progress is polled.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl<C: ?Sized> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            poll_interval: self.poll_interval,
        }
    }
}

impl<C: ?Sized> fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// The resource an action or retry belongs to, for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRef {
    /// Resource kind, e.g. `server`.
    pub kind: &'static str,
    /// Resource id.
    pub id: Id,
}

impl ResourceRef {
    /// A server.
    pub fn server(id: Id) -> Self {
        Self { kind: "server", id }
    }

    /// A volume.
    pub fn volume(id: Id) -> Self {
        Self { kind: "volume", id }
    }

    /// A load balancer.
    pub fn load_balancer(id: Id) -> Self {
        Self {
            kind: "load balancer",
            id,
        }
    }

    /// A network.
    pub fn network(id: Id) -> Self {
        Self { kind: "network", id }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.id)
    }
}
