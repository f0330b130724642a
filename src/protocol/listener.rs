//! Listener registrations: the handler trait, category filters and handles.

use crate::core::types::CategoryId;
use crate::error::Result;
use crate::protocol::container::PacketContainer;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Code that observes or alters packets.
///
/// Handlers run synchronously on the transport's unit of work and must not block.
/// Returning `Err` (or panicking) counts as a failure of this listener only.
pub trait PacketListener: Send + Sync {
    fn on_packet(&self, packet: &mut PacketContainer) -> Result<()>;

    /// Name used in logs and failure reports
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> PacketListener for F
where
    F: Fn(&mut PacketContainer) -> Result<()> + Send + Sync,
{
    fn on_packet(&self, packet: &mut PacketContainer) -> Result<()> {
        self(packet)
    }

    fn name(&self) -> &str {
        "anonymous"
    }
}

/// A closure listener carrying a display name
pub struct NamedListener<F> {
    name: String,
    handler: F,
}

impl<F> NamedListener<F>
where
    F: Fn(&mut PacketContainer) -> Result<()> + Send + Sync,
{
    pub fn new<S: Into<String>>(name: S, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> PacketListener for NamedListener<F>
where
    F: Fn(&mut PacketContainer) -> Result<()> + Send + Sync,
{
    fn on_packet(&self, packet: &mut PacketContainer) -> Result<()> {
        (self.handler)(packet)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Identity of one registration; also its registration sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(pub(crate) u64);

impl ListenerHandle {
    pub fn sequence(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Which categories a listener wants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryFilter {
    /// Every category of the direction
    Any,
    Only(BTreeSet<CategoryId>),
}

impl CategoryFilter {
    pub fn only<I, C>(categories: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CategoryId>,
    {
        CategoryFilter::Only(categories.into_iter().map(Into::into).collect())
    }

    #[inline]
    pub fn matches(&self, category: CategoryId) -> bool {
        match self {
            CategoryFilter::Any => true,
            CategoryFilter::Only(set) => set.contains(&category),
        }
    }
}

impl From<CategoryId> for CategoryFilter {
    fn from(category: CategoryId) -> Self {
        CategoryFilter::Only(BTreeSet::from([category]))
    }
}

/// Per-listener counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListenerStats {
    pub invocations: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub total_time: Duration,
}

impl ListenerStats {
    /// Mean time per invocation
    pub fn average_time(&self) -> Duration {
        if self.invocations == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((self.total_time.as_nanos() / u128::from(self.invocations)) as u64)
        }
    }
}
