use crate::config::DispatcherConfig;
use crate::core::types::{CategoryId, Direction};
use crate::error::{constants, InterceptError, Result};
use crate::protocol::container::PacketContainer;
use crate::protocol::listener::{CategoryFilter, ListenerHandle, ListenerStats, PacketListener};
use crate::protocol::priority::{CancellationPolicy, ListenerPriority};
use crate::utils::metrics::Metrics;
use crate::utils::reporter::{ErrorReporter, ListenerFailure, TracingReporter};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace};

/// One registered listener plus its bookkeeping
struct ListenerSlot {
    handle: ListenerHandle,
    direction: Direction,
    filter: CategoryFilter,
    priority: ListenerPriority,
    name: String,
    listener: Box<dyn PacketListener>,
    consecutive_failures: AtomicU32,
    invocations: AtomicU64,
    failures: AtomicU64,
    total_nanos: AtomicU64,
    /// Set once the listener was auto-deregistered; it is never invoked again
    retired: AtomicBool,
}

impl ListenerSlot {
    fn stats(&self) -> ListenerStats {
        ListenerStats {
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            total_time: Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Immutable chain of one direction, pre-split per category
#[derive(Default)]
struct ListenerChain {
    /// Every slot, in dispatch order
    all: Vec<Arc<ListenerSlot>>,
    /// Slots that accept any category
    wildcard: Vec<Arc<ListenerSlot>>,
    /// Wildcard slots merged with the slots naming the category
    by_category: HashMap<CategoryId, Vec<Arc<ListenerSlot>>>,
}

impl ListenerChain {
    fn build(mut all: Vec<Arc<ListenerSlot>>) -> Self {
        all.sort_by_key(|slot| (slot.priority.rank(), slot.handle));

        let wildcard = all
            .iter()
            .filter(|slot| slot.filter == CategoryFilter::Any)
            .cloned()
            .collect();

        let categories: BTreeSet<CategoryId> = all
            .iter()
            .filter_map(|slot| match &slot.filter {
                CategoryFilter::Only(set) => Some(set.iter().copied()),
                CategoryFilter::Any => None,
            })
            .flatten()
            .collect();

        let by_category = categories
            .into_iter()
            .map(|category| {
                let slots = all
                    .iter()
                    .filter(|slot| slot.filter.matches(category))
                    .cloned()
                    .collect();
                (category, slots)
            })
            .collect();

        Self {
            all,
            wildcard,
            by_category,
        }
    }

    #[inline]
    fn for_category(&self, category: CategoryId) -> &[Arc<ListenerSlot>] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(self.wildcard.as_slice())
    }
}

/// Progress of one dispatch pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Entered,
    RunningBand(ListenerPriority),
    Completed,
    /// A non-monitor listener cancelled and the remaining non-monitor listeners were skipped
    ShortCircuited,
}

/// Outcome of [`ListenerDispatcher::dispatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub state: PassState,
    pub invoked: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    /// Listeners deregistered during this pass after too many failures
    pub removed: Vec<ListenerHandle>,
}

/// Priority-ordered listener chains for both directions.
///
/// Chains are published through [`ArcSwap`]: a pass works on the snapshot it loaded, so
/// registrations and deregistrations (including those made by a running listener) only
/// affect passes that start afterwards.
pub struct ListenerDispatcher {
    chains: [ArcSwap<ListenerChain>; 2],
    write_lock: Mutex<()>,
    next_handle: AtomicU64,
    config: DispatcherConfig,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Arc<Metrics>,
}

impl Default for ListenerDispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl ListenerDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            chains: [
                ArcSwap::from_pointee(ListenerChain::default()),
                ArcSwap::from_pointee(ListenerChain::default()),
            ],
            write_lock: Mutex::new(()),
            next_handle: AtomicU64::new(1),
            config,
            reporter: Arc::new(TracingReporter),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Route listener failures to `reporter` instead of the log
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn cancellation_policy(&self) -> CancellationPolicy {
        self.config.cancellation_policy
    }

    /// Add a listener; it takes part in every pass that starts after this call returns
    #[instrument(skip(self, filter, listener), fields(listener = listener.name()))]
    pub fn register<L>(
        &self,
        direction: Direction,
        filter: CategoryFilter,
        priority: ListenerPriority,
        listener: L,
    ) -> ListenerHandle
    where
        L: PacketListener + 'static,
    {
        let _guard = self.write_lock.lock();
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(ListenerSlot {
            handle,
            direction,
            filter,
            priority,
            name: listener.name().to_string(),
            listener: Box::new(listener),
            consecutive_failures: AtomicU32::new(0),
            invocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        });

        let chain = &self.chains[direction.index()];
        let mut slots = chain.load().all.clone();
        slots.push(slot);
        chain.store(Arc::new(ListenerChain::build(slots)));

        debug!(%handle, %direction, %priority, "Listener registered");
        handle
    }

    /// Remove a listener. Passes already running keep invoking it.
    pub fn unregister(&self, handle: ListenerHandle) -> bool {
        let _guard = self.write_lock.lock();
        self.remove_locked(handle)
    }

    fn remove_locked(&self, handle: ListenerHandle) -> bool {
        for chain in &self.chains {
            let current = chain.load();
            if current.all.iter().any(|slot| slot.handle == handle) {
                let slots = current
                    .all
                    .iter()
                    .filter(|slot| slot.handle != handle)
                    .cloned()
                    .collect();
                chain.store(Arc::new(ListenerChain::build(slots)));
                debug!(%handle, "Listener unregistered");
                return true;
            }
        }
        false
    }

    fn find(&self, handle: ListenerHandle) -> Option<Arc<ListenerSlot>> {
        self.chains.iter().find_map(|chain| {
            chain
                .load()
                .all
                .iter()
                .find(|slot| slot.handle == handle)
                .cloned()
        })
    }

    pub fn is_registered(&self, handle: ListenerHandle) -> bool {
        self.find(handle).is_some()
    }

    pub fn stats(&self, handle: ListenerHandle) -> Option<ListenerStats> {
        self.find(handle).map(|slot| slot.stats())
    }

    /// Registered listeners of one direction
    pub fn len(&self, direction: Direction) -> usize {
        self.chains[direction.index()].load().all.len()
    }

    pub fn is_empty(&self) -> bool {
        Direction::ALL.iter().all(|d| self.len(*d) == 0)
    }

    /// Whether any listener would see `category` in `direction`
    pub fn has_listeners(&self, direction: Direction, category: CategoryId) -> bool {
        !self.chains[direction.index()]
            .load()
            .for_category(category)
            .is_empty()
    }

    /// Run the chain of the container's direction against it.
    ///
    /// Listener failures never escape; they are reported and counted. The container is
    /// read-only exactly while monitor listeners run.
    pub fn dispatch(&self, container: &mut PacketContainer) -> DispatchReport {
        let direction = container.direction();
        let category = container.packet_type();
        let chain = self.chains[direction.index()].load_full();
        let short_circuit = self.config.cancellation_policy == CancellationPolicy::ShortCircuit;

        let mut state = PassState::Entered;
        let mut report = DispatchReport {
            state,
            invoked: 0,
            failed: 0,
            skipped: 0,
            cancelled: false,
            removed: Vec::new(),
        };
        let mut stopped = false;

        for slot in chain.for_category(category) {
            let monitor = slot.priority.is_monitor();
            if (stopped && !monitor) || slot.retired.load(Ordering::Acquire) {
                report.skipped += 1;
                continue;
            }
            if state != PassState::RunningBand(slot.priority) {
                state = PassState::RunningBand(slot.priority);
                trace!(connection = %container.connection(), band = %slot.priority, "Running band");
            }

            container.set_read_only(monitor);
            let outcome = self.invoke(slot, container);
            container.set_read_only(false);
            report.invoked += 1;

            if let Err(error) = outcome {
                report.failed += 1;
                if self.record_failure(slot, container, error) {
                    report.removed.push(slot.handle);
                }
            } else {
                slot.consecutive_failures.store(0, Ordering::Relaxed);
            }

            if short_circuit && !monitor && container.is_cancelled() && !stopped {
                stopped = true;
                trace!(listener = %slot.handle, "Cancelled, skipping remaining non-monitor listeners");
            }
        }

        report.state = if stopped {
            PassState::ShortCircuited
        } else {
            PassState::Completed
        };
        report.cancelled = container.is_cancelled();
        report
    }

    fn invoke(&self, slot: &ListenerSlot, container: &mut PacketContainer) -> Result<()> {
        self.metrics.listener_invoked();
        let start = Instant::now();
        let result = if self.config.catch_panics {
            panic::catch_unwind(AssertUnwindSafe(|| slot.listener.on_packet(container)))
                .unwrap_or_else(|payload| Err(InterceptError::Listener(panic_message(&*payload))))
        } else {
            slot.listener.on_packet(container)
        };
        slot.invocations.fetch_add(1, Ordering::Relaxed);
        slot.total_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        result
    }

    /// Count, report and possibly retire a failing listener; true if it was removed
    fn record_failure(
        &self,
        slot: &ListenerSlot,
        container: &PacketContainer,
        error: InterceptError,
    ) -> bool {
        self.metrics.listener_failed();
        slot.failures.fetch_add(1, Ordering::Relaxed);
        let consecutive = slot.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

        let limit = self.config.max_consecutive_failures;
        let removed = limit > 0 && consecutive >= limit && self.retire(slot);

        self.reporter.report(&ListenerFailure {
            handle: slot.handle,
            listener: slot.name.clone(),
            connection: container.connection(),
            direction: slot.direction,
            category: container.packet_type(),
            error: error.to_string(),
            consecutive,
            removed,
        });
        removed
    }

    fn retire(&self, slot: &ListenerSlot) -> bool {
        if slot.retired.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _guard = self.write_lock.lock();
        self.remove_locked(slot.handle);
        self.metrics.listener_auto_removed();
        info!(listener = %slot.name, handle = %slot.handle, "Listener auto-deregistered");
        true
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string payload".to_string());
    format!("{}: {detail}", constants::ERR_LISTENER_PANICKED)
}
