//! The loader engine
//!
//! A [`Loader`] turns locators into decoded images for any number of
//! consumers. Misses for the same locator share one fetch; fetches are
//! admitted through a per-loader FIFO limiter and bounded by a timeout;
//! every consumer can withdraw its interest without disturbing the others.
//!
//! ## Flow
//!
//! 1. `load_image_for` checks the cache under the loader lock. A hit runs
//!    the completion on the caller's stack with [`LoadedLocation::Cache`].
//! 2. A miss registers with the pending request for the locator, creating
//!    and queueing one if needed.
//! 3. Admitted requests run fetch + decode on a tokio task, watched by a
//!    supervisor task that reports the result. The timeout covers the fetch.
//! 4. The result populates the cache (on success), the request is removed,
//!    and every remaining registration is notified once through the
//!    loader's [`Dispatcher`].
//!
//! Cancellation removes registrations synchronously and aborts the task of
//! a request nobody is waiting for. A result that arrives for a request
//! that no longer exists is dropped.

mod dispatch;
mod limiter;
mod tracker;
mod types;

pub use dispatch::{ChannelDispatcher, Delivery, DeliveryQueue, Dispatcher, InlineDispatcher};
pub use tracker::PendingInfo;
pub use types::{Completion, FailureKind, LoadError, LoadOutcome, LoadedLocation, TargetId};

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, ImageCache};
use crate::decode::{Decoder, ImageDecoder, SharedImage};
use crate::fetch::{Fetched, Fetcher};
use crate::locator::{Locator, SourceKind};
use crate::observability::{Metrics, MetricsSnapshot};
use tracker::{Registered, Registration, Tracker};

pub const DEFAULT_MAX_CONCURRENT_LOADS: usize = 5;
pub const DEFAULT_LOADING_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables applied to newly created loaders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderSettings {
    pub max_concurrent_loads: usize,
    /// `Duration::ZERO` disables the timeout
    pub loading_timeout: Duration,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            max_concurrent_loads: DEFAULT_MAX_CONCURRENT_LOADS,
            loading_timeout: DEFAULT_LOADING_TIMEOUT,
        }
    }
}

fn timeout_from(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

/// Collaborators a loader is built from
#[derive(Clone)]
pub struct Components {
    pub cache: Arc<dyn CacheStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub decoder: Arc<dyn Decoder>,
    pub dispatcher: Arc<dyn Dispatcher>,
    /// Runtime fetch tasks are spawned on
    pub runtime: Handle,
}

impl Components {
    /// Default cache, `image`-crate decoder and inline delivery
    pub fn new(fetcher: Arc<dyn Fetcher>, runtime: Handle) -> Self {
        Self {
            cache: Arc::new(ImageCache::default()),
            fetcher,
            decoder: Arc::new(ImageDecoder::new()),
            dispatcher: Arc::new(InlineDispatcher),
            runtime,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }
}

/// Handle to a loader. Clones share the same engine.
#[derive(Clone)]
pub struct Loader {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    fetcher: Arc<dyn Fetcher>,
    decoder: Arc<dyn Decoder>,
    dispatcher: RwLock<Arc<dyn Dispatcher>>,
    runtime: Handle,
    metrics: Metrics,
    tracker: Mutex<Tracker>,
}

type FetchResult = Result<(SharedImage, SourceKind), LoadError>;

impl Loader {
    pub fn new(name: impl Into<String>, settings: LoaderSettings, components: Components) -> Self {
        let name = name.into();
        debug!(
            loader = %name,
            max_concurrent_loads = settings.max_concurrent_loads,
            loading_timeout = ?settings.loading_timeout,
            "Creating loader"
        );

        let tracker = Tracker::new(
            components.cache,
            settings.max_concurrent_loads,
            timeout_from(settings.loading_timeout),
        );

        Self {
            shared: Arc::new(Shared {
                name,
                fetcher: components.fetcher,
                decoder: components.decoder,
                dispatcher: RwLock::new(components.dispatcher),
                runtime: components.runtime,
                metrics: Metrics::new(),
                tracker: Mutex::new(tracker),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether two handles refer to the same engine
    pub fn ptr_eq(&self, other: &Loader) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// `None` once the loader has been shut down
    pub fn image_cache(&self) -> Option<Arc<dyn CacheStore>> {
        self.shared.lock().cache.clone()
    }

    pub fn set_image_cache(&self, cache: Arc<dyn CacheStore>) {
        let mut tracker = self.shared.lock();
        if tracker.closed {
            warn!(loader = %self.shared.name, "Ignoring cache swap on shut down loader");
            return;
        }
        tracker.cache = Some(cache);
    }

    pub fn maximum_concurrent_loads(&self) -> usize {
        self.shared.lock().max_concurrent()
    }

    /// Values below 1 are raised to 1. Raising the limit admits queued
    /// requests immediately.
    pub fn set_maximum_concurrent_loads(&self, max: usize) {
        if max == 0 {
            warn!(loader = %self.shared.name, "maximum_concurrent_loads must be at least 1, using 1");
        }
        let mut tracker = self.shared.lock();
        tracker.set_max_concurrent(max);
        self.shared.start_admitted(&mut tracker);
    }

    /// `None` when timeouts are disabled
    pub fn loading_timeout(&self) -> Option<Duration> {
        self.shared.lock().timeout
    }

    /// Applies to fetches admitted from now on. Zero disables the timeout.
    pub fn set_loading_timeout(&self, timeout: Duration) {
        self.shared.lock().timeout = timeout_from(timeout);
    }

    pub fn set_dispatcher(&self, dispatcher: Arc<dyn Dispatcher>) {
        *self
            .shared
            .dispatcher
            .write()
            .unwrap_or_else(PoisonError::into_inner) = dispatcher;
    }

    /// Pre-warm the cache. The registration is anonymous: only
    /// [`cancel_loading_image`](Self::cancel_loading_image) removes it.
    pub fn load_image(&self, locator: &Locator) {
        self.register(locator, None, None, false);
    }

    /// Load `locator` on behalf of `target`.
    ///
    /// A cache hit runs `completion` before this returns. Otherwise it runs
    /// exactly once through the loader's dispatcher, unless the target
    /// cancels first.
    pub fn load_image_for<F>(&self, locator: &Locator, target: TargetId, completion: F)
    where
        F: FnOnce(LoadOutcome) + Send + 'static,
    {
        self.register(locator, Some(target), Some(Box::new(completion)), false);
    }

    /// Await the outcome directly, bypassing the dispatcher. `None` if the
    /// load was cancelled with [`cancel_loading_image`](Self::cancel_loading_image).
    pub async fn load(&self, locator: &Locator) -> Option<LoadOutcome> {
        let (tx, rx) = oneshot::channel();
        self.register(
            locator,
            None,
            Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
            true,
        );
        rx.await.ok()
    }

    /// Drop every registration for `locator` and cancel its fetch. Silent.
    pub fn cancel_loading_image(&self, locator: &Locator) {
        let removed = {
            let mut tracker = self.shared.lock();
            let removed = tracker.cancel_locator(locator);
            self.shared.start_admitted(&mut tracker);
            removed
        };
        self.shared.cancelled(removed, "locator");
    }

    /// Drop `target`'s registrations everywhere. Fetches other targets still
    /// wait on keep running.
    pub fn cancel_loading_images_for_target(&self, target: TargetId) {
        let removed = {
            let mut tracker = self.shared.lock();
            let removed = tracker.cancel_target(target);
            self.shared.start_admitted(&mut tracker);
            removed
        };
        self.shared.cancelled(removed, "target");
    }

    /// Drop only the (`locator`, `target`) registration
    pub fn cancel_loading_image_for(&self, locator: &Locator, target: TargetId) {
        let removed = {
            let mut tracker = self.shared.lock();
            let removed = tracker.cancel_pair(locator, target);
            self.shared.start_admitted(&mut tracker);
            removed
        };
        self.shared.cancelled(removed, "pair");
    }

    /// Fail every pending request with [`FailureKind::Shutdown`], drop the
    /// cache reference and refuse further loads.
    pub fn shutdown(&self) {
        let drained = {
            let mut tracker = self.shared.lock();
            if tracker.closed {
                return;
            }
            tracker.closed = true;
            tracker.cache = None;
            tracker.drain()
        };

        info!(loader = %self.shared.name, pending = drained.len(), "Loader shut down");

        let mut deliveries = Vec::new();
        for (locator, request) in drained {
            for registration in request.registrations {
                let outcome =
                    LoadOutcome::failed(locator.clone(), registration.target, FailureKind::Shutdown);
                deliveries.push((registration, outcome));
            }
        }
        self.shared.deliver(deliveries);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().closed
    }

    /// Locators with a pending request (queued or running)
    pub fn pending_count(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.lock().running()
    }

    pub fn queued_count(&self) -> usize {
        self.shared.lock().queued()
    }

    pub fn is_pending(&self, locator: &Locator) -> bool {
        self.shared.lock().contains(locator)
    }

    pub fn pending(&self) -> Vec<PendingInfo> {
        self.shared.lock().snapshot()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    fn register(
        &self,
        locator: &Locator,
        target: Option<TargetId>,
        completion: Option<Completion>,
        inline: bool,
    ) {
        let registration = Registration {
            target,
            completion,
            inline,
        };

        let mut tracker = self.shared.lock();

        if tracker.closed {
            drop(tracker);
            debug!(loader = %self.shared.name, locator = %locator, "Load on shut down loader");
            let outcome = LoadOutcome::failed(locator.clone(), target, FailureKind::Shutdown);
            self.shared.deliver(vec![(registration, outcome)]);
            return;
        }

        if let Some(image) = tracker.cache.as_ref().and_then(|cache| cache.get(locator)) {
            drop(tracker);
            self.shared.metrics.cache_hit();
            debug!(loader = %self.shared.name, locator = %locator, "Cache hit");
            if let Some(completion) = registration.completion {
                completion(LoadOutcome::loaded(
                    locator.clone(),
                    target,
                    LoadedLocation::Cache,
                    image,
                ));
            }
            return;
        }

        self.shared.metrics.cache_miss();
        match tracker.register(locator, registration) {
            Registered::Coalesced => {
                self.shared.metrics.coalesced();
                debug!(loader = %self.shared.name, locator = %locator, "Joined pending request");
            }
            Registered::Created(handle) => {
                debug!(loader = %self.shared.name, locator = %locator, handle, "Queued new request");
                self.shared.start_admitted(&mut tracker);
            }
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a fetch for every request the limiter lets through. Runs under
    /// the lock so the abort handle is recorded before anyone can cancel.
    ///
    /// Cancellation aborts the fetch task only. Its supervisor always
    /// reports back, so a panicking fetcher still frees the slot.
    fn start_admitted(self: &Arc<Self>, tracker: &mut Tracker) {
        for (locator, handle) in tracker.admit() {
            let fetch = self.runtime.spawn(fetch_and_decode(
                Arc::clone(self),
                locator.clone(),
                tracker.timeout,
            ));
            tracker.mark_running(&locator, handle, fetch.abort_handle());
            self.runtime
                .spawn(supervise(Arc::clone(self), locator.clone(), handle, fetch));
            self.metrics.fetch_started();
            debug!(loader = %self.name, locator = %locator, handle, "Fetch admitted");
        }
    }

    fn finish(self: &Arc<Self>, locator: Locator, handle: u64, result: FetchResult) {
        let request = {
            let mut tracker = self.lock();
            let Some(request) = tracker.resolve(&locator, handle) else {
                drop(tracker);
                self.metrics.late_result_dropped();
                debug!(loader = %self.name, locator = %locator, handle, "Dropping result for torn down request");
                return;
            };

            if let (Ok((image, _)), Some(cache)) = (&result, &tracker.cache) {
                cache.set(locator.clone(), Arc::clone(image));
            }

            self.start_admitted(&mut tracker);
            request
        };

        let deliveries = match &result {
            Ok((image, source)) => {
                self.metrics.fetch_succeeded();
                debug!(loader = %self.name, locator = %locator, waiting = request.registrations.len(), "Image loaded");
                let location = LoadedLocation::from(*source);
                request
                    .registrations
                    .into_iter()
                    .map(|registration| {
                        let outcome = LoadOutcome::loaded(
                            locator.clone(),
                            registration.target,
                            location,
                            Arc::clone(image),
                        );
                        (registration, outcome)
                    })
                    .collect()
            }
            Err(error) => {
                if matches!(error, LoadError::Timeout(_)) {
                    self.metrics.timed_out();
                }
                self.metrics.fetch_failed();
                warn!(loader = %self.name, locator = %locator, error = %error, "Image load failed");
                let kind = error.kind();
                request
                    .registrations
                    .into_iter()
                    .map(|registration| {
                        let outcome =
                            LoadOutcome::failed(locator.clone(), registration.target, kind);
                        (registration, outcome)
                    })
                    .collect()
            }
        };

        self.deliver(deliveries);
    }

    fn deliver(&self, deliveries: Vec<(Registration, LoadOutcome)>) {
        let dispatcher = self
            .dispatcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (registration, outcome) in deliveries {
            let Some(completion) = registration.completion else {
                continue;
            };
            let locator = outcome.locator.clone();
            let run = AssertUnwindSafe(|| {
                if registration.inline {
                    completion(outcome);
                } else {
                    dispatcher.dispatch(Box::new(move || completion(outcome)));
                }
            });
            // one panicking completion must not starve the rest
            if panic::catch_unwind(run).is_err() {
                warn!(loader = %self.name, locator = %locator, "Completion panicked");
            }
        }
    }

    /// Removed registrations are dropped here, outside the lock
    fn cancelled(&self, removed: Vec<Registration>, scope: &'static str) {
        if removed.is_empty() {
            return;
        }
        self.metrics.cancelled(removed.len());
        debug!(loader = %self.name, scope, registrations = removed.len(), "Cancelled registrations");
    }
}

/// Waits on the fetch task and hands whatever it produced to `finish`. A
/// panicked or aborted fetch becomes [`LoadError::FetchTask`]; for an
/// aborted one the request is already gone and the result is dropped.
async fn supervise(
    shared: Arc<Shared>,
    locator: Locator,
    handle: u64,
    fetch: JoinHandle<FetchResult>,
) {
    let result = fetch
        .await
        .unwrap_or_else(|e| Err(LoadError::FetchTask(e.to_string())));
    shared.finish(locator, handle, result);
}

async fn fetch_and_decode(
    shared: Arc<Shared>,
    locator: Locator,
    timeout: Option<Duration>,
) -> FetchResult {
    let fetch = shared.fetcher.fetch(&locator);
    let Fetched { bytes, source } = match timeout {
        Some(limit) => tokio::time::timeout(limit, fetch)
            .await
            .map_err(|_| LoadError::Timeout(limit))??,
        None => fetch.await?,
    };

    let decoder = Arc::clone(&shared.decoder);
    let image = tokio::task::spawn_blocking(move || decoder.decode(&bytes))
        .await
        .map_err(|e| LoadError::DecodeTask(e.to_string()))??;

    Ok((Arc::new(image), source))
}
