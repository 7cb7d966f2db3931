//! Request bookkeeping for one loader.
//!
//! Everything here runs under the loader's mutex, so every method is a
//! plain synchronous state transition.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::limiter::Limiter;
use super::types::{Completion, TargetId};
use crate::cache::CacheStore;
use crate::locator::Locator;

/// One consumer's interest in a locator
pub(crate) struct Registration {
    /// `None` for anonymous registrations, which only a whole-locator
    /// cancel removes
    pub target: Option<TargetId>,
    pub completion: Option<Completion>,
    /// Run the completion directly instead of through the dispatcher
    pub inline: bool,
}

pub(crate) enum Phase {
    Queued,
    Running { abort: AbortHandle, admitted_at: Instant },
}

pub(crate) struct PendingRequest {
    /// Identifies this fetch; results carrying another handle are stale
    pub handle: u64,
    pub registrations: Vec<Registration>,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
}

/// Read-only view of a pending request
#[derive(Debug, Clone, Serialize)]
pub struct PendingInfo {
    pub locator: Locator,
    pub registrations: usize,
    pub running: bool,
    pub created_at: DateTime<Utc>,
    /// Time since admission, for running requests
    pub running_ms: Option<u64>,
}

pub(crate) enum Registered {
    Coalesced,
    Created(u64),
}

pub(crate) struct Tracker {
    pub cache: Option<Arc<dyn CacheStore>>,
    pub timeout: Option<Duration>,
    pub closed: bool,
    requests: HashMap<Locator, PendingRequest>,
    limiter: Limiter,
    next_handle: u64,
}

impl Tracker {
    pub fn new(cache: Arc<dyn CacheStore>, max_concurrent: usize, timeout: Option<Duration>) -> Self {
        Self {
            cache: Some(cache),
            timeout,
            closed: false,
            requests: HashMap::new(),
            limiter: Limiter::new(max_concurrent),
            next_handle: 0,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.limiter.max()
    }

    pub fn set_max_concurrent(&mut self, max: usize) {
        self.limiter.set_max(max);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn running(&self) -> usize {
        self.limiter.running()
    }

    pub fn queued(&self) -> usize {
        self.limiter.waiting()
    }

    pub fn contains(&self, locator: &Locator) -> bool {
        self.requests.contains_key(locator)
    }

    /// Attach to the existing request for `locator`, or create one and queue
    /// it for admission
    pub fn register(&mut self, locator: &Locator, registration: Registration) -> Registered {
        if let Some(request) = self.requests.get_mut(locator) {
            request.registrations.push(registration);
            return Registered::Coalesced;
        }

        let handle = self.next_handle;
        self.next_handle += 1;

        self.requests.insert(
            locator.clone(),
            PendingRequest {
                handle,
                registrations: vec![registration],
                phase: Phase::Queued,
                created_at: Utc::now(),
            },
        );
        self.limiter.enqueue(locator.clone(), handle);
        Registered::Created(handle)
    }

    /// Requests that may start now
    pub fn admit(&mut self) -> Vec<(Locator, u64)> {
        self.limiter.admit()
    }

    pub fn mark_running(&mut self, locator: &Locator, handle: u64, abort: AbortHandle) {
        match self.requests.get_mut(locator) {
            Some(request) if request.handle == handle => {
                request.phase = Phase::Running {
                    abort,
                    admitted_at: Instant::now(),
                };
            }
            _ => abort.abort(),
        }
    }

    /// Take the request a fetch result belongs to. `None` when the request
    /// was torn down (or replaced) since the fetch started.
    pub fn resolve(&mut self, locator: &Locator, handle: u64) -> Option<PendingRequest> {
        if self.requests.get(locator)?.handle != handle {
            return None;
        }
        let request = self.requests.remove(locator)?;
        self.limiter.release();
        Some(request)
    }

    /// Remove every registration for `locator` and tear the request down
    pub fn cancel_locator(&mut self, locator: &Locator) -> Vec<Registration> {
        match self.requests.remove(locator) {
            Some(mut request) => {
                let removed = std::mem::take(&mut request.registrations);
                self.teardown(request);
                removed
            }
            None => Vec::new(),
        }
    }

    /// Remove `target`'s registrations from every request
    pub fn cancel_target(&mut self, target: TargetId) -> Vec<Registration> {
        let locators: Vec<Locator> = self
            .requests
            .iter()
            .filter(|(_, request)| {
                request
                    .registrations
                    .iter()
                    .any(|r| r.target == Some(target))
            })
            .map(|(locator, _)| locator.clone())
            .collect();

        let mut removed = Vec::new();
        for locator in locators {
            removed.extend(self.remove_matching(&locator, target));
        }
        removed
    }

    /// Remove only the (locator, target) registrations
    pub fn cancel_pair(&mut self, locator: &Locator, target: TargetId) -> Vec<Registration> {
        self.remove_matching(locator, target)
    }

    /// Tear down everything; returns the requests so their registrations can
    /// be failed
    pub fn drain(&mut self) -> Vec<(Locator, PendingRequest)> {
        let drained: Vec<(Locator, PendingRequest)> = self.requests.drain().collect();
        for (_, request) in &drained {
            if let Phase::Running { abort, .. } = &request.phase {
                abort.abort();
            }
        }
        self.limiter.reset();
        drained
    }

    pub fn snapshot(&self) -> Vec<PendingInfo> {
        let mut infos: Vec<PendingInfo> = self
            .requests
            .iter()
            .map(|(locator, request)| {
                let running_ms = match &request.phase {
                    Phase::Running { admitted_at, .. } => {
                        Some(admitted_at.elapsed().as_millis() as u64)
                    }
                    Phase::Queued => None,
                };
                PendingInfo {
                    locator: locator.clone(),
                    registrations: request.registrations.len(),
                    running: running_ms.is_some(),
                    created_at: request.created_at,
                    running_ms,
                }
            })
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    fn remove_matching(&mut self, locator: &Locator, target: TargetId) -> Vec<Registration> {
        let Some(request) = self.requests.get_mut(locator) else {
            return Vec::new();
        };

        let (removed, kept): (Vec<Registration>, Vec<Registration>) =
            std::mem::take(&mut request.registrations)
                .into_iter()
                .partition(|r| r.target == Some(target));
        request.registrations = kept;

        if request.registrations.is_empty() {
            if let Some(request) = self.requests.remove(locator) {
                self.teardown(request);
            }
        }
        removed
    }

    fn teardown(&mut self, request: PendingRequest) {
        match request.phase {
            Phase::Queued => self.limiter.withdraw(request.handle),
            Phase::Running { abort, .. } => {
                abort.abort();
                self.limiter.release();
            }
        }
    }
}
