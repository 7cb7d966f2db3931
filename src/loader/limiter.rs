use std::collections::VecDeque;

use crate::locator::Locator;

/// FIFO admission control for fetches.
///
/// Lives inside the loader's tracker and is only touched under the loader
/// lock. Waiting entries are plain data; nothing runs until admitted.
#[derive(Debug)]
pub(crate) struct Limiter {
    max: usize,
    running: usize,
    waiting: VecDeque<(Locator, u64)>,
}

impl Limiter {
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            running: 0,
            waiting: VecDeque::new(),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Lowering the limit never interrupts running fetches.
    pub fn set_max(&mut self, max: usize) {
        self.max = max.max(1);
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    pub fn enqueue(&mut self, locator: Locator, handle: u64) {
        self.waiting.push_back((locator, handle));
    }

    /// Drop a request that never got admitted
    pub fn withdraw(&mut self, handle: u64) {
        self.waiting.retain(|(_, h)| *h != handle);
    }

    /// A running fetch finished or was torn down
    pub fn release(&mut self) {
        self.running = self.running.saturating_sub(1);
    }

    /// Pop as many waiting requests as free slots allow, counting them running
    pub fn admit(&mut self) -> Vec<(Locator, u64)> {
        let mut admitted = Vec::new();
        while self.running < self.max {
            let Some(next) = self.waiting.pop_front() else {
                break;
            };
            self.running += 1;
            admitted.push(next);
        }
        admitted
    }

    /// Forget everything; used when the loader shuts down
    pub fn reset(&mut self) {
        self.running = 0;
        self.waiting.clear();
    }
}
