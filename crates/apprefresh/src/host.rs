use crate::clock::Clock;
use crate::page::Page;
use crate::scheduler::Scheduler;
use crate::storage::KeyValueStore;
use std::sync::Arc;

/// Everything the controllers need from the environment they run in.
#[derive(Clone)]
pub struct Host {
    pub page: Arc<dyn Page>,
    pub clock: Arc<dyn Clock>,
    pub scheduler: Arc<dyn Scheduler>,
    pub store: Arc<dyn KeyValueStore>,
}

impl Host {
    pub fn new(
        page: Arc<dyn Page>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            page,
            clock,
            scheduler,
            store,
        }
    }
}
