use std::sync::Arc;

use common::config::Settings;
use common::queue::EventPublisher;

/// Application state shared across all handlers.
/// The publisher is built once at startup; handlers only translate
/// requests into events and put them on the bus.
#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<dyn EventPublisher>,
    pub config: Arc<Settings>,
}

impl AppState {
    pub fn new(publisher: Arc<dyn EventPublisher>, config: Settings) -> Self {
        Self {
            publisher,
            config: Arc::new(config),
        }
    }
}
