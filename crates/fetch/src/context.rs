use std::sync::Arc;

use gleaner_storage::{RecordSink, WatermarkStore};

use crate::invoker::Invoker;

/// Shared handles every fetcher runs against.
///
/// The stores are shared across all jobs; each job only touches its own
/// watermark key, and the sink tolerates concurrent writers.
#[derive(Clone)]
pub struct EngineContext {
    pub invoker: Arc<dyn Invoker>,
    pub watermarks: Arc<dyn WatermarkStore>,
    pub sink: Arc<dyn RecordSink>,
}

impl EngineContext {
    pub fn new(
        invoker: Arc<dyn Invoker>,
        watermarks: Arc<dyn WatermarkStore>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            invoker,
            watermarks,
            sink,
        }
    }
}
