use tracing::Level;

/// Observability sink handed into each pipeline stage. Components never log
/// through global state directly; the sink decides where records go.
pub trait EventSink {
    fn record(&self, level: Level, component: &str, message: &str);
}

/// Default sink: forwards records to the `tracing` subscriber.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, level: Level, component: &str, message: &str) {
        match level {
            Level::ERROR => tracing::error!(component, "{message}"),
            Level::WARN => tracing::warn!(component, "{message}"),
            Level::INFO => tracing::info!(component, "{message}"),
            Level::DEBUG => tracing::debug!(component, "{message}"),
            Level::TRACE => tracing::trace!(component, "{message}"),
        }
    }
}

/// Discards every record.
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _level: Level, _component: &str, _message: &str) {}
}
