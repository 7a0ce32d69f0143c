use chrono::{DateTime, Utc};

/// Common surface of anything published on a bus.
///
/// Consumers that only log or count (see the observability crate) work against this trait
/// instead of matching on concrete payloads.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable kebab-case name, e.g. `job-completed`.
    fn event_type(&self) -> &'static str;

    /// Payload schema version; bump when fields change meaning.
    fn version(&self) -> u32;

    fn occurred_at(&self) -> DateTime<Utc>;
}
