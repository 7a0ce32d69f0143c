//! Lifecycle events and the pub/sub mechanics that carry them.

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod job_event;

pub use bus::{EventBus, RecvTimeoutError, Subscription, TryRecvError};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use job_event::{JobEvent, JobEventKind};
