//! `mutua-events`: event contracts and pub/sub mechanics.
//!
//! Domain-agnostic: the ledger's own events and notices are defined in
//! `mutua-dues` and `mutua-infra` and travel through these types.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
