pub mod events;
pub mod queue;
pub mod sink;

pub use events::{InboundMessage, OutboundKind, OutboundMessage};
pub use queue::{MessageBus, send_inbound, send_outbound};
pub use sink::{BusSink, OutboundSink};
