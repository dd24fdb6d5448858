//! Call-control adapter: the REST surface used to drive a call plus the
//! WebSocket event bus used to observe one.

mod events;
mod rest;

pub use events::{parse_event, run_event_subscriber, CallControlEvent};
pub use rest::{AriClient, CallControlClient, OriginateRequest, RecordOptions};
