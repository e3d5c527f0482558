pub mod channel;
pub mod coordinator;
pub mod transport;

pub use channel::{EventChannel, EventHandler, ListenerId};
pub use coordinator::{
    Callbacks, CoordinatorOptions, CoordinatorState, RequestCoordinator, RequestStatus,
};
pub use transport::WsEventChannel;

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod coordinator_tests;

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod transport_tests;
