pub mod eventbus;
pub mod events;
pub mod relay;

pub use eventbus::{BUS, EventBus};
pub use events::{AdminActivity, ClientAdmitted, ClientBlocked};
pub use relay::{ActivityPublisher, ActivityRelay, BroadcastPublisher, RelayError, RelayedMessage};
