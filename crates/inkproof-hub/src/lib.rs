mod client;
mod heartbeat;
mod hub;
mod manager;
mod route;

pub use heartbeat::{PING_PERIOD, PONG_WAIT, SEND_QUEUE_CAPACITY, WRITE_WAIT};
pub use hub::Hub;
pub use manager::HubManager;
pub use route::{collab_router, CollabState};
