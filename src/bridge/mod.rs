pub mod channels;
pub mod events;
pub mod handler;
pub mod messages;
pub mod transport;
