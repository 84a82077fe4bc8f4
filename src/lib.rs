pub mod analysis;
pub mod controller;
pub mod events;
pub mod history;
pub mod protocol;
pub mod sequencer;
pub mod session;
pub mod transport;
