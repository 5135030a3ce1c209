//! Broker gateway: traits, the DEGIRO client and an in-memory mock.

mod client;
pub mod mock;
mod totp;
mod traits;
mod types;

pub use client::DegiroClient;
pub use mock::MockBroker;
pub use traits::*;
pub use types::*;
