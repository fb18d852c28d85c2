//! Host integrations for running the appliance on a Linux box.

mod indicator;
mod network;

pub use indicator::LogIndicator;
pub use network::HostDriver;
