pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod negotiation;
pub mod poller;
pub mod signaling;
pub mod telemetry;

pub use config::{ClientConfig, ConfigError};
pub use connection::{ConnectOptions, Connection};
pub use engine::{ConnectionState, Payload, PeerEngine};
pub use error::ConnectionError;
pub use poller::PollState;
pub use signaling::{IceCandidate, SignalingApi, SignalingError};
