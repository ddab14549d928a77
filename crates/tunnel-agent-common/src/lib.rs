// Error types
pub mod error;
pub use error::{classify_remote, AgentError, CancelReason, Classification};

// Core data types
pub mod types;
pub use types::{
    AgentConfig, Endpoint, EstablishResponse, Instance, Network, Organization, PingResponse,
};

// Wire protocol
pub mod protocol;
