pub mod agent;
pub mod fetch;
pub mod network;
pub mod payment;

pub use agent::X402Agent;
pub use fetch::{FetchSettings, OutgoingRequest, PaymentFetch, TransportResponse, X402Fetch};
pub use payment::PaymentSigner;
