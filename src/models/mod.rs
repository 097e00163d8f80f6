pub mod chat;
pub mod payment;
pub mod request;
pub mod response;

pub use chat::*;
pub use payment::*;
pub use request::*;
pub use response::*;
