//! Back-end request handler.
//!
//! Validates range requests from the relay and answers them from the
//! external sequence service. One request per connection:
//!
//! ```text
//! Request:  1,100,5
//! Response: <plain-text sequence from the service>
//!
//! Request:  5,3,2
//! Response: Data not in correct format min > max
//! ```
//!
//! The connection is closed after the single reply.

pub mod handler;
pub mod parser;
mod server;

pub use parser::{Limits, RangeRequest};
pub use server::BackendServer;
