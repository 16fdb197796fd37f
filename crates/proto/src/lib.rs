//! Wire records and the NAT-classification lattice shared by the
//! `natstun` client and server.

pub mod message;
pub mod nat;

pub use message::{ClientRequest, ClientResponse, ProtocolError, RequestType, ServerRequest, ServerResponse};
pub use nat::{merge, NatClass};
