pub mod rfcomm;
pub mod tcp;
pub mod traits;

pub use rfcomm::{RfcommConnector, RfcommLink, DEFAULT_SPP_CHANNEL, SPP_UUID};
pub use tcp::{TcpConnector, TcpLink};
pub use traits::{LinkConnector, LinkStream};
