pub mod connection;
pub mod flags;
pub mod processor;
pub mod state;

pub use connection::ConnectionState;
pub use flags::{TcpFlag, TcpFlags};
pub use processor::TcpProcessor;
pub use state::TcpState;
