mod connection;
mod credentials;
mod link;

pub use connection::{BigiotConnection, Connection, Connector, TcpConnector, Transport};
pub use credentials::Credentials;
pub use link::SessionLink;
