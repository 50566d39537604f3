//! UDP transport: endpoint URIs, socket setup, per-port receive threads
//! and send paths.

pub mod endpoint_uri;
pub mod port;
pub mod socket;

pub use endpoint_uri::{EndpointUri, Interface, Protocol};
pub use port::{ReceiverPort, SenderPort};
pub use socket::{bind_socket, connect_socket, IfaceConfig};
