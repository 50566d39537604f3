//! Pipelines: the per-session receive chain, the receiver session group,
//! the sender chain, and the internal clock ticker.

pub mod receiver;
pub mod sender;
pub mod session;
pub mod ticker;

pub use receiver::ReceiverSessionGroup;
pub use sender::SenderPipeline;
pub use session::ReceiverSession;
pub use ticker::Ticker;
