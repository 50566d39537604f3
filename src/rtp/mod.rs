//! RTP packet handling: wire codec, encoding registry, validation filter,
//! capture-timestamp injection.

pub mod encoding;
pub mod filter;
pub mod header;
pub mod injector;

pub use encoding::{Encoding, EncodingMap, SampleSpec};
pub use filter::{Filter, FilterConfig};
pub use header::{compose_header, parse_packet, HEADER_SIZE};
pub use injector::TimestampInjector;
