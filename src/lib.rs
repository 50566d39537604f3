//! Real-time PCM audio transport over lossy UDP.
//!
//! A sender peer packetizes a continuous sample stream into RTP, protects
//! it with block FEC, and ships it over UDP together with periodic RTCP
//! reports. A receiver peer validates and reorders packets, repairs losses
//! from the redundancy stream, compensates for independent sender/receiver
//! clocks by resampling, and mixes concurrent senders into a steady frame
//! stream with bounded latency.
//!
//! ```no_run
//! use audiopipe::{Interface, Receiver, ReceiverConfig, Sender, SenderConfig};
//!
//! let mut receiver = Receiver::new(ReceiverConfig::default()).unwrap();
//! let source = receiver.bind(0, Interface::AudioSource, "rtp+rs8m://0.0.0.0:10001").unwrap();
//! let repair = receiver.bind(0, Interface::AudioRepair, "rs8m://0.0.0.0:10002").unwrap();
//!
//! let mut sender = Sender::new(SenderConfig::default()).unwrap();
//! sender.connect(0, Interface::AudioSource, &format!("rtp+rs8m://{source}")).unwrap();
//! sender.connect(0, Interface::AudioRepair, &format!("rs8m://{repair}")).unwrap();
//!
//! let silence = vec![0.0f32; 882];
//! let mut playback = vec![0.0f32; 882];
//! loop {
//!     sender.write_frame(&silence).unwrap();
//!     receiver.read_frame(&mut playback).unwrap();
//! }
//! ```

pub mod audio;
pub mod config;
pub mod core;
pub mod fec;
pub mod metrics;
pub mod net;
pub mod packet;
pub mod peer;
pub mod pipeline;
pub mod rtcp;
pub mod rtp;
pub mod stat;

pub use audio::{
    sink_ring, LatencyConfig, LatencyTunerBackend, LatencyTunerProfile, PlcPlugin,
    ResamplerBackend, ResamplerProfile, SinkConsumer, SinkProducer, WatchdogConfig,
};
pub use config::{ClockSource, FecEncoding, ReceiverConfig, SenderConfig};
pub use crate::core::Status;
pub use fec::FecScheme;
pub use metrics::{ConnectionMetrics, SlotMetrics};
pub use net::{EndpointUri, IfaceConfig, Interface};
pub use peer::{Receiver, Sender};
pub use rtp::{Encoding, SampleSpec};
