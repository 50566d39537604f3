//! Per-sender receive session.
//!
//! One session per (slot, ssrc), owning the whole stage chain:
//!
//! ```text
//! [raw packet queue]
//!     -> rtp filter
//!     -> timestamp injector
//!     -> fec block reader          (when the slot carries FEC)
//!     -> depacketizer
//!     -> watchdog
//!     -> resampler
//!     -> mixer slot
//! ```
//!
//! The whole chain runs on the pipeline thread; stages that other parts of
//! the session need to reach (filter stats, mapping updates, latency
//! inputs) are shared through uncontended locks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::audio::{
    latency, Depacketizer, Frame, FrameReader, LatencyTuner, Resampler, Watchdog,
};
use crate::config::ReceiverConfig;
use crate::core::time::Nanos;
use crate::core::Status;
use crate::fec::{BlockReader, CodecMap, FecScheme};
use crate::metrics::ConnectionMetrics;
use crate::packet::{
    FifoQueue, PacketFactory, PacketPtr, PacketReader, PacketWriter, ReadMode,
};
use crate::rtp::{Encoding, Filter, SampleSpec, TimestampInjector};

/// Packet queue that tracks how much media it holds, for the NIQ latency
/// estimate.
struct SessionQueue {
    queue: FifoQueue,
    encoding: Encoding,
    queued_samples: u64,
}

impl SessionQueue {
    fn new(encoding: Encoding) -> Self {
        Self {
            queue: FifoQueue::new(),
            encoding,
            queued_samples: 0,
        }
    }

    fn packet_samples(&self, packet: &PacketPtr) -> u64 {
        match packet.rtp() {
            Some(rtp) if rtp.duration > 0 => rtp.duration as u64,
            Some(rtp) => self.encoding.payload_to_samples(rtp.payload.len()) as u64,
            None => 0,
        }
    }
}

impl PacketWriter for SessionQueue {
    fn write(&mut self, packet: PacketPtr) -> Result<(), Status> {
        self.queued_samples += self.packet_samples(&packet);
        self.queue.write(packet)
    }
}

impl PacketReader for SessionQueue {
    fn read(&mut self, mode: ReadMode) -> Result<PacketPtr, Status> {
        let packet = self.queue.read(mode)?;
        if mode == ReadMode::Fetch {
            self.queued_samples = self
                .queued_samples
                .saturating_sub(self.packet_samples(&packet));
        }
        Ok(packet)
    }
}

// Shared stage handle: the chain owns one end, the session keeps the other
// for stats and control. Same-thread use only, the lock is never contended.
struct Shared<T>(Arc<Mutex<T>>);

impl<T> Shared<T> {
    fn new(inner: T) -> Self {
        Self(Arc::new(Mutex::new(inner)))
    }

    fn handle(&self) -> Shared<T> {
        Shared(Arc::clone(&self.0))
    }
}

impl<T: PacketReader> PacketReader for Shared<T> {
    fn read(&mut self, mode: ReadMode) -> Result<PacketPtr, Status> {
        self.0.lock().read(mode)
    }
}

impl<T: FrameReader> FrameReader for Shared<T> {
    fn read(&mut self, frame: &mut Frame, n_samples: usize) -> Result<(), Status> {
        self.0.lock().read(frame, n_samples)
    }
}

/// Receive session: stage chain plus latency control.
pub struct ReceiverSession {
    source_id: u32,
    encoding: Encoding,
    /// Spec of frames handed to the mixer.
    output_spec: SampleSpec,
    /// Session rate over output rate; the tuner scale multiplies this.
    rate_ratio: f64,

    source_queue: Shared<SessionQueue>,
    repair_queue: Shared<FifoQueue>,

    filter: Shared<Filter>,
    injector: Shared<TimestampInjector>,
    fec_reader: Option<Shared<BlockReader>>,
    depacketizer: Shared<Depacketizer>,
    /// Tail of the chain; its inner reader is the watchdog over the
    /// depacketizer.
    resampler: Shared<Resampler>,
    scratch: Frame,

    tuner: LatencyTuner,
    /// Pipeline position in nanoseconds, advanced by delivered frames.
    position: Nanos,
    terminated: Arc<AtomicBool>,
    /// Filled by the mixer from mixed frame capture timestamps.
    e2e_latency: Nanos,
}

impl ReceiverSession {
    /// Build the session chain. `fec_scheme` comes from the slot's endpoint
    /// bindings; sessions without FEC skip the block reader stage.
    pub fn new(
        config: &ReceiverConfig,
        encoding: Encoding,
        source_id: u32,
        fec_scheme: Option<FecScheme>,
        factory: PacketFactory,
    ) -> Result<Self, Status> {
        let output_spec = config.frame_spec();
        let source_queue = Shared::new(SessionQueue::new(encoding));
        let repair_queue = Shared::new(FifoQueue::new());

        let filter = Shared::new(Filter::new(
            Box::new(source_queue.handle()),
            config.filter,
            encoding,
        ));
        let injector = Shared::new(TimestampInjector::new(
            Box::new(filter.handle()),
            encoding.spec,
        ));

        let (fec_reader, depack_source): (Option<Shared<BlockReader>>, Box<dyn PacketReader>) =
            match fec_scheme {
                Some(scheme) => {
                    let decoder = CodecMap::new_decoder(scheme)?;
                    let reader = Shared::new(BlockReader::new(
                        config.fec_reader,
                        scheme,
                        decoder,
                        Box::new(injector.handle()),
                        Box::new(repair_queue.handle()),
                        factory,
                        encoding,
                    ));
                    let source = Box::new(reader.handle());
                    (Some(reader), source)
                }
                None => (None, Box::new(injector.handle())),
            };

        let depacketizer = Shared::new(Depacketizer::new(depack_source, encoding));

        // the watchdog judges stream health on the raw depacketized frames,
        // before any rate conversion
        let watchdog = Watchdog::new(
            Box::new(depacketizer.handle()),
            config.watchdog,
            encoding.spec,
        );

        let rate_ratio = encoding.spec.sample_rate as f64 / output_spec.sample_rate as f64;
        let mut sampler = Resampler::new(
            config.resampler_backend,
            config.resampler_profile,
            Box::new(watchdog),
            // output runs at the mixer rate but keeps the session's
            // channel layout
            SampleSpec::new(output_spec.sample_rate, encoding.spec.channels),
        )?;
        sampler.set_scale(rate_ratio);
        let resampler = Shared::new(sampler);

        debug!(source_id, ?fec_scheme, "creating receiver session");

        Ok(Self {
            source_id,
            encoding,
            output_spec,
            rate_ratio,
            source_queue,
            repair_queue,
            filter,
            injector,
            fec_reader,
            depacketizer,
            resampler,
            scratch: Frame::new(),
            tuner: LatencyTuner::new(&config.latency),
            position: 0,
            terminated: Arc::new(AtomicBool::new(false)),
            e2e_latency: 0,
        })
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    /// Cooperative cancellation flag; checked at the top of each frame pull.
    pub fn terminate_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminated)
    }

    /// Route an inbound source packet into the session.
    pub fn write_source_packet(&mut self, packet: PacketPtr) -> Result<(), Status> {
        self.source_queue.0.lock().write(packet)
    }

    /// Route an inbound repair packet into the session.
    pub fn write_repair_packet(&mut self, packet: PacketPtr) -> Result<(), Status> {
        self.repair_queue.0.lock().write(packet)
    }

    /// Feed a control mapping (capture timestamp, rtp timestamp) from RTCP.
    pub fn update_mapping(&mut self, capture_ts: Nanos, rtp_ts: u32) {
        self.injector.0.lock().update_mapping(capture_ts, rtp_ts);
    }

    /// Record the end-to-end latency measured on the mixed output.
    pub fn set_e2e_latency(&mut self, latency: Nanos) {
        self.e2e_latency = latency;
    }

    fn niq_latency(&self) -> Nanos {
        let queued = self.source_queue.0.lock().queued_samples;
        let held = self.depacketizer.0.lock().held_samples();
        latency::niq_latency(queued, held, self.encoding.spec.sample_rate)
    }

    /// Connection metrics snapshot.
    pub fn metrics(&self) -> ConnectionMetrics {
        let filter = self.filter.0.lock().stats();
        let depack = self.depacketizer.0.lock().stats();
        let recovered = match &self.fec_reader {
            Some(reader) => reader.0.lock().stats().n_restored,
            None => 0,
        };
        ConnectionMetrics {
            source_id: self.source_id,
            e2e_latency: self.e2e_latency,
            niq_latency: self.tuner.estimate(),
            jitter: self.tuner.jitter(),
            expected_packets: filter.expected,
            lost_packets: filter.expected.saturating_sub(filter.accepted + recovered),
            late_packets: depack.late_packets,
            recovered_packets: recovered,
        }
    }
}

impl FrameReader for ReceiverSession {
    fn read(&mut self, frame: &mut Frame, n_samples: usize) -> Result<(), Status> {
        if self.terminated.load(Ordering::Relaxed) {
            return Err(Status::NoData);
        }

        let out_ch = self.output_spec.channels as usize;
        let in_ch = self.encoding.spec.channels as usize;
        let n_frames = n_samples / out_ch;

        self.resampler
            .0
            .lock()
            .read(&mut self.scratch, n_frames * in_ch)
            .map_err(|status| {
                if status == Status::Abort {
                    warn!(source_id = self.source_id, "session chain aborted");
                }
                status
            })?;

        frame.reset(n_samples);
        crate::audio::map_channels(&self.scratch.samples, in_ch, &mut frame.samples, out_ch);
        frame.capture_ts = self.scratch.capture_ts;
        frame.n_missing = self.scratch.n_missing / in_ch * out_ch;

        self.position += self.output_spec.samples_to_ns(n_frames as u32);

        let niq = self.niq_latency();
        self.tuner.update(niq, self.position)?;
        self.resampler
            .0
            .lock()
            .set_scale(self.tuner.scale() * self.rate_ratio);
        Ok(())
    }
}
