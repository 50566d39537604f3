//! Lock-free sample hand-off to an audio callback.
//!
//! The pipeline thread pulls mixed frames and pushes them into the ring;
//! the audio device callback pops from the other end without taking any
//! lock. Whole frames only: a partial push would shift the channel
//! interleaving for every following sample.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

/// Producer half, owned by the pipeline thread.
pub struct SinkProducer {
    producer: HeapProd<f32>,
    n_dropped_frames: u64,
}

/// Consumer half, owned by the audio callback.
pub struct SinkConsumer {
    consumer: HeapCons<f32>,
    n_underruns: u64,
}

/// Create a sink ring holding `capacity` interleaved samples.
pub fn sink_ring(capacity: usize) -> (SinkProducer, SinkConsumer) {
    let rb = HeapRb::<f32>::new(capacity);
    let (producer, consumer) = rb.split();
    (
        SinkProducer {
            producer,
            n_dropped_frames: 0,
        },
        SinkConsumer {
            consumer,
            n_underruns: 0,
        },
    )
}

impl SinkProducer {
    /// Push one frame. The frame is dropped in full when the ring cannot
    /// take all of it.
    pub fn push_frame(&mut self, samples: &[f32]) -> bool {
        if self.producer.vacant_len() < samples.len() {
            self.n_dropped_frames += 1;
            return false;
        }
        self.producer.push_slice(samples);
        true
    }

    /// Frames dropped because the consumer fell behind.
    pub fn n_dropped_frames(&self) -> u64 {
        self.n_dropped_frames
    }
}

impl SinkConsumer {
    /// Fill `out` from the ring; the tail is zeroed on underrun.
    pub fn pop_frame(&mut self, out: &mut [f32]) -> usize {
        let n = self.consumer.pop_slice(out);
        if n < out.len() {
            self.n_underruns += 1;
            out[n..].iter_mut().for_each(|s| *s = 0.0);
        }
        n
    }

    /// Samples currently buffered.
    pub fn buffered(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn n_underruns(&self) -> u64 {
        self.n_underruns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_frames_only() {
        let (mut prod, mut cons) = sink_ring(8);
        assert!(prod.push_frame(&[1.0; 4]));
        assert!(prod.push_frame(&[2.0; 4]));
        // full: the next frame is dropped entirely
        assert!(!prod.push_frame(&[3.0; 4]));
        assert_eq!(prod.n_dropped_frames(), 1);

        let mut out = [0.0f32; 4];
        assert_eq!(cons.pop_frame(&mut out), 4);
        assert_eq!(out, [1.0; 4]);
        assert_eq!(cons.buffered(), 4);
    }

    #[test]
    fn test_underrun_zero_fills() {
        let (mut prod, mut cons) = sink_ring(16);
        prod.push_frame(&[0.5; 2]);

        let mut out = [1.0f32; 6];
        assert_eq!(cons.pop_frame(&mut out), 2);
        assert_eq!(&out[..2], &[0.5; 2]);
        assert!(out[2..].iter().all(|&s| s == 0.0));
        assert_eq!(cons.n_underruns(), 1);
    }

    #[test]
    fn test_cross_thread_transfer() {
        let (mut prod, mut cons) = sink_ring(1 << 12);
        let handle = std::thread::spawn(move || {
            let frame: Vec<f32> = (0..64).map(|i| i as f32).collect();
            let mut pushed = 0;
            while pushed < 16 {
                if prod.push_frame(&frame) {
                    pushed += 1;
                }
            }
        });

        let mut got = 0usize;
        let mut out = [0.0f32; 64];
        while got < 16 * 64 {
            let n = cons.pop_frame(&mut out);
            got += n;
            if n == 0 {
                std::thread::yield_now();
            }
        }
        handle.join().unwrap();
    }
}
