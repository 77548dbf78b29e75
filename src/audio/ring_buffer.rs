//! SPSC ring between the capture callback and the pipeline tick.
//!
//! cpal invokes its data callback on a real-time thread, so the write side
//! must never lock or allocate. `ringbuf` gives us a lock-free heap ring;
//! the pipeline drains it on every tick and appends to the turn buffer.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

/// Default capacity: ~70 seconds of 16 kHz mono audio, comfortably above
/// the 60-second recording ceiling plus drain slack.
const DEFAULT_CAPACITY: usize = 1_120_000;

/// Write half, owned by the capture callback.
pub struct AudioProducer {
    inner: ringbuf::HeapProd<f32>,
}

/// Read half, owned by the pipeline.
pub struct AudioConsumer {
    inner: ringbuf::HeapCons<f32>,
}

/// Allocate a ring and split it. `None` uses [`DEFAULT_CAPACITY`].
pub fn audio_ring_buffer(capacity: Option<usize>) -> (AudioProducer, AudioConsumer) {
    let rb = HeapRb::<f32>::new(capacity.unwrap_or(DEFAULT_CAPACITY));
    let (prod, cons) = rb.split();
    (AudioProducer { inner: prod }, AudioConsumer { inner: cons })
}

impl AudioProducer {
    /// Push a slice of samples. Returns how many were actually written;
    /// a full ring drops the tail of the slice.
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.inner.push_slice(samples)
    }
}

// Safety: only the capture callback thread ever touches the producer.
unsafe impl Send for AudioProducer {}

impl AudioConsumer {
    /// Number of samples waiting to be read.
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Move every buffered sample into `out`. Returns the count moved.
    pub fn drain_into(&mut self, out: &mut Vec<f32>) -> usize {
        let mut scratch = [0.0f32; 4096];
        let mut moved = 0;
        loop {
            let n = self.inner.pop_slice(&mut scratch);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&scratch[..n]);
            moved += n;
        }
        moved
    }
}

unsafe impl Send for AudioConsumer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_drain_preserves_order() {
        let (mut prod, mut cons) = audio_ring_buffer(Some(16));
        prod.push_slice(&[1.0, 2.0, 3.0]);
        let mut out = Vec::new();
        assert_eq!(cons.drain_into(&mut out), 3);
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
        assert_eq!(cons.available(), 0);
    }

    #[test]
    fn full_ring_drops_the_tail() {
        let (mut prod, mut cons) = audio_ring_buffer(Some(4));
        let written = prod.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(written, 4);
        let mut out = Vec::new();
        cons.drain_into(&mut out);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn drain_appends_across_multiple_pushes() {
        let (mut prod, mut cons) = audio_ring_buffer(Some(8192));
        let mut out = Vec::new();
        prod.push_slice(&vec![0.5; 5000]);
        cons.drain_into(&mut out);
        prod.push_slice(&vec![0.25; 5000]);
        cons.drain_into(&mut out);
        assert_eq!(out.len(), 10_000);
        assert!((out[0] - 0.5).abs() < f32::EPSILON);
        assert!((out[9999] - 0.25).abs() < f32::EPSILON);
    }
}
