//! Per-channel acquisition history ring.

use scope_core::{Sample, ScopeError};

/// Rolling sample history for one channel.
///
/// Single writer, write-only on the hot path: the engine appends each
/// de-interleaved block and the ring silently overwrites the oldest
/// history. Window extraction copies `dst.len()` samples ending at an
/// absolute index. Capacity is sized at construction to at least one
/// capture window plus one block, which is what makes extraction of any
/// window the trigger engines can report safe by construction.
pub struct AcquisitionRing<S: Sample> {
    buf: Box<[S]>,
    /// Total samples ever written; monotonic, resets only with the ring
    total_written: u64,
}

impl<S: Sample> AcquisitionRing<S> {
    /// Create a ring holding `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be > 0");
        Self {
            buf: vec![S::default(); capacity].into_boxed_slice(),
            total_written: 0,
        }
    }

    /// Sample capacity of the backing store.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Total samples written since creation or the last reset.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Discard all history and restart indexing at zero.
    pub fn reset(&mut self) {
        self.total_written = 0;
    }

    /// Append samples, wrapping over the oldest history.
    ///
    /// Never fails and never blocks; a write longer than the capacity
    /// keeps only the newest `capacity` samples (the engine's block length
    /// is far below capacity by construction).
    pub fn write(&mut self, samples: &[S]) {
        let cap = self.buf.len();
        let src = if samples.len() > cap {
            &samples[samples.len() - cap..]
        } else {
            samples
        };
        let skipped = (samples.len() - src.len()) as u64;

        let offset = ((self.total_written + skipped) % cap as u64) as usize;
        let first = src.len().min(cap - offset);
        self.buf[offset..offset + first].copy_from_slice(&src[..first]);
        if first < src.len() {
            let rest = src.len() - first;
            self.buf[..rest].copy_from_slice(&src[first..]);
        }
        self.total_written += samples.len() as u64;
    }

    /// Copy the `dst.len()` samples ending at `end_index` into `dst`.
    ///
    /// `end_index` is exclusive and absolute. The requested window must
    /// lie entirely inside retained history; anything older has been
    /// overwritten and is a sizing error on the caller's part.
    pub fn read_window(&self, dst: &mut [S], end_index: u64) -> Result<(), ScopeError> {
        let depth = dst.len() as u64;
        let cap = self.buf.len();
        let out_of_range = end_index > self.total_written
            || end_index < depth
            || self.total_written - (end_index - depth) > cap as u64;
        if out_of_range {
            return Err(ScopeError::WindowOutOfRange {
                end_index,
                total_written: self.total_written,
                capacity: cap,
            });
        }

        let start = end_index - depth;
        let offset = (start % cap as u64) as usize;
        let first = (depth as usize).min(cap - offset);
        dst[..first].copy_from_slice(&self.buf[offset..offset + first]);
        if first < depth as usize {
            let rest = depth as usize - first;
            dst[first..].copy_from_slice(&self.buf[..rest]);
        }
        Ok(())
    }
}

/// All enabled channels' rings, written and read together.
///
/// The multi-channel reads are a batching convenience only: semantics are
/// identical to calling [`AcquisitionRing::read_window`] per channel with
/// the same `end_index`.
pub struct ChannelRings<S: Sample> {
    rings: Vec<AcquisitionRing<S>>,
}

impl<S: Sample> ChannelRings<S> {
    /// One ring per channel, each of `capacity` samples.
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            rings: (0..channels).map(|_| AcquisitionRing::new(capacity)).collect(),
        }
    }

    /// Number of channel rings.
    pub fn channels(&self) -> usize {
        self.rings.len()
    }

    /// Per-channel ring capacity in samples.
    pub fn capacity(&self) -> usize {
        self.rings.first().map_or(0, AcquisitionRing::capacity)
    }

    /// Total samples written per channel (identical across channels).
    pub fn total_written(&self) -> u64 {
        self.rings.first().map_or(0, AcquisitionRing::total_written)
    }

    /// Restart all channels at index zero.
    pub fn reset(&mut self) {
        for ring in &mut self.rings {
            ring.reset();
        }
    }

    /// Append one de-interleaved block: `streams[c]` goes to channel `c`.
    ///
    /// All streams must be the same length so channel indices stay in
    /// lockstep.
    pub fn write(&mut self, streams: &[Vec<S>]) {
        debug_assert_eq!(streams.len(), self.rings.len());
        for (ring, stream) in self.rings.iter_mut().zip(streams) {
            ring.write(stream);
        }
    }

    /// Read the same window from every channel.
    ///
    /// `dst[c]` receives channel `c`'s samples ending at `end_index`.
    pub fn read_windows(&self, dst: &mut [Vec<S>], end_index: u64) -> Result<(), ScopeError> {
        if dst.len() != self.rings.len() {
            return Err(ScopeError::OutputChannelMismatch {
                outputs: dst.len(),
                channels: self.rings.len(),
            });
        }
        for (ring, buf) in self.rings.iter().zip(dst.iter_mut()) {
            ring.read_window(buf, end_index)?;
        }
        Ok(())
    }

    /// Read one channel's window.
    pub fn read_window(
        &self,
        channel: usize,
        dst: &mut [S],
        end_index: u64,
    ) -> Result<(), ScopeError> {
        let ring = self.rings.get(channel).ok_or(ScopeError::ChannelOutOfRange {
            channel,
            count: self.rings.len(),
        })?;
        ring.read_window(dst, end_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_write_then_read_simple() {
        let mut ring = AcquisitionRing::<i16>::new(256);
        let data: Vec<i16> = (0..100).collect();
        ring.write(&data);

        let mut window = vec![0i16; 40];
        ring.read_window(&mut window, 100).expect("read");
        assert_eq!(window, (60..100).collect::<Vec<i16>>());
    }

    #[test]
    fn test_read_matches_across_wraparound() {
        // Capacity 128, write 300 samples in odd-sized chunks: reads must
        // reproduce the original sequence at any valid logical position.
        let mut ring = AcquisitionRing::<i16>::new(128);
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let data: Vec<i16> = (0..300).map(|_| rng.gen()).collect();

        let mut written = 0;
        while written < data.len() {
            let n = rng.gen_range(1..50).min(data.len() - written);
            ring.write(&data[written..written + n]);
            written += n;
        }
        assert_eq!(ring.total_written(), 300);

        for end in [200u64, 250, 300] {
            let mut window = vec![0i16; 100];
            ring.read_window(&mut window, end).expect("read");
            assert_eq!(window, data[end as usize - 100..end as usize]);
        }
    }

    #[test]
    fn test_rejects_overwritten_history() {
        let mut ring = AcquisitionRing::<i16>::new(128);
        ring.write(&vec![1i16; 300]);

        let mut window = vec![0i16; 100];
        // Samples 0..100 were overwritten long ago.
        assert!(matches!(
            ring.read_window(&mut window, 100),
            Err(ScopeError::WindowOutOfRange { .. })
        ));
        // The newest 128 are still there.
        ring.read_window(&mut window, 300).expect("read newest");
    }

    #[test]
    fn test_rejects_future_and_underfilled() {
        let mut ring = AcquisitionRing::<i16>::new(128);
        ring.write(&vec![1i16; 50]);

        let mut window = vec![0i16; 100];
        // Beyond what was written.
        assert!(ring.read_window(&mut window, 120).is_err());
        // Window would start before the stream began.
        assert!(ring.read_window(&mut window, 50).is_err());
    }

    #[test]
    fn test_reset_restarts_indexing() {
        let mut ring = AcquisitionRing::<i16>::new(128);
        ring.write(&vec![7i16; 100]);
        ring.reset();
        assert_eq!(ring.total_written(), 0);

        ring.write(&vec![9i16; 64]);
        let mut window = vec![0i16; 64];
        ring.read_window(&mut window, 64).expect("read");
        assert_eq!(window, vec![9i16; 64]);
    }

    #[test]
    fn test_multi_channel_windows_match_single() {
        let mut rings = ChannelRings::<i16>::new(2, 256);
        let ch0: Vec<i16> = (0..200).collect();
        let ch1: Vec<i16> = (0..200).map(|v| -v).collect();
        rings.write(&[ch0.clone(), ch1.clone()]);

        let mut multi = vec![vec![0i16; 80], vec![0i16; 80]];
        rings.read_windows(&mut multi, 200).expect("multi");

        let mut single = vec![0i16; 80];
        rings.read_window(0, &mut single, 200).expect("single");
        assert_eq!(multi[0], single);
        rings.read_window(1, &mut single, 200).expect("single");
        assert_eq!(multi[1], single);
        assert_eq!(multi[0], ch0[120..].to_vec());
        assert_eq!(multi[1], ch1[120..].to_vec());
    }

    #[test]
    fn test_channel_out_of_range() {
        let rings = ChannelRings::<i16>::new(2, 128);
        let mut dst = vec![0i16; 10];
        assert!(matches!(
            rings.read_window(5, &mut dst, 10),
            Err(ScopeError::ChannelOutOfRange { .. })
        ));
    }
}
