//! Streaming resample stage.
//!
//! Uses Rubato to convert decoded interleaved `f32` audio from the source rate to the output
//! rate. Runs inline on the decode thread: input accumulates until a full chunk is available,
//! and [`StreamResampler::finish`] flushes the partial tail at end of stream.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

pub(crate) struct StreamResampler {
    inner: Box<dyn Resampler<f32>>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    out: Vec<f32>,
}

impl StreamResampler {
    pub(crate) fn new(
        src_rate: u32,
        dst_rate: u32,
        channels: usize,
        chunk_frames: usize,
    ) -> Result<Self> {
        let channels = channels.max(1);
        let chunk_frames = chunk_frames.max(1);
        let f_ratio = dst_rate as f64 / src_rate.max(1) as f64;

        let sinc_len = 128;
        let oversampling_factor = 256;
        let interpolation = SincInterpolationType::Cubic;
        let window = WindowFunction::BlackmanHarris2;
        let f_cutoff = calculate_cutoff(sinc_len, window);

        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff,
            interpolation,
            oversampling_factor,
            window,
        };

        let inner = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init: {e}"))?;
        let out_frames = inner.output_frames_max();

        tracing::info!(src_rate_hz = src_rate, dst_rate_hz = dst_rate, "resampling");
        Ok(Self {
            inner: Box::new(inner),
            channels,
            chunk_frames,
            pending: Vec::with_capacity(chunk_frames * channels * 2),
            out: vec![0.0; out_frames * channels],
        })
    }

    /// Feed interleaved input; returns whatever full chunks produced.
    pub(crate) fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(input);
        let chunk_samples = self.chunk_frames * self.channels;
        let mut produced = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk_samples {
            let n = self.run(consumed, self.chunk_frames, None)?;
            produced.extend_from_slice(&self.out[..n]);
            consumed += chunk_samples;
        }
        self.pending.drain(..consumed);
        Ok(produced)
    }

    /// Flush the partial tail at end of stream.
    pub(crate) fn finish(&mut self) -> Result<Vec<f32>> {
        let tail_frames = self.pending.len() / self.channels;
        if tail_frames == 0 {
            self.pending.clear();
            return Ok(Vec::new());
        }
        // The resampler always reads a full chunk; pad with silence and mark the real length.
        self.pending.resize(self.chunk_frames * self.channels, 0.0);
        let n = self.run(0, self.chunk_frames, Some(tail_frames))?;
        self.pending.clear();
        Ok(self.out[..n].to_vec())
    }

    /// Drop buffered input and filter state (after a seek).
    pub(crate) fn reset(&mut self) {
        self.pending.clear();
        self.inner.reset();
    }

    fn run(&mut self, offset: usize, frames: usize, partial_len: Option<usize>) -> Result<usize> {
        let end = offset + frames * self.channels;
        let input_adapter = InterleavedSlice::new(&self.pending[offset..end], self.channels, frames)
            .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;

        let out_capacity_frames = self.out.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.out, self.channels, out_capacity_frames)
                .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };

        let (_nbr_in, nbr_out) = self
            .inner
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resampler process: {e}"))?;
        Ok(nbr_out * self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsampling_roughly_doubles_frames() {
        let mut rs = StreamResampler::new(24_000, 48_000, 2, 256).unwrap();
        let input = vec![0.25f32; 256 * 2 * 8];
        let mut total = rs.process(&input).unwrap().len();
        total += rs.finish().unwrap().len();
        let frames = total / 2;
        // Sinc delay eats a little at the start.
        assert!(frames > 256 * 8 * 2 - 512, "frames {frames}");
        assert!(frames <= 256 * 8 * 2 + 512, "frames {frames}");
    }

    #[test]
    fn partial_input_waits_for_a_full_chunk() {
        let mut rs = StreamResampler::new(44_100, 48_000, 1, 512).unwrap();
        assert!(rs.process(&[0.0; 100]).unwrap().is_empty());
        rs.reset();
        assert!(rs.finish().unwrap().is_empty());
    }
}
