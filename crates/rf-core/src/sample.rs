//! Sample types and block helpers

/// Type alias for streamed audio samples
pub type Sample = f32;

/// Linear gain factor
pub type Gain = f32;

/// Multiply a block by a constant gain
#[inline]
pub fn apply_simple_gain(buf: &mut [Sample], gain: Gain) {
    if gain == 1.0 {
        return;
    }
    if gain == 0.0 {
        buf.fill(0.0);
        return;
    }
    for s in buf.iter_mut() {
        *s *= gain;
    }
}

/// Sum `src` into `dst` (unity gain)
#[inline]
pub fn mix_buffers_no_gain(dst: &mut [Sample], src: &[Sample]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += *s;
    }
}
