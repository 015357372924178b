//! Appearance Model
//!
//! The appearance flavour tracks objects by the colour distribution inside
//! their zone: an N-dimensional histogram [`Signature`] over a configurable
//! channel selection. Re-locating an object in a new frame works on the
//! back-projection of its signature, a per-pixel likelihood plane, by
//! running mean-shift from the previous location until the window stops
//! moving (ε / max-iteration termination).
//!
//! Signatures are min-max normalised to `0..=255`; similarity between two
//! signatures is the Pearson correlation of their bins.

use crate::errors::{Fault, Result};
use crate::geometry::Rect;
use crate::image::{Channel, Image, Mode, Pixels};

/// Histogram configuration shared by every context of one engine.
#[derive(Debug, Clone)]
pub struct HistogramParams {
    /// Colour space the histogram works in.
    pub mode: Mode,
    /// Selected channels; all must belong to `mode`.
    pub channels: Vec<Channel>,
    /// Quantisation per selected channel.
    pub bins: Vec<usize>,
    /// Half-open value range per selected channel.
    pub ranges: Vec<(f32, f32)>,
    /// Optional inclusive low/high mask over the image channels; pixels
    /// outside are ignored.
    pub mask: Option<(Vec<f32>, Vec<f32>)>,
}

impl Default for HistogramParams {
    fn default() -> Self {
        Self {
            mode: Mode::Hsv,
            channels: vec![Channel::H, Channel::S, Channel::V],
            bins: vec![30, 32, 32],
            ranges: vec![(0.0, 180.0), (0.0, 256.0), (0.0, 256.0)],
            mask: None,
        }
    }
}

impl HistogramParams {
    /// Checks the configuration shape and resolves the channel indices.
    pub fn resolve(&self) -> Result<Vec<usize>> {
        if self.channels.is_empty() {
            return Err(Fault::InvalidRange);
        }
        if self.bins.len() < self.channels.len() || self.ranges.len() < self.channels.len() {
            return Err(Fault::InvalidValue);
        }
        if self.bins.iter().any(|&b| b < 2) {
            return Err(Fault::InvalidRange);
        }
        for (low, high) in &self.ranges {
            if low >= high {
                return Err(Fault::InvalidRange);
            }
        }
        if let Some((low, high)) = &self.mask {
            if low.len() != high.len() || low.len() != self.mode.channels() {
                return Err(Fault::InvalidValue);
            }
            if low.iter().zip(high).any(|(l, h)| l > h) {
                return Err(Fault::InvalidRange);
            }
        }
        self.channels
            .iter()
            .map(|c| c.index_in(self.mode).ok_or(Fault::InvalidValue))
            .collect()
    }

    fn masked(&self, pixel: &[u8]) -> bool {
        let Some((low, high)) = &self.mask else {
            return false;
        };
        pixel
            .iter()
            .zip(low.iter().zip(high))
            .any(|(&v, (&l, &h))| f32::from(v) < l || f32::from(v) > h)
    }

    /// Flat bin index of one pixel, `None` when the pixel is masked out or
    /// falls outside every range.
    fn bin_of(&self, indices: &[usize], pixel: &[u8]) -> Option<usize> {
        if self.masked(pixel) {
            return None;
        }
        let mut flat = 0usize;
        for (dim, &channel) in indices.iter().enumerate() {
            let (low, high) = self.ranges[dim];
            let v = f32::from(pixel[channel]);
            if v < low || v >= high {
                return None;
            }
            let bin = ((v - low) / (high - low) * self.bins[dim] as f32) as usize;
            flat = flat * self.bins[dim] + bin.min(self.bins[dim] - 1);
        }
        Some(flat)
    }
}

/// A normalised N-dimensional histogram.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    bins: Vec<f32>,
}

impl Signature {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    #[must_use]
    pub fn bins(&self) -> &[f32] {
        &self.bins
    }
}

/// Computes the signature of an image region already translated into the
/// configured mode.
pub fn signature_of(params: &HistogramParams, roi: &Image) -> Result<Signature> {
    if roi.mode() != params.mode {
        return Err(Fault::TypeMismatch);
    }
    let indices = params.resolve()?;
    let Pixels::U8(data) = roi.input() else {
        return Err(Fault::TypeMismatch);
    };

    let total: usize = params.bins[..params.channels.len()].iter().product();
    let mut bins = vec![0.0f32; total];
    for pixel in data.chunks_exact(params.mode.channels()) {
        if let Some(bin) = params.bin_of(&indices, pixel) {
            bins[bin] += 1.0;
        }
    }

    // Min-max normalisation to 0..=255.
    let max = bins.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        for bin in &mut bins {
            *bin = *bin / max * 255.0;
        }
    }
    Ok(Signature { bins })
}

/// Pearson correlation of two signatures, in `[-1, 1]`.
#[must_use]
pub fn correlation(a: &Signature, b: &Signature) -> f32 {
    if a.bins.len() != b.bins.len() || a.bins.is_empty() {
        return 0.0;
    }
    let n = a.bins.len() as f32;
    let mean_a: f32 = a.bins.iter().sum::<f32>() / n;
    let mean_b: f32 = b.bins.iter().sum::<f32>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.bins.iter().zip(&b.bins) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = (var_a * var_b).sqrt();
    if denom <= f32::EPSILON {
        return if a.bins == b.bins { 1.0 } else { 0.0 };
    }
    cov / denom
}

/// Back-projects a signature over a full image: each pixel's weight is the
/// (normalised) bin value its colour falls into.
pub fn back_project(
    params: &HistogramParams,
    image: &Image,
    signature: &Signature,
) -> Result<Vec<f32>> {
    if image.mode() != params.mode {
        return Err(Fault::TypeMismatch);
    }
    let indices = params.resolve()?;
    let Pixels::U8(data) = image.input() else {
        return Err(Fault::TypeMismatch);
    };

    let mut weights = Vec::with_capacity(data.len() / params.mode.channels());
    for pixel in data.chunks_exact(params.mode.channels()) {
        let weight = params
            .bin_of(&indices, pixel)
            .map_or(0.0, |bin| signature.bins[bin]);
        weights.push(weight);
    }
    Ok(weights)
}

/// Mean-shift termination criterion.
#[derive(Debug, Clone, Copy)]
pub struct Termination {
    /// Stop once the window moved less than this many pixels.
    pub epsilon: f32,
    /// Hard cap on iterations.
    pub iterations: usize,
}

impl Default for Termination {
    fn default() -> Self {
        Self {
            epsilon: 1.0,
            iterations: 10,
        }
    }
}

/// Runs mean-shift over a weight plane, moving `window` towards the local
/// centre of mass until the termination criterion is met.
#[must_use]
pub fn mean_shift(weights: &[f32], frame: Rect, window: Rect, term: Termination) -> Rect {
    let mut window = window;
    for _ in 0..term.iterations.max(1) {
        let roi = window.intersection(&frame);
        if roi.is_empty() {
            break;
        }

        let mut mass = 0.0f64;
        let mut mx = 0.0f64;
        let mut my = 0.0f64;
        for y in roi.y..roi.y + roi.height {
            for x in roi.x..roi.x + roi.width {
                let w = f64::from(weights[(y * frame.width + x) as usize]);
                mass += w;
                mx += w * f64::from(x);
                my += w * f64::from(y);
            }
        }
        if mass <= 0.0 {
            break;
        }

        let cx = (mx / mass) as f32;
        let cy = (my / mass) as f32;
        let nx = (cx - window.width as f32 / 2.0).round() as i32;
        let ny = (cy - window.height as f32 / 2.0).round() as i32;

        let shift = (((nx - window.x).pow(2) + (ny - window.y).pow(2)) as f32).sqrt();
        window.x = nx;
        window.y = ny;
        if shift < term.epsilon {
            break;
        }
    }
    window.intersection(&frame)
}

/// Appearance payload of one tracked context.
#[derive(Debug, Clone, Default)]
pub struct Appearance {
    pub signature: Signature,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2×2-pixel HSV patches of two distinct hues.
    fn hsv_patch(h: u8) -> Image {
        let px = [h, 200, 220];
        let data: Vec<u8> = (0..4).flat_map(|_| px).collect();
        Image::new(Pixels::U8(data), Mode::Hsv, 2, 2).unwrap()
    }

    #[test]
    fn identical_patches_correlate_fully() {
        let params = HistogramParams::default();
        let a = signature_of(&params, &hsv_patch(20)).unwrap();
        let b = signature_of(&params, &hsv_patch(20)).unwrap();
        assert!((correlation(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn different_hues_correlate_poorly() {
        let params = HistogramParams::default();
        let a = signature_of(&params, &hsv_patch(10)).unwrap();
        let b = signature_of(&params, &hsv_patch(120)).unwrap();
        assert!(correlation(&a, &b) < 0.5);
    }

    #[test]
    fn mask_excludes_pixels() {
        let params = HistogramParams {
            mask: Some((vec![0.0, 0.0, 250.0], vec![179.0, 255.0, 255.0])),
            ..HistogramParams::default()
        };
        // Value channel 220 < 250: every pixel masked, empty histogram.
        let sig = signature_of(&params, &hsv_patch(20)).unwrap();
        assert!(sig.bins().iter().all(|&b| b == 0.0));
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let params = HistogramParams {
            channels: vec![Channel::B],
            ..HistogramParams::default()
        };
        assert_eq!(params.resolve().unwrap_err(), Fault::InvalidValue);

        let params = HistogramParams {
            bins: vec![30],
            ..HistogramParams::default()
        };
        assert_eq!(params.resolve().unwrap_err(), Fault::InvalidValue);
    }

    #[test]
    fn mean_shift_converges_on_a_blob() {
        let frame = Rect::of_size(64, 64);
        let mut weights = vec![0.0f32; 64 * 64];
        // Bright blob around (40, 30).
        for y in 27..34 {
            for x in 37..44 {
                weights[y * 64 + x] = 255.0;
            }
        }
        let found = mean_shift(
            &weights,
            frame,
            Rect::new(30, 20, 12, 12),
            Termination::default(),
        );
        let centre = found.centre();
        assert!((centre.x - 40).abs() <= 2, "centre x: {}", centre.x);
        assert!((centre.y - 30).abs() <= 2, "centre y: {}", centre.y);
    }

    #[test]
    fn back_projection_highlights_matching_colours() {
        let params = HistogramParams::default();
        let sig = signature_of(&params, &hsv_patch(20)).unwrap();

        // One matching and one non-matching pixel.
        let data = vec![20, 200, 220, 120, 200, 220];
        let image = Image::new(Pixels::U8(data), Mode::Hsv, 2, 1).unwrap();
        let weights = back_project(&params, &image, &sig).unwrap();
        assert!(weights[0] > weights[1]);
        assert_eq!(weights[1], 0.0);
    }
}
