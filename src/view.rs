//! Captured Visual Environment
//!
//! A [`View`] gathers every image captured at one instant (the colour frame
//! in whatever space the camera delivered, plus an optional depth map with
//! its 2D↔3D [`Projector`]) and materialises colour-space conversions on
//! demand. Conversions requested through [`View::image`] are cached (BGR is
//! materialised first as the hub); [`View::image_roi`] converts a region
//! without caching the result.
//!
//! Depth access tolerates sensor holes: [`Depth::deproject`] widens its
//! sampling window over a configurable ring neighbourhood until a positive
//! mean depth is found.

use std::sync::Arc;

use glam::{IVec2, Vec3};
use rustc_hash::FxHashMap;

use crate::errors::{Fault, Result};
use crate::geometry::Rect;
use crate::image::{Image, Mode, Pixels};

/// 2D↔3D mapping attached to a depth image.
///
/// `zscale` converts integer depth samples to meters.
pub trait Projector: Send + Sync {
    fn project(&self, p: Vec3) -> IVec2;
    fn deproject(&self, p: IVec2, z: f32) -> Vec3;
    fn zscale(&self) -> f32;
}

/// Widening radii used to fill depth holes, in pixels.
pub const DEFAULT_NEIGHBOURHOOD: [u16; 7] = [0, 4, 8, 16, 32, 64, 128];

struct DepthBinding {
    mode: Mode,
    projector: Arc<dyn Projector>,
}

/// All visual data captured at one instant, keyed by mode.
#[derive(Default)]
pub struct View {
    images: FxHashMap<Mode, Image>,
    frame: Rect,
    depth: Option<DepthBinding>,
    timestamp_ms: u64,
    /// Ring radii tried by depth-hole fallback; empty uses the default.
    pub neighbourhood: Vec<u16>,
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("frame", &self.frame)
            .field("modes", &self.images.keys().collect::<Vec<_>>())
            .field("has_depth", &self.depth.is_some())
            .finish_non_exhaustive()
    }
}

impl Clone for View {
    fn clone(&self) -> Self {
        Self {
            images: self.images.clone(),
            frame: self.frame,
            depth: self.depth.as_ref().map(|d| DepthBinding {
                mode: d.mode,
                projector: Arc::clone(&d.projector),
            }),
            timestamp_ms: self.timestamp_ms,
            neighbourhood: self.neighbourhood.clone(),
        }
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

impl View {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn empty(&self) -> bool {
        self.images.is_empty()
    }

    #[must_use]
    pub const fn frame(&self) -> Rect {
        self.frame
    }

    /// Milliseconds since the epoch of the capture instant (0 when nothing
    /// has been registered yet).
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp_ms
    }

    /// Overrides the capture timestamp (used by replayed or synthetic
    /// sources).
    pub fn stamp(&mut self, timestamp_ms: u64) {
        self.timestamp_ms = timestamp_ms;
    }

    /// Registers the captured colour frame.
    ///
    /// The first registered image fixes the view frame. Re-registering the
    /// same mode is accepted only when the pixels are identical; a second
    /// colour image of a different mode is an [`Fault::InvalidRequest`].
    pub fn use_colour(&mut self, image: Image) -> Result<()> {
        if !image.mode().is_colour() {
            return Err(Fault::InvalidValue);
        }
        if self.timestamp_ms == 0 {
            self.timestamp_ms = now_ms();
        }

        if let Some(existing) = self.images.get(&image.mode()) {
            if existing.input() == image.input() {
                return Ok(());
            }
            log::warn!(
                "view: rejecting a different {} image for this capture",
                image.mode().name()
            );
            return Err(Fault::InvalidRequest);
        }
        if self.colour_source().is_some() {
            return Err(Fault::InvalidRequest);
        }

        self.frame = image.frame();
        self.images.insert(image.mode(), image);
        Ok(())
    }

    /// Registers the captured depth map with its projector.
    ///
    /// An existing depth image can be replaced only by a strictly more
    /// precise form (integer → float); identical re-registration is a no-op.
    pub fn use_depth(&mut self, image: Image, projector: Arc<dyn Projector>) -> Result<()> {
        if !image.mode().is_depth() {
            return Err(Fault::InvalidValue);
        }
        if self.timestamp_ms == 0 {
            self.timestamp_ms = now_ms();
        }

        if let Some(binding) = &self.depth {
            let current = binding.mode;
            if current == image.mode() {
                let identical = self
                    .images
                    .get(&current)
                    .is_some_and(|i| i.input() == image.input());
                return if identical { Ok(()) } else { Err(Fault::InvalidRequest) };
            }
            // Only an integer map may be upgraded to a float one.
            if !(current == Mode::Depth16 && image.mode() == Mode::DepthF) {
                return Err(Fault::InvalidRequest);
            }
        }

        let mode = image.mode();
        self.images.insert(mode, image);
        self.depth = Some(DepthBinding { mode, projector });
        Ok(())
    }

    /// The image already cached for `mode`, if any.
    #[must_use]
    pub fn cached(&self, mode: Mode) -> Option<&Image> {
        self.images.get(&mode)
    }

    /// The registered colour source, preferring BGR when materialised.
    #[must_use]
    pub fn colour_source(&self) -> Option<&Image> {
        self.images.get(&Mode::Bgr).or_else(|| {
            self.images
                .values()
                .find(|image| image.mode().is_colour())
        })
    }

    fn depth_source(&self) -> Option<&Image> {
        self.depth.as_ref().and_then(|d| self.images.get(&d.mode))
    }

    /// Scaling factor applied when converting between depth modes.
    #[must_use]
    pub fn depth_scaler(&self, from: Mode, to: Mode) -> f32 {
        let Some(binding) = &self.depth else {
            return 0.0;
        };
        let zscale = binding.projector.zscale();
        match (from, to) {
            (Mode::Depth16, Mode::DepthF) => zscale,
            (Mode::DepthF, Mode::Depth16) => 1.0 / zscale,
            _ => 1.0,
        }
    }

    /// Cached reference to the view in `mode`, materialising (and caching)
    /// the conversion when missing.
    pub fn image(&mut self, mode: Mode) -> Result<&Image> {
        self.cache(mode)
    }

    /// Forces `mode` into the cache and returns it.
    pub fn cache(&mut self, mode: Mode) -> Result<&Image> {
        if self.images.contains_key(&mode) {
            return Ok(&self.images[&mode]);
        }

        if mode.is_depth() {
            let source = self.depth_source().ok_or(Fault::NotExisting)?;
            let scale = self.depth_scaler(source.mode(), mode);
            let converted = source.translate_all(mode, scale, 0.0)?;
            self.images.insert(mode, converted);
            // A float map is the faster lookup; rebind it as the active one.
            if mode == Mode::DepthF {
                if let Some(binding) = &mut self.depth {
                    binding.mode = mode;
                }
            }
            return Ok(&self.images[&mode]);
        }

        // Visual target: materialise the BGR hub first.
        if !self.images.contains_key(&Mode::Bgr) {
            let source = self.colour_source().ok_or(Fault::NotExisting)?;
            let bgr = source.translate_all(Mode::Bgr, 1.0, 0.0)?;
            self.images.insert(Mode::Bgr, bgr);
        }
        if mode != Mode::Bgr {
            let converted = self.images[&Mode::Bgr].translate_all(mode, 1.0, 0.0)?;
            self.images.insert(mode, converted);
        }
        Ok(&self.images[&mode])
    }

    /// Fresh sub-image in `mode` over `roi`, skipping the cache for the
    /// converted result (a cached full image is still used as the source).
    pub fn image_roi(&self, mode: Mode, roi: Rect) -> Result<Image> {
        if let Some(image) = self.cached(mode) {
            return Ok(image.sub_image(roi));
        }

        if mode.is_depth() {
            let source = self.depth_source().ok_or(Fault::NotExisting)?;
            let scale = self.depth_scaler(source.mode(), mode);
            return source.translate(mode, roi, scale, 0.0);
        }

        let source = self.colour_source().ok_or(Fault::NotExisting)?;
        source.translate(mode, roi, 1.0, 0.0)
    }

    /// Read-only depth accessor proxy.
    #[must_use]
    pub fn depth(&self) -> Depth<'_> {
        Depth { view: self }
    }
}

/// Depth and projection queries over a [`View`].
#[derive(Clone, Copy)]
pub struct Depth<'a> {
    view: &'a View,
}

impl Depth<'_> {
    #[must_use]
    pub fn available(&self) -> bool {
        self.view.depth_source().is_some()
    }

    /// Depth in meters at one pixel; −1.0 outside the frame or when no
    /// depth map exists.
    #[must_use]
    pub fn at(&self, pix: IVec2) -> f32 {
        let Some(map) = self.view.depth_source() else {
            return -1.0;
        };
        if !map.frame().contains(pix) {
            return -1.0;
        }
        let index = (pix.y * map.frame().width + pix.x) as usize;
        match map.input() {
            Pixels::F32(v) => v[index],
            Pixels::U16(v) => {
                let zscale = self
                    .view
                    .depth
                    .as_ref()
                    .map_or(0.0, |d| d.projector.zscale());
                v[index] as f32 * zscale
            }
            Pixels::U8(_) => -1.0,
        }
    }

    /// Mean depth over the positive samples of `area`; −1.0 when no sample
    /// in the area is positive.
    #[must_use]
    pub fn at_rect(&self, area: Rect) -> f32 {
        let Some(map) = self.view.depth_source() else {
            return -1.0;
        };
        let roi = area.intersection(&map.frame());
        if roi.is_empty() {
            return -1.0;
        }

        let stride = map.frame().width as usize;
        let mut sum = 0.0f64;
        let mut count = 0usize;
        let mut tally = |v: f32| {
            if v > 0.0 {
                sum += f64::from(v);
                count += 1;
            }
        };
        match map.input() {
            Pixels::F32(v) => {
                for y in roi.y..roi.y + roi.height {
                    for x in roi.x..roi.x + roi.width {
                        tally(v[y as usize * stride + x as usize]);
                    }
                }
            }
            Pixels::U16(v) => {
                for y in roi.y..roi.y + roi.height {
                    for x in roi.x..roi.x + roi.width {
                        tally(v[y as usize * stride + x as usize] as f32);
                    }
                }
            }
            Pixels::U8(_) => return -1.0,
        }

        if count == 0 {
            return -1.0;
        }
        let mean = (sum / count as f64) as f32;
        if map.mode() == Mode::Depth16 {
            let zscale = self
                .view
                .depth
                .as_ref()
                .map_or(0.0, |d| d.projector.zscale());
            mean * zscale
        } else {
            mean
        }
    }

    /// Deprojects a pixel at a known depth. Without a projector, or with a
    /// non-positive depth, the point passes through with z = −1.
    #[must_use]
    pub fn deproject_at(&self, p: IVec2, z: f32) -> Vec3 {
        match (&self.view.depth, z > 0.0) {
            (Some(binding), true) => binding.projector.deproject(p, z),
            _ => Vec3::new(p.x as f32, p.y as f32, -1.0),
        }
    }

    /// Deprojects a pixel, widening the sampled window over the ring
    /// neighbourhood until a positive mean depth is found.
    #[must_use]
    pub fn deproject(&self, p: IVec2) -> Vec3 {
        let radii: &[u16] = if self.view.neighbourhood.is_empty() {
            &DEFAULT_NEIGHBOURHOOD
        } else {
            &self.view.neighbourhood
        };

        for &n in radii {
            let z = if n == 0 {
                self.at(p)
            } else {
                let n = i32::from(n);
                self.at_rect(Rect::new(p.x - n, p.y - n, 2 * n + 1, 2 * n + 1))
            };
            if z > 0.0 {
                return self.deproject_at(p, z);
            }
        }

        Vec3::new(p.x as f32, p.y as f32, -1.0)
    }

    /// Projects a 3D point back onto the pixel grid. Without a projector
    /// the x/y components pass through.
    #[must_use]
    pub fn project(&self, p: Vec3) -> IVec2 {
        match &self.view.depth {
            Some(binding) => binding.projector.project(p),
            None => IVec2::new(p.x as i32, p.y as i32),
        }
    }
}
