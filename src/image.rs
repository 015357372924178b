//! Typed Pixel Buffers
//!
//! An [`Image`] couples a pixel buffer with its colour [`Mode`] and frame
//! rectangle. Images translate between modes on demand: BGR acts as the hub
//! for colour conversions (one step when BGR is an endpoint, two steps via
//! BGR otherwise), and depth images convert between integer and floating
//! representations with a linear `scale`/`offset`.
//!
//! A separate, lazily materialised scratch copy backs [`Image::drawable`] so
//! annotation never corrupts the captured original.
//!
//! # Storage
//!
//! Pixels are row-major and channel-interleaved. Colour and gray modes store
//! `u8`, `Depth16` stores `u16`, `DepthF` and `Motion` store `f32`.

use bitflags::bitflags;

use crate::errors::{Fault, Result};
use crate::geometry::Rect;

bitflags! {
    /// Set of image modes, used to describe channel compatibility.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ModeSet: u16 {
        const BGR     = 1 << 0;
        const HSV     = 1 << 1;
        const YUV     = 1 << 2;
        const YCRCB   = 1 << 3;
        const GRAY    = 1 << 4;
        const DEPTH16 = 1 << 5;
        const DEPTHF  = 1 << 6;
        const MOTION  = 1 << 7;
    }
}

/// Colour space / content mode of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Unknown content; never valid for a materialised image.
    #[default]
    Ambiguous,
    Bgr,
    Hsv,
    Yuv,
    YCrCb,
    Gray,
    /// Integer depth in sensor units (scaled to meters by a projector).
    Depth16,
    /// Floating-point depth in meters.
    DepthF,
    /// Per-pixel 2D motion vectors.
    Motion,
}

impl Mode {
    /// Number of interleaved channels for this mode (0 when ambiguous).
    #[must_use]
    pub const fn channels(self) -> usize {
        match self {
            Self::Bgr | Self::Hsv | Self::Yuv | Self::YCrCb => 3,
            Self::Motion => 2,
            Self::Gray | Self::Depth16 | Self::DepthF => 1,
            Self::Ambiguous => 0,
        }
    }

    #[must_use]
    pub const fn is_colour(self) -> bool {
        matches!(self, Self::Bgr | Self::Hsv | Self::Yuv | Self::YCrCb)
    }

    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth16 | Self::DepthF)
    }

    #[must_use]
    pub const fn is_gray(self) -> bool {
        matches!(self, Self::Gray)
    }

    #[must_use]
    pub const fn is_motion(self) -> bool {
        matches!(self, Self::Motion)
    }

    /// An image mode (as opposed to depth) can host colour conversions.
    #[must_use]
    pub const fn is_visual(self) -> bool {
        self.is_colour() || self.is_gray()
    }

    #[must_use]
    pub const fn valid(self) -> bool {
        self.channels() != 0
    }

    /// Singleton [`ModeSet`] for this mode.
    #[must_use]
    pub const fn bit(self) -> ModeSet {
        match self {
            Self::Bgr => ModeSet::BGR,
            Self::Hsv => ModeSet::HSV,
            Self::Yuv => ModeSet::YUV,
            Self::YCrCb => ModeSet::YCRCB,
            Self::Gray => ModeSet::GRAY,
            Self::Depth16 => ModeSet::DEPTH16,
            Self::DepthF => ModeSet::DEPTHF,
            Self::Motion => ModeSet::MOTION,
            Self::Ambiguous => ModeSet::empty(),
        }
    }

    /// Parses a mode from its configuration name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "BGR" => Self::Bgr,
            "HSV" => Self::Hsv,
            "YUV" => Self::Yuv,
            "YCrCb" => Self::YCrCb,
            "GRAY" => Self::Gray,
            "DEPTH16" => Self::Depth16,
            "DEPTHF" => Self::DepthF,
            "MOTION" => Self::Motion,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ambiguous => "AMBIGUOUS",
            Self::Bgr => "BGR",
            Self::Hsv => "HSV",
            Self::Yuv => "YUV",
            Self::YCrCb => "YCrCb",
            Self::Gray => "GRAY",
            Self::Depth16 => "DEPTH16",
            Self::DepthF => "DEPTHF",
            Self::Motion => "MOTION",
        }
    }
}

/// A named channel within one or more image modes.
///
/// Some channels exist in several spaces (`V` in HSV and YUV, `Y` in YUV,
/// YCrCb and GRAY); a channel resolves to a plane index only within a
/// compatible mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    B,
    G,
    R,
    H,
    S,
    V,
    Y,
    U,
    Cr,
    Cb,
    Vx,
    Vy,
}

impl Channel {
    /// Modes this channel belongs to.
    #[must_use]
    pub const fn modes(self) -> ModeSet {
        match self {
            Self::B | Self::G | Self::R => ModeSet::BGR,
            Self::H | Self::S => ModeSet::HSV,
            Self::V => ModeSet::HSV.union(ModeSet::YUV),
            Self::Y => ModeSet::YUV.union(ModeSet::YCRCB).union(ModeSet::GRAY),
            Self::U => ModeSet::YUV,
            Self::Cr | Self::Cb => ModeSet::YCRCB,
            Self::Vx | Self::Vy => ModeSet::MOTION,
        }
    }

    /// Plane index of this channel inside `mode`, if compatible.
    #[must_use]
    pub const fn index_in(self, mode: Mode) -> Option<usize> {
        if !self.modes().contains(mode.bit()) {
            return None;
        }
        let index = match self {
            Self::B | Self::H | Self::Y | Self::Vx => 0,
            Self::G | Self::S | Self::U | Self::Cr | Self::Vy => 1,
            Self::R | Self::V | Self::Cb => 2,
        };
        if index < mode.channels() { Some(index) } else { None }
    }
}

/// Raw pixel storage, typed by sample width.
#[derive(Debug, Clone, PartialEq)]
pub enum Pixels {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl Pixels {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this storage type is the one `mode` mandates.
    #[must_use]
    pub const fn suits(&self, mode: Mode) -> bool {
        match self {
            Self::U8(_) => mode.is_colour() || mode.is_gray(),
            Self::U16(_) => matches!(mode, Mode::Depth16),
            Self::F32(_) => matches!(mode, Mode::DepthF | Mode::Motion),
        }
    }
}

/// A single extracted channel plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub frame: Rect,
    pub data: Pixels,
}

/// A typed pixel buffer with an optional scratch copy for annotation.
#[derive(Debug, Default)]
pub struct Image {
    mode: Mode,
    frame: Rect,
    original: Pixels,
    scratch: Option<Pixels>,
}

/// Copies keep the captured original only; the scratch copy stays behind.
impl Clone for Image {
    fn clone(&self) -> Self {
        Self {
            mode: self.mode,
            frame: self.frame,
            original: self.original.clone(),
            scratch: None,
        }
    }
}

impl Default for Pixels {
    fn default() -> Self {
        Self::U8(Vec::new())
    }
}

impl Image {
    /// Wraps a pixel buffer as an image of the given mode.
    ///
    /// Fails with [`Fault::TypeMismatch`] when the storage type does not
    /// suit the mode and [`Fault::InvalidValue`] when the buffer length does
    /// not match `width * height * channels`.
    pub fn new(data: Pixels, mode: Mode, width: i32, height: i32) -> Result<Self> {
        if !mode.valid() {
            return Err(Fault::InvalidValue);
        }
        if !data.suits(mode) {
            return Err(Fault::TypeMismatch);
        }
        let expected = width as usize * height as usize * mode.channels();
        if width <= 0 || height <= 0 || data.len() != expected {
            return Err(Fault::InvalidValue);
        }
        Ok(Self {
            mode,
            frame: Rect::of_size(width, height),
            original: data,
            scratch: None,
        })
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub const fn frame(&self) -> Rect {
        self.frame
    }

    #[must_use]
    pub const fn valid(&self) -> bool {
        self.mode.valid()
    }

    /// The captured original buffer.
    #[must_use]
    pub const fn input(&self) -> &Pixels {
        &self.original
    }

    /// The presentation buffer: the scratch copy when one was materialised,
    /// the original otherwise.
    #[must_use]
    pub fn output(&self) -> &Pixels {
        self.scratch.as_ref().unwrap_or(&self.original)
    }

    /// Mutable scratch copy, cloned from the original on first access.
    pub fn drawable(&mut self) -> &mut Pixels {
        if self.scratch.is_none() {
            self.scratch = Some(self.original.clone());
        }
        self.scratch.as_mut().expect("scratch just materialised")
    }

    /// Rewrites the scratch copy from the original.
    pub fn flush(&mut self) {
        self.scratch = Some(self.original.clone());
    }

    /// Whether a translation into `mode` is defined for this image.
    ///
    /// Defined iff both modes are depth modes, or both are visual modes
    /// (colour/gray). Colour↔depth never translates.
    #[must_use]
    pub fn translatable(&self, mode: Mode) -> bool {
        if !mode.valid() || !self.mode.valid() {
            return false;
        }
        if self.mode == mode {
            return true;
        }
        if self.mode.is_depth() && mode.is_depth() {
            return true;
        }
        self.mode.is_visual() && mode.is_visual()
    }

    /// Deep copy of a region of interest, same mode.
    #[must_use]
    pub fn sub_image(&self, roi: Rect) -> Self {
        let roi = roi.intersection(&self.frame);
        let data = crop(&self.original, self.frame, roi, self.mode.channels());
        Self {
            mode: self.mode,
            frame: Rect::of_size(roi.width.max(0), roi.height.max(0)),
            original: data,
            scratch: None,
        }
    }

    /// Translates a region of interest into another mode.
    ///
    /// Same-mode translation deep-copies the ROI. Depth-to-depth conversion
    /// applies `v * scale + offset` while switching the sample type.
    /// Colour translations route through BGR as the hub. Fails with
    /// [`Fault::Unsupported`] when the mode pair is not translatable.
    pub fn translate(&self, mode: Mode, roi: Rect, scale: f32, offset: f32) -> Result<Self> {
        if !self.translatable(mode) {
            log::warn!(
                "image: no translation from {} to {}",
                self.mode.name(),
                mode.name()
            );
            return Err(Fault::Unsupported);
        }

        let cropped = self.sub_image(roi);
        if self.mode == mode {
            return Ok(cropped);
        }

        if self.mode.is_depth() {
            return depth_convert(&cropped, mode, scale, offset);
        }

        // Visual conversion through the BGR hub.
        let bgr = if self.mode == Mode::Bgr {
            cropped
        } else {
            visual_to_from_bgr(&cropped, Mode::Bgr)?
        };
        if mode == Mode::Bgr {
            return Ok(bgr);
        }
        visual_to_from_bgr(&bgr, mode)
    }

    /// Translates the whole frame into another mode.
    pub fn translate_all(&self, mode: Mode, scale: f32, offset: f32) -> Result<Self> {
        self.translate(mode, self.frame, scale, offset)
    }

    /// Extracts a single channel plane over a region of interest.
    ///
    /// Fails with [`Fault::Unsupported`] when the channel does not belong to
    /// the current mode.
    pub fn extract(&self, channel: Channel, roi: Rect) -> Result<Plane> {
        let Some(index) = channel.index_in(self.mode) else {
            log::warn!(
                "image: channel {channel:?} is not part of mode {}",
                self.mode.name()
            );
            return Err(Fault::Unsupported);
        };

        let roi = roi.intersection(&self.frame);
        let channels = self.mode.channels();
        let data = match &self.original {
            Pixels::U8(v) => Pixels::U8(extract_plane(v, self.frame, roi, channels, index)),
            Pixels::U16(v) => Pixels::U16(extract_plane(v, self.frame, roi, channels, index)),
            Pixels::F32(v) => Pixels::F32(extract_plane(v, self.frame, roi, channels, index)),
        };
        Ok(Plane {
            frame: Rect::of_size(roi.width.max(0), roi.height.max(0)),
            data,
        })
    }
}

fn crop(data: &Pixels, frame: Rect, roi: Rect, channels: usize) -> Pixels {
    match data {
        Pixels::U8(v) => Pixels::U8(crop_typed(v, frame, roi, channels)),
        Pixels::U16(v) => Pixels::U16(crop_typed(v, frame, roi, channels)),
        Pixels::F32(v) => Pixels::F32(crop_typed(v, frame, roi, channels)),
    }
}

fn crop_typed<T: Copy>(data: &[T], frame: Rect, roi: Rect, channels: usize) -> Vec<T> {
    if roi.is_empty() {
        return Vec::new();
    }
    if roi == frame {
        return data.to_vec();
    }
    let stride = frame.width as usize * channels;
    let row_len = roi.width as usize * channels;
    let mut out = Vec::with_capacity(roi.height as usize * row_len);
    for row in 0..roi.height as usize {
        let y = roi.y as usize + row;
        let start = y * stride + roi.x as usize * channels;
        out.extend_from_slice(&data[start..start + row_len]);
    }
    out
}

fn extract_plane<T: Copy>(
    data: &[T],
    frame: Rect,
    roi: Rect,
    channels: usize,
    index: usize,
) -> Vec<T> {
    if roi.is_empty() {
        return Vec::new();
    }
    let stride = frame.width as usize * channels;
    let mut out = Vec::with_capacity(roi.area() as usize);
    for row in 0..roi.height as usize {
        let y = roi.y as usize + row;
        let base = y * stride + roi.x as usize * channels;
        for col in 0..roi.width as usize {
            out.push(data[base + col * channels + index]);
        }
    }
    out
}

fn depth_convert(src: &Image, mode: Mode, scale: f32, offset: f32) -> Result<Image> {
    let frame = src.frame;
    let data = match (&src.original, mode) {
        (Pixels::U16(v), Mode::DepthF) => {
            Pixels::F32(v.iter().map(|&d| d as f32 * scale + offset).collect())
        }
        (Pixels::F32(v), Mode::Depth16) => Pixels::U16(
            v.iter()
                .map(|&d| (d * scale + offset).round().clamp(0.0, 65_535.0) as u16)
                .collect(),
        ),
        _ => return Err(Fault::Unsupported),
    };
    Image::new(data, mode, frame.width, frame.height)
}

/// One-step visual conversion where either endpoint is BGR (or gray).
fn visual_to_from_bgr(src: &Image, target: Mode) -> Result<Image> {
    let Pixels::U8(data) = &src.original else {
        return Err(Fault::TypeMismatch);
    };
    let frame = src.frame;
    let out = match (src.mode, target) {
        (Mode::Bgr, Mode::Gray) => per_pixel3_to1(data, bgr_to_gray),
        (Mode::Gray, Mode::Bgr) => data.iter().flat_map(|&y| [y, y, y]).collect(),
        (Mode::Bgr, Mode::Hsv) => per_pixel3(data, bgr_to_hsv),
        (Mode::Hsv, Mode::Bgr) => per_pixel3(data, hsv_to_bgr),
        (Mode::Bgr, Mode::Yuv) => per_pixel3(data, bgr_to_yuv),
        (Mode::Yuv, Mode::Bgr) => per_pixel3(data, yuv_to_bgr),
        (Mode::Bgr, Mode::YCrCb) => per_pixel3(data, bgr_to_ycrcb),
        (Mode::YCrCb, Mode::Bgr) => per_pixel3(data, ycrcb_to_bgr),
        _ => {
            debug_assert!(false, "conversion must have BGR as one endpoint");
            return Err(Fault::Unsupported);
        }
    };
    Image::new(Pixels::U8(out), target, frame.width, frame.height)
}

fn per_pixel3(data: &[u8], f: fn([u8; 3]) -> [u8; 3]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for px in data.chunks_exact(3) {
        out.extend_from_slice(&f([px[0], px[1], px[2]]));
    }
    out
}

fn per_pixel3_to1(data: &[u8], f: fn([u8; 3]) -> u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 3);
    for px in data.chunks_exact(3) {
        out.push(f([px[0], px[1], px[2]]));
    }
    out
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

// Rec.601 luma weights; shared by GRAY, YUV and YCrCb.
fn luma(b: f32, g: f32, r: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

fn bgr_to_gray([b, g, r]: [u8; 3]) -> u8 {
    clamp_u8(luma(b as f32, g as f32, r as f32))
}

fn bgr_to_ycrcb([b, g, r]: [u8; 3]) -> [u8; 3] {
    let (b, g, r) = (b as f32, g as f32, r as f32);
    let y = luma(b, g, r);
    let cr = (r - y) * 0.713 + 128.0;
    let cb = (b - y) * 0.564 + 128.0;
    [clamp_u8(y), clamp_u8(cr), clamp_u8(cb)]
}

fn ycrcb_to_bgr([y, cr, cb]: [u8; 3]) -> [u8; 3] {
    let (y, cr, cb) = (y as f32, cr as f32 - 128.0, cb as f32 - 128.0);
    let r = y + 1.403 * cr;
    let g = y - 0.714 * cr - 0.344 * cb;
    let b = y + 1.773 * cb;
    [clamp_u8(b), clamp_u8(g), clamp_u8(r)]
}

fn bgr_to_yuv([b, g, r]: [u8; 3]) -> [u8; 3] {
    let (b, g, r) = (b as f32, g as f32, r as f32);
    let y = luma(b, g, r);
    let u = (b - y) * 0.492 + 128.0;
    let v = (r - y) * 0.877 + 128.0;
    [clamp_u8(y), clamp_u8(u), clamp_u8(v)]
}

fn yuv_to_bgr([y, u, v]: [u8; 3]) -> [u8; 3] {
    let (y, u, v) = (y as f32, u as f32 - 128.0, v as f32 - 128.0);
    let r = y + 1.140 * v;
    let g = y - 0.395 * u - 0.581 * v;
    let b = y + 2.032 * u;
    [clamp_u8(b), clamp_u8(g), clamp_u8(r)]
}

fn bgr_to_hsv([b, g, r]: [u8; 3]) -> [u8; 3] {
    let (bf, gf, rf) = (b as f32, g as f32, r as f32);
    let max = bf.max(gf).max(rf);
    let min = bf.min(gf).min(rf);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let h = if delta > 0.0 {
        let h = if (max - rf).abs() < f32::EPSILON {
            60.0 * (gf - bf) / delta
        } else if (max - gf).abs() < f32::EPSILON {
            120.0 + 60.0 * (bf - rf) / delta
        } else {
            240.0 + 60.0 * (rf - gf) / delta
        };
        let h = if h < 0.0 { h + 360.0 } else { h };
        // Stored on a half-degree scale to fit eight bits.
        h / 2.0
    } else {
        0.0
    };

    [clamp_u8(h), clamp_u8(s), clamp_u8(v)]
}

fn hsv_to_bgr([h, s, v]: [u8; 3]) -> [u8; 3] {
    let h = h as f32 * 2.0;
    let s = s as f32 / 255.0;
    let v = v as f32;

    let c = v * s;
    let sector = (h / 60.0) % 6.0;
    let x = c * (1.0 - ((sector % 2.0) - 1.0).abs());
    let m = v - c;

    let (r1, g1, b1) = match sector as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    [clamp_u8(b1 + m), clamp_u8(g1 + m), clamp_u8(r1 + m)]
}
