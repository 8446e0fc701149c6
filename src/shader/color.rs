//! CPU reference implementation of the effect shader.
//!
//! Mirrors `effects.wgsl` operation for operation so individual effects can be
//! tested without a GPU, and backs the software renderer.

use crate::effect::{Effect, EffectParams};
use crate::frame::VideoFrame;
use std::ops::{Add, Mul, Sub};

/// Linear RGB colour with unbounded `f32` channels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0.0, 0.0, 0.0);
    pub const WHITE: Rgb = Rgb::new(1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub const fn splat(v: f32) -> Self {
        Self::new(v, v, v)
    }

    pub fn from_rgba8(px: [u8; 4]) -> Self {
        Self::new(px[0] as f32 / 255.0, px[1] as f32 / 255.0, px[2] as f32 / 255.0)
    }

    /// Quantizes to bytes the way an `Rgba8Unorm` render target does.
    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), 255]
    }

    /// Rec. 601 luma.
    pub fn luminance(self) -> f32 {
        0.299 * self.r + 0.587 * self.g + 0.114 * self.b
    }

    pub fn mix(self, other: Rgb, t: f32) -> Rgb {
        self + (other - self) * t
    }

    pub fn map(self, f: impl Fn(f32) -> f32) -> Rgb {
        Rgb::new(f(self.r), f(self.g), f(self.b))
    }

    /// Largest per-channel absolute difference.
    pub fn distance(self, other: Rgb) -> f32 {
        (self.r - other.r)
            .abs()
            .max((self.g - other.g).abs())
            .max((self.b - other.b).abs())
    }
}

impl Add for Rgb {
    type Output = Rgb;
    fn add(self, o: Rgb) -> Rgb {
        Rgb::new(self.r + o.r, self.g + o.g, self.b + o.b)
    }
}

impl Sub for Rgb {
    type Output = Rgb;
    fn sub(self, o: Rgb) -> Rgb {
        Rgb::new(self.r - o.r, self.g - o.g, self.b - o.b)
    }
}

impl Mul<f32> for Rgb {
    type Output = Rgb;
    fn mul(self, s: f32) -> Rgb {
        Rgb::new(self.r * s, self.g * s, self.b * s)
    }
}

impl Mul for Rgb {
    type Output = Rgb;
    fn mul(self, o: Rgb) -> Rgb {
        Rgb::new(self.r * o.r, self.g * o.g, self.b * o.b)
    }
}

/// Anything the shader can sample with UV coordinates.
pub trait Texels {
    /// Texture size in texels.
    fn size(&self) -> (u32, u32);

    /// Bilinear, clamp-to-edge sample at `uv`.
    fn sample(&self, uv: [f32; 2]) -> Rgb;
}

impl Texels for VideoFrame {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn sample(&self, uv: [f32; 2]) -> Rgb {
        // Texel centres sit at (i + 0.5) / size.
        let x = uv[0] * self.width as f32 - 0.5;
        let y = uv[1] * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let fetch = |xi: f32, yi: f32| {
            let cx = xi.clamp(0.0, self.width as f32 - 1.0) as u32;
            let cy = yi.clamp(0.0, self.height as f32 - 1.0) as u32;
            Rgb::from_rgba8(self.pixel(cx, cy))
        };

        let top = fetch(x0, y0).mix(fetch(x0 + 1.0, y0), fx);
        let bottom = fetch(x0, y0 + 1.0).mix(fetch(x0 + 1.0, y0 + 1.0), fx);
        top.mix(bottom, fy)
    }
}

pub fn fract(v: f32) -> f32 {
    v - v.floor()
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Pinned sine hash, `fract(sin(dot(p, (12.9898, 78.233))) * 43758.5453)`.
pub fn hash(p: [f32; 2]) -> f32 {
    fract((p[0] * 12.9898 + p[1] * 78.233).sin() * 43758.5453)
}

/// Smoothly interpolated lattice noise over [`hash`].
pub fn value_noise(p: [f32; 2]) -> f32 {
    let i = [p[0].floor(), p[1].floor()];
    let f = [p[0] - i[0], p[1] - i[1]];
    let a = hash(i);
    let b = hash([i[0] + 1.0, i[1]]);
    let c = hash([i[0], i[1] + 1.0]);
    let d = hash([i[0] + 1.0, i[1] + 1.0]);
    let wx = f[0] * f[0] * (3.0 - 2.0 * f[0]);
    let wy = f[1] * f[1] * (3.0 - 2.0 * f[1]);
    mix(mix(a, b, wx), mix(c, d, wx), wy)
}

/// Shades the texel at `uv` with `effect`.
pub fn shade<T: Texels + ?Sized>(tex: &T, uv: [f32; 2], effect: Effect) -> Rgb {
    let params = effect.params();
    match effect {
        Effect::None => tex.sample(uv),
        Effect::Tritone => tritone(tex.sample(uv), params),
        Effect::SplitTone => split_tone(tex.sample(uv), params),
        Effect::Solarize => solarize(tex.sample(uv), params),
        Effect::ScreenPrint => screen_print(tex, uv, params),
        Effect::Cyanotype => cyanotype(tex, uv, params),
    }
}

pub fn tritone(c: Rgb, p: &EffectParams) -> Rgb {
    let l = c.luminance();
    let [c1, c2, c3] = p.anchors;
    if l < 0.5 {
        c1.mix(c2, l * 2.0)
    } else {
        c2.mix(c3, (l - 0.5) * 2.0)
    }
}

pub fn split_tone(c: Rgb, p: &EffectParams) -> Rgb {
    let tone = p.anchors[0].mix(p.anchors[1], c.luminance());
    c.mix(tone, p.blend)
}

pub fn solarize(c: Rgb, p: &EffectParams) -> Rgb {
    let flipped = if c.luminance() > p.threshold {
        c.map(|v| 1.0 - v)
    } else {
        c
    };
    flipped * p.gain
}

pub fn screen_print<T: Texels + ?Sized>(tex: &T, uv: [f32; 2], p: &EffectParams) -> Rgb {
    let red_uv = [uv[0] + p.offset, uv[1] + p.offset];
    let blue_off = p.offset * p.offset_ratio;
    let blue_uv = [uv[0] + blue_off, uv[1] + blue_off];

    let misregistered = Rgb::new(tex.sample(red_uv).r, tex.sample(uv).g, tex.sample(blue_uv).b);
    misregistered
        .map(|v| (v * p.levels).floor() / p.levels)
        .map(|v| v.powf(p.gamma))
}

pub fn cyanotype<T: Texels + ?Sized>(tex: &T, uv: [f32; 2], p: &EffectParams) -> Rgb {
    let (w, h) = tex.size();
    let texel = [1.0 / w as f32, 1.0 / h as f32];
    let lum = |dx: f32, dy: f32| tex.sample([uv[0] + dx, uv[1] + dy]).luminance();

    // Unsharp mask against the 4-neighbour average.
    let center = lum(0.0, 0.0);
    let blur = (lum(0.0, -texel[1]) + lum(0.0, texel[1]) + lum(texel[0], 0.0) + lum(-texel[0], 0.0)) * 0.25;
    let sharp = ((center + (center - blur)) * p.sharpen).clamp(0.0, 1.0);

    let mut tone = smoothstep(p.contrast_low, p.contrast_high, sharp);
    tone = tone * tone * (3.0 - 2.0 * tone);

    let steps = p.levels - 1.0;
    let poster = (tone * p.levels).floor().min(steps) / steps;

    // Halftone cells, jittered and occasionally dropped.
    let pixel = [uv[0] * w as f32, uv[1] * h as f32];
    let grid = [pixel[0] / p.dot_pitch, pixel[1] / p.dot_pitch];
    let cell = [grid[0].floor(), grid[1].floor()];
    let local = [fract(grid[0]) - 0.5, fract(grid[1]) - 0.5];
    let jitter = [hash(cell) - 0.5, hash([cell[0] + 17.0, cell[1] + 31.0]) - 0.5];
    let dx = local[0] + jitter[0] * 0.3;
    let dy = local[1] + jitter[1] * 0.3;
    let dist = (dx * dx + dy * dy).sqrt();
    let radius = (1.0 - poster).sqrt() * 0.5;
    let mut dots = smoothstep(radius - 0.08, radius + 0.08, dist);
    let pick = hash([cell[0] + 5.3, cell[1] + 9.7]);
    if pick > 1.0 - p.dropout {
        dots = 1.0;
    }
    if pick < p.dropout {
        dots = 0.0;
    }
    let mut out = mix(poster, dots, p.halftone_mix);

    let edge = 1.0 - smoothstep(0.0, 0.25, (poster - 0.5).abs());
    out = mix(out, hash(pixel), p.edge_mix * edge);

    let grain = value_noise([pixel[0] * 0.75, pixel[1] * 0.75]);
    out = mix(out, grain, p.grain_mix);

    p.anchors[0].mix(p.anchors[1], out.clamp(0.0, 1.0))
}
