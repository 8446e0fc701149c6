//! Viewport sizing and cover-fit quad geometry.

/// Aspect ratio the video is assumed to have, regardless of what it decodes to.
pub const SOURCE_ASPECT: f64 = 16.0 / 9.0;

/// Output surface size in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportGeometry {
    pub width: u32,
    pub height: u32,
}

impl ViewportGeometry {
    /// Zero dimensions are bumped to one pixel.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }
}

/// The rendered quad, sized to cover the viewport with overflow cropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverQuad {
    pub width: f64,
    pub height: f64,
    viewport: ViewportGeometry,
}

impl CoverQuad {
    /// Covers `viewport` with a quad of the fixed source aspect.
    pub fn fit(viewport: ViewportGeometry) -> Self {
        Self::fit_aspect(viewport, SOURCE_ASPECT)
    }

    pub fn fit_aspect(viewport: ViewportGeometry, aspect: f64) -> Self {
        let vw = viewport.width as f64;
        let vh = viewport.height as f64;

        let width_driven = (vw, vw / aspect);
        let height_driven = (vh * aspect, vh);
        let (width, height) = if width_driven.1 >= vh {
            width_driven
        } else {
            height_driven
        };

        Self {
            width: width.max(vw),
            height: height.max(vh),
            viewport,
        }
    }

    /// Quad extent relative to the viewport, as the vertex shader scale.
    pub fn scale(&self) -> [f32; 2] {
        [
            (self.width / self.viewport.width as f64) as f32,
            (self.height / self.viewport.height as f64) as f32,
        ]
    }

    pub fn covers(&self, viewport: ViewportGeometry) -> bool {
        self.width >= viewport.width as f64 && self.height >= viewport.height as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEWPORTS: &[(u32, u32)] = &[
        (1920, 1080),
        (1280, 720),
        (1080, 1920),
        (390, 844),
        (2560, 1080),
        (3440, 1440),
        (800, 800),
        (1, 1),
        (1, 4000),
        (4000, 1),
        (1366, 768),
        (1024, 1366),
    ];

    #[test]
    fn quad_always_covers_viewport() {
        for &(w, h) in VIEWPORTS {
            let viewport = ViewportGeometry::new(w, h);
            let quad = CoverQuad::fit(viewport);
            assert!(quad.covers(viewport), "{w}x{h} -> {quad:?}");
            let [sx, sy] = quad.scale();
            assert!(sx >= 1.0 && sy >= 1.0);
        }
    }

    #[test]
    fn quad_keeps_sixteen_by_nine() {
        for &(w, h) in VIEWPORTS {
            let quad = CoverQuad::fit(ViewportGeometry::new(w, h));
            let ratio = quad.width / quad.height;
            assert!((ratio - SOURCE_ASPECT).abs() < 1e-9, "{w}x{h} -> {ratio}");
        }
    }

    #[test]
    fn one_axis_matches_viewport_exactly() {
        let tall = CoverQuad::fit(ViewportGeometry::new(1080, 1920));
        assert_eq!(tall.height, 1920.0);
        assert!(tall.width > 1080.0);

        let wide = CoverQuad::fit(ViewportGeometry::new(2560, 1080));
        assert_eq!(wide.width, 2560.0);
        assert!((wide.height - 1440.0).abs() < 1e-9);

        let exact = CoverQuad::fit(ViewportGeometry::new(1280, 720));
        assert_eq!(exact.scale(), [1.0, 1.0]);
    }

    #[test]
    fn zero_viewport_is_clamped() {
        let viewport = ViewportGeometry::new(0, 0);
        assert_eq!(viewport, ViewportGeometry::new(1, 1));
        assert!(CoverQuad::fit(viewport).covers(viewport));
    }
}
