//! Effect registry: the closed set of shader transforms and their constants.

use crate::shader::color::Rgb;
use std::fmt;

/// A stylistic transform applied by the fragment shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Effect {
    #[default]
    None = 0,
    Tritone = 1,
    SplitTone = 2,
    Solarize = 3,
    ScreenPrint = 4,
    Cyanotype = 5,
}

impl Effect {
    pub const ALL: [Effect; 6] = [
        Effect::None,
        Effect::Tritone,
        Effect::SplitTone,
        Effect::Solarize,
        Effect::ScreenPrint,
        Effect::Cyanotype,
    ];

    /// Maps an integer selector to an effect. Anything out of range is pass-through.
    pub fn from_selector(selector: i64) -> Self {
        match selector {
            1 => Effect::Tritone,
            2 => Effect::SplitTone,
            3 => Effect::Solarize,
            4 => Effect::ScreenPrint,
            5 => Effect::Cyanotype,
            _ => Effect::None,
        }
    }

    /// Looks an effect up by name (case-insensitive, `-`/`_` ignored) or by number.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if let Ok(n) = trimmed.parse::<i64>() {
            return Some(Self::from_selector(n));
        }
        let key: String = trimmed
            .chars()
            .filter(|c| *c != '-' && *c != '_' && !c.is_whitespace())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL.into_iter().find(|e| e.key() == key)
    }

    pub fn selector(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Tritone => "tritone",
            Effect::SplitTone => "split-tone",
            Effect::Solarize => "solarize",
            Effect::ScreenPrint => "screen-print",
            Effect::Cyanotype => "cyanotype",
        }
    }

    fn key(self) -> String {
        self.name().replace('-', "")
    }

    /// Constants baked into this effect.
    pub fn params(self) -> &'static EffectParams {
        match self {
            Effect::None => &PASS_THROUGH,
            Effect::Tritone => &TRITONE,
            Effect::SplitTone => &SPLIT_TONE,
            Effect::Solarize => &SOLARIZE,
            Effect::ScreenPrint => &SCREEN_PRINT,
            Effect::Cyanotype => &CYANOTYPE,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.selector())
    }
}

/// Per-effect constants. Fields an effect does not read stay zero.
///
/// The same table feeds the WGSL uniform block and the CPU reference shader,
/// so both always agree on anchors and thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectParams {
    /// Tritone: dark/mid/light anchors. Split-tone: shadow/highlight.
    /// Cyanotype: ink floor and accent.
    pub anchors: [Rgb; 3],
    /// Per-channel gain applied after solarizing.
    pub gain: Rgb,
    /// Split-tone weight of the graded colour against the original.
    pub blend: f32,
    /// Solarize luminance threshold (strict).
    pub threshold: f32,
    /// Screen-print red channel offset in UV units.
    pub offset: f32,
    /// Screen-print blue offset as a multiple of `offset`.
    pub offset_ratio: f32,
    /// Posterization levels.
    pub levels: f32,
    pub gamma: f32,
    /// Cyanotype unsharp-mask output scale.
    pub sharpen: f32,
    pub contrast_low: f32,
    pub contrast_high: f32,
    /// Halftone dot pitch in texels.
    pub dot_pitch: f32,
    /// Share of halftone cells forced dark; the same share at the top is forced light.
    pub dropout: f32,
    pub halftone_mix: f32,
    pub edge_mix: f32,
    pub grain_mix: f32,
}

const BASE: EffectParams = EffectParams {
    anchors: [Rgb::BLACK; 3],
    gain: Rgb::WHITE,
    blend: 0.0,
    threshold: 0.0,
    offset: 0.0,
    offset_ratio: 0.0,
    levels: 0.0,
    gamma: 1.0,
    sharpen: 0.0,
    contrast_low: 0.0,
    contrast_high: 1.0,
    dot_pitch: 0.0,
    dropout: 0.0,
    halftone_mix: 0.0,
    edge_mix: 0.0,
    grain_mix: 0.0,
};

pub const PASS_THROUGH: EffectParams = BASE;

pub const TRITONE: EffectParams = EffectParams {
    anchors: [
        Rgb::new(0.05, 0.05, 0.05),
        Rgb::new(0.8, 0.3, 0.1),
        Rgb::new(0.95, 0.9, 0.8),
    ],
    ..BASE
};

pub const SPLIT_TONE: EffectParams = EffectParams {
    anchors: [Rgb::new(0.1, 0.2, 0.4), Rgb::new(1.0, 0.8, 0.4), Rgb::BLACK],
    blend: 0.7,
    ..BASE
};

pub const SOLARIZE: EffectParams = EffectParams {
    gain: Rgb::new(1.1, 0.9, 1.2),
    threshold: 0.4,
    ..BASE
};

pub const SCREEN_PRINT: EffectParams = EffectParams {
    offset: 0.004,
    offset_ratio: -1.5,
    levels: 4.0,
    gamma: 1.2,
    ..BASE
};

pub const CYANOTYPE: EffectParams = EffectParams {
    anchors: [Rgb::BLACK, Rgb::new(0.902, 0.361, 0.220), Rgb::BLACK],
    levels: 5.0,
    sharpen: 1.3,
    contrast_low: 0.15,
    contrast_high: 0.85,
    dot_pitch: 2.5,
    dropout: 0.08,
    halftone_mix: 0.10,
    edge_mix: 0.15,
    grain_mix: 0.04,
    ..BASE
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_round_trip_through_registry() {
        for effect in Effect::ALL {
            assert_eq!(Effect::from_selector(effect.selector() as i64), effect);
        }
    }

    #[test]
    fn out_of_range_selector_is_pass_through() {
        assert_eq!(Effect::from_selector(-1), Effect::None);
        assert_eq!(Effect::from_selector(6), Effect::None);
        assert_eq!(Effect::from_selector(i64::MAX), Effect::None);
    }

    #[test]
    fn parse_accepts_names_and_numbers() {
        assert_eq!(Effect::parse("cyanotype"), Some(Effect::Cyanotype));
        assert_eq!(Effect::parse("Split_Tone"), Some(Effect::SplitTone));
        assert_eq!(Effect::parse("screen-print"), Some(Effect::ScreenPrint));
        assert_eq!(Effect::parse(" 3 "), Some(Effect::Solarize));
        assert_eq!(Effect::parse("42"), Some(Effect::None));
        assert_eq!(Effect::parse("sepia"), None);
    }

    #[test]
    fn table_carries_documented_constants() {
        assert_eq!(Effect::Tritone.params().anchors[1], Rgb::new(0.8, 0.3, 0.1));
        assert_eq!(Effect::Solarize.params().threshold, 0.4);
        let print = Effect::ScreenPrint.params();
        assert!((print.offset * print.offset_ratio + 0.006).abs() < 1e-7);
        assert_eq!(Effect::Cyanotype.params().anchors[1], Rgb::new(0.902, 0.361, 0.220));
        assert_eq!(Effect::None.params(), &PASS_THROUGH);
    }
}
