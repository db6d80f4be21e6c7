use crate::types::{S2Error, S2Result};
use serde::{Deserialize, Serialize};

/// Sequential colour ramps used for single-band views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorMap {
    Blues,
    Greens,
    Reds,
    Greys,
}

type Stop = (f64, [u8; 3]);

// Light-to-dark ramps sampled from the matplotlib sequential maps
const BLUES: [Stop; 5] = [
    (0.0, [247, 251, 255]),
    (0.25, [198, 219, 239]),
    (0.5, [107, 174, 214]),
    (0.75, [33, 113, 181]),
    (1.0, [8, 48, 107]),
];
const GREENS: [Stop; 5] = [
    (0.0, [247, 252, 245]),
    (0.25, [199, 233, 192]),
    (0.5, [116, 196, 118]),
    (0.75, [35, 139, 69]),
    (1.0, [0, 68, 27]),
];
const REDS: [Stop; 5] = [
    (0.0, [255, 245, 240]),
    (0.25, [252, 187, 161]),
    (0.5, [251, 106, 74]),
    (0.75, [203, 24, 29]),
    (1.0, [103, 0, 13]),
];
const GREYS: [Stop; 2] = [(0.0, [255, 255, 255]), (1.0, [0, 0, 0])];

impl ColorMap {
    pub fn name(&self) -> &'static str {
        match self {
            ColorMap::Blues => "Blues",
            ColorMap::Greens => "Greens",
            ColorMap::Reds => "Reds",
            ColorMap::Greys => "Greys",
        }
    }

    pub fn parse(name: &str) -> S2Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "blues" => Ok(ColorMap::Blues),
            "greens" => Ok(ColorMap::Greens),
            "reds" => Ok(ColorMap::Reds),
            "greys" | "grays" => Ok(ColorMap::Greys),
            _ => Err(S2Error::InvalidParameter(format!("Unknown colour map: {}", name))),
        }
    }

    fn stops(&self) -> &'static [Stop] {
        match self {
            ColorMap::Blues => &BLUES,
            ColorMap::Greens => &GREENS,
            ColorMap::Reds => &REDS,
            ColorMap::Greys => &GREYS,
        }
    }

    /// Colour of `value` in [0, 1]; out-of-range values are clamped, no-data has none
    pub fn color_at(&self, value: f64) -> Option<[u8; 3]> {
        if !value.is_finite() {
            return None;
        }
        let t = value.clamp(0.0, 1.0);
        let stops = self.stops();
        for pair in stops.windows(2) {
            let (t0, c0) = pair[0];
            let (t1, c1) = pair[1];
            if t <= t1 {
                let ratio = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
                return Some([
                    lerp(c0[0], c1[0], ratio),
                    lerp(c0[1], c1[1], ratio),
                    lerp(c0[2], c1[2], ratio),
                ]);
            }
        }
        stops.last().map(|(_, c)| *c)
    }
}

impl std::fmt::Display for ColorMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn lerp(a: u8, b: u8, t: f64) -> u8 {
    (a as f64 + (b as f64 - a as f64) * t).round() as u8
}

/// Unit reflectance to an 8-bit channel; no-data has none
pub fn to_channel(value: f64) -> Option<u8> {
    if value.is_finite() {
        Some((value.clamp(0.0, 1.0) * 255.0).round() as u8)
    } else {
        None
    }
}
