use crate::types::{CoordinateSystem, RasterCube, S2Error, S2Result};
use crate::viz::colormap::ColorMap;
use crate::viz::slider::Season;
use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

/// Default colour-bar label of single-band layers
pub const REFLECTANCE_LABEL: &str = "surface reflectance [0.0-1.0]";

/// Styling shared by all layers of a view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStyle {
    /// Base-map tile source drawn under the layer
    pub tiles: Option<String>,
    pub crs: CoordinateSystem,
    pub frame_width: u32,
    pub xlabel: String,
    pub ylabel: String,
}

impl LayerStyle {
    pub fn for_cube(cube: &RasterCube) -> Self {
        Self {
            tiles: Some("ESRI".to_string()),
            crs: cube.crs,
            frame_width: 300,
            xlabel: "longitude".to_string(),
            ylabel: "latitude".to_string(),
        }
    }
}

/// One band of one acquisition, colour-mapped
#[derive(Debug, Clone, PartialEq)]
pub struct BandLayer {
    pub band: String,
    pub time: DateTime<Utc>,
    pub colormap: ColorMap,
    pub title: String,
    pub clabel: String,
    pub values: Array2<f64>,
}

/// Three bands of one acquisition as (y, x, channel)
#[derive(Debug, Clone, PartialEq)]
pub struct RgbLayer {
    pub bands: [String; 3],
    pub time: DateTime<Utc>,
    pub title: String,
    pub rgb: Array3<f64>,
}

impl RgbLayer {
    pub fn dim(&self) -> (usize, usize) {
        let (rows, cols, _) = self.rgb.dim();
        (rows, cols)
    }
}

/// Single-band layer for `band` at acquisition `time_index`
pub fn band_layer(
    cube: &RasterCube,
    band: &str,
    time_index: usize,
    colormap: ColorMap,
) -> S2Result<BandLayer> {
    let values = cube.band_slice(time_index, band)?.to_owned();
    Ok(BandLayer {
        band: band.to_string(),
        time: cube.times[time_index],
        colormap,
        title: format!("band: {}, cmap: {}", band, colormap),
        clabel: REFLECTANCE_LABEL.to_string(),
        values,
    })
}

/// True-colour layer of the acquisition nearest `time`
pub fn rgb_layer(cube: &RasterCube, time: &DateTime<Utc>, channels: &[String; 3]) -> S2Result<RgbLayer> {
    let index = cube
        .nearest_time_index(time)
        .ok_or_else(|| S2Error::InvalidCube("Cube has no acquisitions".to_string()))?;
    rgb_layer_at(cube, index, channels)
}

/// True-colour layer of acquisition `time_index`
pub fn rgb_layer_at(cube: &RasterCube, time_index: usize, channels: &[String; 3]) -> S2Result<RgbLayer> {
    let names: Vec<&str> = channels.iter().map(|c| c.as_str()).collect();
    let selected = cube.select_bands(&names)?;
    let slice = selected.time_slice(time_index)?;

    // (band, y, x) -> (y, x, band)
    let mut rgb = slice.to_owned();
    rgb.swap_axes(0, 1);
    rgb.swap_axes(1, 2);
    let rgb = rgb.as_standard_layout().to_owned();
    debug_assert_eq!(rgb.len_of(Axis(2)), 3);

    let time = cube.times[time_index];
    Ok(RgbLayer {
        bands: channels.clone(),
        time,
        title: format!("{}: {}", Season::of(&time), time.format("%Y-%m-%d")),
        rgb,
    })
}

/// Single-band layers for each `(band, colormap)` at `time_index`
pub fn band_gallery(
    cube: &RasterCube,
    entries: &[(String, ColorMap)],
    time_index: usize,
) -> S2Result<Vec<BandLayer>> {
    entries
        .iter()
        .map(|(band, cmap)| band_layer(cube, band, time_index, *cmap))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::Array4;

    fn cube() -> RasterCube {
        let data = Array4::from_shape_fn((2, 3, 2, 3), |(t, b, y, x)| {
            (t * 1000 + b * 100 + y * 10 + x) as f64
        });
        RasterCube::new(
            vec![
                Utc.with_ymd_and_hms(2022, 1, 14, 17, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2022, 7, 14, 17, 0, 0).unwrap(),
            ],
            vec!["B02".to_string(), "B03".to_string(), "B04".to_string()],
            vec![0.0, 1.0],
            vec![0.0, 1.0, 2.0],
            data,
            CoordinateSystem::Projected { epsg: 32613 },
        )
        .unwrap()
    }

    fn rgb_bands() -> [String; 3] {
        ["B04".to_string(), "B03".to_string(), "B02".to_string()]
    }

    #[test]
    fn test_band_layer_title() {
        let layer = band_layer(&cube(), "B04", 0, ColorMap::Reds).unwrap();
        assert_eq!(layer.title, "band: B04, cmap: Reds");
        assert_eq!(layer.values.dim(), (2, 3));
        assert_eq!(layer.values[[1, 2]], 212.0);
    }

    #[test]
    fn test_rgb_layer_transposed() {
        let cube = cube();
        let target = Utc.with_ymd_and_hms(2022, 8, 1, 0, 0, 0).unwrap();
        let layer = rgb_layer(&cube, &target, &rgb_bands()).unwrap();
        assert_eq!(layer.rgb.dim(), (2, 3, 3));
        assert_eq!(layer.title, "Summer: 2022-07-14");
        // channel 0 is B04, channel 2 is B02
        assert_eq!(layer.rgb[[1, 2, 0]], 1212.0);
        assert_eq!(layer.rgb[[1, 2, 2]], 1012.0);
    }

    #[test]
    fn test_missing_band() {
        let channels = ["B08".to_string(), "B03".to_string(), "B02".to_string()];
        assert!(rgb_layer_at(&cube(), 0, &channels).is_err());
    }

    #[test]
    fn test_gallery() {
        let entries = vec![
            ("B04".to_string(), ColorMap::Reds),
            ("B03".to_string(), ColorMap::Greens),
            ("B02".to_string(), ColorMap::Blues),
        ];
        let layers = band_gallery(&cube(), &entries, 1).unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[2].title, "band: B02, cmap: Blues");
    }
}
