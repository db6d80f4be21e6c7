use crate::types::{S2Error, S2Result};
use crate::viz::colormap::to_channel;
use crate::viz::layer::{BandLayer, LayerStyle, RgbLayer};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A layer written by a renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedLayer {
    pub title: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub crs: String,
    pub tiles: Option<String>,
}

/// Visualization collaborator
pub trait LayerRenderer {
    fn render_band(&mut self, layer: &BandLayer, style: &LayerStyle) -> S2Result<RenderedLayer>;
    fn render_rgb(&mut self, layer: &RgbLayer, style: &LayerStyle) -> S2Result<RenderedLayer>;
}

/// Colour-map a band layer into RGBA; no-data is transparent
pub fn band_to_image(layer: &BandLayer) -> S2Result<RgbaImage> {
    let (rows, cols) = layer.values.dim();
    let mut img = RgbaImage::new(cols as u32, rows as u32);
    for ((row, col), value) in layer.values.indexed_iter() {
        let pixel = match layer.colormap.color_at(*value) {
            Some([r, g, b]) => Rgba([r, g, b, 255]),
            None => Rgba([0, 0, 0, 0]),
        };
        img.put_pixel(col as u32, row as u32, pixel);
    }
    Ok(img)
}

/// RGB layer into RGBA; a pixel with any no-data channel is transparent
pub fn rgb_to_image(layer: &RgbLayer) -> S2Result<RgbaImage> {
    let (rows, cols) = layer.dim();
    let mut img = RgbaImage::new(cols as u32, rows as u32);
    for row in 0..rows {
        for col in 0..cols {
            let channels = (
                to_channel(layer.rgb[[row, col, 0]]),
                to_channel(layer.rgb[[row, col, 1]]),
                to_channel(layer.rgb[[row, col, 2]]),
            );
            let pixel = match channels {
                (Some(r), Some(g), Some(b)) => Rgba([r, g, b, 255]),
                _ => Rgba([0, 0, 0, 0]),
            };
            img.put_pixel(col as u32, row as u32, pixel);
        }
    }
    Ok(img)
}

/// File-name-safe form of a layer title
pub fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Writes layers as PNG files into a directory
pub struct PngRenderer {
    output_dir: PathBuf,
}

impl PngRenderer {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> S2Result<Self> {
        std::fs::create_dir_all(output_dir.as_ref())?;
        Ok(Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn write(&self, img: &RgbaImage, title: &str, style: &LayerStyle) -> S2Result<RenderedLayer> {
        if img.width() == 0 || img.height() == 0 {
            return Err(S2Error::Processing(format!("Layer '{}' is empty", title)));
        }
        let path = self.output_dir.join(format!("{}.png", slug(title)));
        img.save(&path)?;
        log::info!("Rendered '{}' to {}", title, path.display());
        Ok(RenderedLayer {
            title: title.to_string(),
            path,
            width: img.width(),
            height: img.height(),
            crs: style.crs.to_string(),
            tiles: style.tiles.clone(),
        })
    }
}

impl LayerRenderer for PngRenderer {
    fn render_band(&mut self, layer: &BandLayer, style: &LayerStyle) -> S2Result<RenderedLayer> {
        let img = band_to_image(layer)?;
        self.write(&img, &layer.title, style)
    }

    fn render_rgb(&mut self, layer: &RgbLayer, style: &LayerStyle) -> S2Result<RenderedLayer> {
        let img = rgb_to_image(layer)?;
        self.write(&img, &layer.title, style)
    }
}
