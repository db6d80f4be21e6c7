use crate::types::{RasterCube, S2Error, S2Result};
use crate::viz::colormap::ColorMap;
use crate::viz::layer::{band_gallery, rgb_layer, LayerStyle, RgbLayer};
use crate::viz::render::{LayerRenderer, RenderedLayer};
use crate::viz::slider::DateSlider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Panels per dashboard row
pub const DASHBOARD_COLUMNS: usize = 2;

/// One true-colour panel with its date slider
#[derive(Debug, Clone)]
pub struct SeasonalPanel {
    pub slider: DateSlider,
    pub layer: RgbLayer,
    channels: [String; 3],
}

impl SeasonalPanel {
    /// Panel showing the acquisition nearest `time`, sliding over the whole cube
    pub fn rgb_during(
        cube: &RasterCube,
        time: &DateTime<Utc>,
        channels: &[String; 3],
    ) -> S2Result<Self> {
        let slider = DateSlider::for_cube(cube, time)?;
        let layer = rgb_layer(cube, &slider.value, channels)?;
        log::debug!("Panel '{}' bound to {}", layer.title, slider.value);
        Ok(Self {
            slider,
            layer,
            channels: channels.clone(),
        })
    }

    /// Move the slider to `time` and re-select the displayed acquisition
    pub fn rebind(&mut self, cube: &RasterCube, time: DateTime<Utc>) -> S2Result<()> {
        self.slider.set_value(time);
        self.layer = rgb_layer(cube, &self.slider.value, &self.channels)?;
        Ok(())
    }

    pub fn channels(&self) -> &[String; 3] {
        &self.channels
    }
}

/// Manifest entry for one rendered panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelManifest {
    pub image: RenderedLayer,
    pub slider: DateSlider,
    pub channels: [String; 3],
}

/// Description of a rendered dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardManifest {
    pub columns: usize,
    pub style: LayerStyle,
    pub gallery: Vec<RenderedLayer>,
    pub panels: Vec<PanelManifest>,
}

impl DashboardManifest {
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> S2Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, self)?;
        log::info!("Wrote dashboard manifest to {}", path.as_ref().display());
        Ok(())
    }
}

/// Grid of seasonal panels plus an optional single-band gallery
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub style: LayerStyle,
    pub panels: Vec<SeasonalPanel>,
    pub gallery: Vec<(String, ColorMap)>,
    pub gallery_time_index: usize,
}

impl Dashboard {
    /// One panel per date, in the order given
    pub fn seasonal(
        cube: &RasterCube,
        dates: &[DateTime<Utc>],
        channels: &[String; 3],
        style: LayerStyle,
    ) -> S2Result<Self> {
        if dates.is_empty() {
            return Err(S2Error::InvalidParameter(
                "Dashboard needs at least one date".to_string(),
            ));
        }
        let panels = dates
            .iter()
            .map(|date| SeasonalPanel::rgb_during(cube, date, channels))
            .collect::<S2Result<Vec<_>>>()?;
        log::info!("Built dashboard with {} panels", panels.len());
        Ok(Self {
            style,
            panels,
            gallery: Vec::new(),
            gallery_time_index: 0,
        })
    }

    /// Add single-band views of acquisition `time_index`
    pub fn with_gallery(mut self, entries: Vec<(String, ColorMap)>, time_index: usize) -> Self {
        self.gallery = entries;
        self.gallery_time_index = time_index;
        self
    }

    /// Render the gallery and every panel, then write `dashboard.json` into `output_dir`
    pub fn render<R: LayerRenderer>(
        &self,
        cube: &RasterCube,
        renderer: &mut R,
        output_dir: &Path,
    ) -> S2Result<DashboardManifest> {
        let gallery = band_gallery(cube, &self.gallery, self.gallery_time_index)?
            .iter()
            .map(|layer| renderer.render_band(layer, &self.style))
            .collect::<S2Result<Vec<_>>>()?;

        let mut panels = Vec::with_capacity(self.panels.len());
        for panel in &self.panels {
            let image = renderer.render_rgb(&panel.layer, &self.style)?;
            panels.push(PanelManifest {
                image,
                slider: panel.slider.clone(),
                channels: panel.channels.clone(),
            });
        }

        let manifest = DashboardManifest {
            columns: DASHBOARD_COLUMNS,
            style: self.style.clone(),
            gallery,
            panels,
        };
        std::fs::create_dir_all(output_dir)?;
        manifest.write_json(output_dir.join("dashboard.json"))?;
        Ok(manifest)
    }
}
