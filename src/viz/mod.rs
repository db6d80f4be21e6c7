//! Visualization collaborator: colour ramps, layer slicing, sliders and dashboards
//!
//! Every function here receives the cube it draws from as an argument.

pub mod colormap;
pub mod dashboard;
pub mod layer;
pub mod render;
pub mod slider;

pub use colormap::ColorMap;
pub use dashboard::{Dashboard, DashboardManifest, PanelManifest, SeasonalPanel};
pub use layer::{band_gallery, band_layer, rgb_layer, rgb_layer_at, BandLayer, LayerStyle, RgbLayer};
pub use render::{LayerRenderer, PngRenderer, RenderedLayer};
pub use slider::{DateSlider, Season};
