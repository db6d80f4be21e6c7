use crate::core::harmonize::HarmonizationParams;
use crate::core::normalize::NormalizationParams;
use crate::io::stac::{SearchQuery, StacClientOptions, PLANETARY_COMPUTER_STAC, SENTINEL2_L2A};
use crate::types::{BoundingBox, S2Error, S2Result};
use crate::viz::colormap::ColorMap;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn day_end(date: NaiveDate) -> DateTime<Utc> {
    let last_second = NaiveTime::from_hms_opt(23, 59, 59).expect("23:59:59 is a valid time of day");
    Utc.from_utc_datetime(&date.and_time(last_second))
}

/// Calendar date for the built-in defaults; only called with literal dates
fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("default dates are valid calendar dates")
}

/// Catalog search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub stac_root: String,
    pub collection: String,
    pub bbox: BoundingBox,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Percent; scenes must be strictly below it
    pub max_cloud_cover: f64,
    pub limit: u32,
    pub max_items: usize,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            stac_root: PLANETARY_COMPUTER_STAC.to_string(),
            collection: SENTINEL2_L2A.to_string(),
            // NCAR Mesa Lab, Boulder CO
            bbox: BoundingBox::new(-105.283263, 39.972809, -105.266569, 39.987640),
            start: ymd(2022, 1, 1),
            end: ymd(2022, 12, 31),
            max_cloud_cover: 30.0,
            limit: 100,
            max_items: 500,
            timeout_secs: 30,
        }
    }
}

impl SearchConfig {
    /// Query covering whole days from `start` through `end`
    pub fn to_query(&self) -> SearchQuery {
        SearchQuery {
            bbox: self.bbox,
            start: day_start(self.start),
            end: day_end(self.end),
            collection: self.collection.clone(),
            max_cloud_cover: self.max_cloud_cover,
            limit: self.limit,
        }
    }

    pub fn client_options(&self) -> StacClientOptions {
        StacClientOptions {
            request_timeout: Duration::from_secs(self.timeout_secs),
            max_items: self.max_items,
        }
    }
}

/// One single-band gallery view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub band: String,
    pub colormap: ColorMap,
}

/// Dashboard settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// One seasonal panel per date
    pub season_dates: Vec<NaiveDate>,
    /// Red, green, blue channel bands
    pub rgb_bands: [String; 3],
    pub gallery: Vec<GalleryEntry>,
    pub gallery_time_index: usize,
    pub output_dir: PathBuf,
    pub tiles: Option<String>,
    pub frame_width: u32,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        let entry = |band: &str, colormap| GalleryEntry {
            band: band.to_string(),
            colormap,
        };
        Self {
            season_dates: vec![ymd(2022, 1, 15), ymd(2022, 4, 30), ymd(2022, 8, 1), ymd(2022, 9, 15)],
            rgb_bands: ["B04".to_string(), "B03".to_string(), "B02".to_string()],
            gallery: vec![
                entry("B04", ColorMap::Blues),
                entry("B03", ColorMap::Greens),
                entry("B02", ColorMap::Reds),
            ],
            gallery_time_index: 0,
            output_dir: PathBuf::from("dashboard"),
            tiles: Some("ESRI".to_string()),
            frame_width: 300,
        }
    }
}

impl DashboardConfig {
    pub fn season_times(&self) -> Vec<DateTime<Utc>> {
        self.season_dates.iter().map(|d| day_start(*d)).collect()
    }

    pub fn gallery_entries(&self) -> Vec<(String, ColorMap)> {
        self.gallery.iter().map(|e| (e.band.clone(), e.colormap)).collect()
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub search: SearchConfig,
    /// Bands to load; all `B*` assets of the first scene when unset
    pub bands: Option<Vec<String>>,
    /// Source no-data value replaced by the no-data marker after loading
    pub nodata: Option<f64>,
    pub harmonization: HarmonizationParams,
    pub normalization: NormalizationParams,
    pub dashboard: DashboardConfig,
}

impl PipelineConfig {
    pub fn from_json_str(content: &str) -> S2Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> S2Result<Self> {
        log::info!("Loading configuration from {}", path.as_ref().display());
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> S2Result<()> {
        self.search.to_query().validate()?;
        self.harmonization.validate()?;
        self.normalization.validate()?;

        if let Some(bands) = &self.bands {
            if bands.is_empty() {
                return Err(S2Error::InvalidParameter("Band list is empty".to_string()));
            }
            for band in &self.dashboard.rgb_bands {
                if !bands.contains(band) {
                    return Err(S2Error::InvalidParameter(format!(
                        "RGB band {} is not in the band list",
                        band
                    )));
                }
            }
        }
        if self.dashboard.season_dates.is_empty() {
            return Err(S2Error::InvalidParameter(
                "Dashboard needs at least one season date".to_string(),
            ));
        }
        Ok(())
    }
}
