use crate::types::{BoundingBox, CoordinateSystem, S2Error, S2Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Root of the Microsoft Planetary Computer STAC API
pub const PLANETARY_COMPUTER_STAC: &str = "https://planetarycomputer.microsoft.com/api/stac/v1";

/// Sentinel-2 Level-2A collection identifier
pub const SENTINEL2_L2A: &str = "sentinel-2-l2a";

/// Catalog search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub bbox: BoundingBox,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub collection: String,
    /// Scenes must be strictly below this cloud cover percentage
    pub max_cloud_cover: f64,
    /// Page size requested from the API
    pub limit: u32,
}

impl SearchQuery {
    pub fn validate(&self) -> S2Result<()> {
        self.bbox.validate()?;
        if self.start > self.end {
            return Err(S2Error::InvalidParameter(format!(
                "Search start {} is after end {}",
                self.start, self.end
            )));
        }
        if !(0.0..=100.0).contains(&self.max_cloud_cover) {
            return Err(S2Error::InvalidParameter(format!(
                "Cloud cover threshold must be within [0, 100], got {}",
                self.max_cloud_cover
            )));
        }
        if self.collection.is_empty() {
            return Err(S2Error::InvalidParameter("Collection id is empty".to_string()));
        }
        Ok(())
    }

    /// `start/end` interval in RFC 3339
    pub fn datetime_range(&self) -> String {
        format!("{}/{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }

    /// Body for `POST /search`
    pub fn to_request_body(&self) -> serde_json::Value {
        json!({
            "collections": [self.collection],
            "bbox": self.bbox.to_array(),
            "datetime": self.datetime_range(),
            "query": { "eo:cloud_cover": { "lt": self.max_cloud_cover } },
            "limit": self.limit,
        })
    }
}

/// STAC asset entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacAsset {
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

/// Item properties used by the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StacProperties {
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(rename = "proj:epsg", default)]
    pub epsg: Option<u32>,
    #[serde(rename = "proj:code", default)]
    pub proj_code: Option<String>,
    #[serde(rename = "eo:cloud_cover", default)]
    pub cloud_cover: Option<f64>,
}

/// STAC item (GeoJSON feature)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacItem {
    pub id: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub properties: StacProperties,
    #[serde(default)]
    pub assets: BTreeMap<String, StacAsset>,
}

/// Pagination or relation link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacLink {
    pub rel: String,
    pub href: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

/// STAC item collection (GeoJSON feature collection)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemCollection {
    #[serde(default)]
    pub features: Vec<StacItem>,
    #[serde(default)]
    pub links: Vec<StacLink>,
}

impl ItemCollection {
    pub fn from_json_str(content: &str) -> S2Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> S2Result<Self> {
        log::info!("Reading item collection: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn next_link(&self) -> Option<&StacLink> {
        self.links.iter().find(|l| l.rel == "next")
    }
}

/// Retrievable asset reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    pub href: String,
    pub media_type: Option<String>,
}

/// Scene metadata handed to the array loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub id: String,
    pub collection: Option<String>,
    pub datetime: DateTime<Utc>,
    pub epsg: Option<u32>,
    pub cloud_cover: Option<f64>,
    pub bbox: Option<BoundingBox>,
    pub assets: BTreeMap<String, AssetRef>,
}

impl SceneMetadata {
    pub fn from_item(item: &StacItem) -> S2Result<Self> {
        let datetime = item.properties.datetime.as_deref().ok_or_else(|| {
            S2Error::Catalog(format!("Item {} has no datetime property", item.id))
        })?;
        let datetime = DateTime::parse_from_rfc3339(datetime)?.with_timezone(&Utc);

        let epsg = item.properties.epsg.or_else(|| {
            item.properties
                .proj_code
                .as_deref()
                .and_then(|code| code.strip_prefix("EPSG:"))
                .and_then(|code| code.parse().ok())
        });

        let bbox = match &item.bbox {
            Some(values) => Some(BoundingBox::from_slice(values)?),
            None => None,
        };

        let assets = item
            .assets
            .iter()
            .map(|(name, asset)| {
                (
                    name.clone(),
                    AssetRef {
                        href: asset.href.clone(),
                        media_type: asset.media_type.clone(),
                    },
                )
            })
            .collect();

        Ok(Self {
            id: item.id.clone(),
            collection: item.collection.clone(),
            datetime,
            epsg,
            cloud_cover: item.properties.cloud_cover,
            bbox,
            assets,
        })
    }

    pub fn coordinate_system(&self) -> Option<CoordinateSystem> {
        self.epsg.map(|epsg| CoordinateSystem::Projected { epsg })
    }

    /// Spectral band assets (keys starting with `B`) in canonical order
    pub fn band_assets(&self) -> Vec<String> {
        let mut bands: Vec<String> = self
            .assets
            .keys()
            .filter(|k| k.starts_with('B'))
            .cloned()
            .collect();
        sort_bands(&mut bands);
        bands
    }

    pub fn asset(&self, band: &str) -> S2Result<&AssetRef> {
        self.assets.get(band).ok_or_else(|| {
            S2Error::Catalog(format!("Scene {} has no asset for band {}", self.id, band))
        })
    }
}

/// Ordering key for Sentinel-2 band names: B01 < ... < B08 < B8A < B09 < ... < B12
fn band_sort_key(name: &str) -> (u32, u32, String) {
    let rest = name.strip_prefix('B').unwrap_or(name);
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.parse::<u32>() {
        Ok(number) => {
            let suffix = &rest[digits.len()..];
            let variant = if suffix.is_empty() { 0 } else { 1 };
            (number, variant, suffix.to_string())
        }
        Err(_) => (u32::MAX, 0, name.to_string()),
    }
}

/// Sort band names into canonical Sentinel-2 order
pub fn sort_bands(bands: &mut [String]) {
    bands.sort_by_key(|b| band_sort_key(b));
}

/// Catalog search collaborator
pub trait CatalogSearch {
    fn search(&self, query: &SearchQuery) -> S2Result<Vec<SceneMetadata>>;
}

/// Applies a query to already fetched items
fn filter_items(items: &[StacItem], query: &SearchQuery) -> S2Result<Vec<SceneMetadata>> {
    let mut scenes = Vec::new();
    for item in items {
        let scene = match SceneMetadata::from_item(item) {
            Ok(scene) => scene,
            Err(e) => {
                log::warn!("Skipping item {}: {}", item.id, e);
                continue;
            }
        };

        if let Some(collection) = &scene.collection {
            if collection != &query.collection {
                continue;
            }
        }
        if let Some(bbox) = &scene.bbox {
            if !bbox.intersects(&query.bbox) {
                continue;
            }
        }
        if scene.datetime < query.start || scene.datetime > query.end {
            continue;
        }
        match scene.cloud_cover {
            Some(cover) if cover < query.max_cloud_cover => {}
            Some(_) => continue,
            None => log::debug!("Item {} has no cloud cover; keeping it", scene.id),
        }
        scenes.push(scene);
    }
    scenes.sort_by_key(|s| s.datetime);
    Ok(scenes)
}

/// Catalog over an in-memory item collection
pub struct StaticCatalog {
    items: Vec<StacItem>,
}

impl StaticCatalog {
    pub fn new(items: Vec<StacItem>) -> Self {
        Self { items }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> S2Result<Self> {
        Ok(Self::new(ItemCollection::from_json_file(path)?.features))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl CatalogSearch for StaticCatalog {
    fn search(&self, query: &SearchQuery) -> S2Result<Vec<SceneMetadata>> {
        query.validate()?;
        let scenes = filter_items(&self.items, query)?;
        log::info!("Found {} of {} items in {}", scenes.len(), self.items.len(), query.collection);
        Ok(scenes)
    }
}

/// Options for [`StacApiClient`]
#[derive(Debug, Clone)]
pub struct StacClientOptions {
    pub request_timeout: Duration,
    /// Stop following `next` links after this many items
    pub max_items: usize,
}

impl Default for StacClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_items: 500,
        }
    }
}

/// Blocking client for a STAC API `/search` endpoint
pub struct StacApiClient {
    root: String,
    options: StacClientOptions,
    http: reqwest::blocking::Client,
}

impl StacApiClient {
    pub fn new(root: &str) -> S2Result<Self> {
        Self::with_options(root, StacClientOptions::default())
    }

    pub fn with_options(root: &str, options: StacClientOptions) -> S2Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(options.request_timeout)
            .build()?;
        Ok(Self {
            root: root.trim_end_matches('/').to_string(),
            options,
            http,
        })
    }

    pub fn search_url(&self) -> String {
        if self.root.ends_with("/search") {
            self.root.clone()
        } else {
            format!("{}/search", self.root)
        }
    }

    fn fetch_page(&self, link: Option<&StacLink>, body: &serde_json::Value) -> S2Result<ItemCollection> {
        let request = match link {
            None => self.http.post(self.search_url()).json(body),
            Some(link) => match (&link.method, &link.body) {
                (Some(method), Some(next_body)) if method.eq_ignore_ascii_case("POST") => {
                    self.http.post(&link.href).json(next_body)
                }
                _ => self.http.get(&link.href),
            },
        };
        let page = request.send()?.error_for_status()?.json::<ItemCollection>()?;
        Ok(page)
    }
}

impl CatalogSearch for StacApiClient {
    fn search(&self, query: &SearchQuery) -> S2Result<Vec<SceneMetadata>> {
        query.validate()?;
        let body = query.to_request_body();
        log::info!("Searching {} for {} ({})", self.search_url(), query.collection, query.datetime_range());
        log::debug!("Search body: {}", body);

        let mut items = Vec::new();
        let mut page = self.fetch_page(None, &body)?;
        loop {
            items.extend(page.features.drain(..));
            if items.len() >= self.options.max_items {
                log::warn!("Reached max_items ({}); stopping pagination", self.options.max_items);
                items.truncate(self.options.max_items);
                break;
            }
            match page.next_link().cloned() {
                Some(next) => {
                    log::debug!("Following next link: {}", next.href);
                    page = self.fetch_page(Some(&next), &body)?;
                }
                None => break,
            }
        }

        // Same filters as the static catalog
        let scenes = filter_items(&items, query)?;
        log::info!("Found {} items in {}", scenes.len(), query.collection);
        Ok(scenes)
    }
}
