//! Catalog search and array loading collaborators

pub mod loader;
pub mod stac;

pub use loader::{gdal_path, grid_sampling, pixel_window, ArrayLoader, GdalLoader, GridSampling, ReferenceGrid};
pub use stac::{
    sort_bands, AssetRef, CatalogSearch, ItemCollection, SceneMetadata, SearchQuery,
    StacApiClient, StacClientOptions, StacItem, StaticCatalog, PLANETARY_COMPUTER_STAC,
    SENTINEL2_L2A,
};
