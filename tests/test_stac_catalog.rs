use s2cube::config::PipelineConfig;
use s2cube::io::{gdal_path, CatalogSearch, SceneMetadata, StaticCatalog};
use std::io::Write;

const COLLECTION: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {
            "type": "Feature",
            "id": "S2B_MSIL2A_20220815T174909_R141_T13TDE",
            "collection": "sentinel-2-l2a",
            "bbox": [-106.2, 39.6, -104.9, 40.6],
            "properties": {"datetime": "2022-08-15T17:49:09Z", "proj:epsg": 32613, "eo:cloud_cover": 3.1},
            "assets": {
                "B02": {"href": "https://example.com/T13TDE/B02.tif"},
                "B03": {"href": "https://example.com/T13TDE/B03.tif"},
                "B04": {"href": "https://example.com/T13TDE/B04.tif"}
            }
        },
        {
            "type": "Feature",
            "id": "S2A_MSIL2A_20220120T175541_R141_T13TDE",
            "collection": "sentinel-2-l2a",
            "bbox": [-106.2, 39.6, -104.9, 40.6],
            "properties": {"datetime": "2022-01-20T17:55:41Z", "proj:epsg": 32613, "eo:cloud_cover": 29.99},
            "assets": {
                "B04": {"href": "https://example.com/T13TDE/0120/B04.tif"}
            }
        },
        {
            "type": "Feature",
            "id": "S2A_MSIL2A_20220601T175541_R141_T13TDE",
            "collection": "sentinel-2-l2a",
            "bbox": [-106.2, 39.6, -104.9, 40.6],
            "properties": {"datetime": "2022-06-01T17:55:41Z", "proj:epsg": 32613, "eo:cloud_cover": 30.0},
            "assets": {}
        },
        {
            "type": "Feature",
            "id": "S2A_MSIL2A_20230101T175541_R141_T13TDE",
            "collection": "sentinel-2-l2a",
            "bbox": [-106.2, 39.6, -104.9, 40.6],
            "properties": {"datetime": "2023-01-01T17:55:41Z", "proj:epsg": 32613, "eo:cloud_cover": 0.0},
            "assets": {}
        },
        {
            "type": "Feature",
            "id": "landsat-scene",
            "collection": "landsat-c2-l2",
            "bbox": [-106.2, 39.6, -104.9, 40.6],
            "properties": {"datetime": "2022-07-01T17:00:00Z", "eo:cloud_cover": 1.0},
            "assets": {}
        }
    ],
    "links": []
}"#;

fn catalog_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(COLLECTION.as_bytes()).unwrap();
    file
}

#[test]
fn test_default_search_over_local_items() {
    let _ = env_logger::builder().is_test(true).try_init();
    let file = catalog_file();
    let catalog = StaticCatalog::from_json_file(file.path()).unwrap();
    assert_eq!(catalog.len(), 5);

    let config = PipelineConfig::default();
    let scenes = catalog.search(&config.search.to_query()).unwrap();
    let ids: Vec<_> = scenes.iter().map(|s| s.id.as_str()).collect();

    // 30.0 is not strictly below the threshold; 2023 is outside the range
    assert_eq!(
        ids,
        vec![
            "S2A_MSIL2A_20220120T175541_R141_T13TDE",
            "S2B_MSIL2A_20220815T174909_R141_T13TDE",
        ]
    );
    assert!(scenes.windows(2).all(|w| w[0].datetime <= w[1].datetime));
}

#[test]
fn test_config_driven_search() {
    let file = catalog_file();
    let catalog = StaticCatalog::from_json_file(file.path()).unwrap();
    let config = PipelineConfig::from_json_str(
        r#"{"search": {"start": "2022-06-01", "end": "2022-12-31", "max_cloud_cover": 50}}"#,
    )
    .unwrap();

    let scenes = catalog.search(&config.search.to_query()).unwrap();
    let dates: Vec<_> = scenes
        .iter()
        .map(|s| s.datetime.format("%Y-%m-%d").to_string())
        .collect();
    assert_eq!(dates, vec!["2022-06-01", "2022-08-15"]);
}

#[test]
fn test_scene_assets_resolve_to_gdal_paths() {
    let file = catalog_file();
    let catalog = StaticCatalog::from_json_file(file.path()).unwrap();
    let scenes: Vec<SceneMetadata> = catalog
        .search(&PipelineConfig::default().search.to_query())
        .unwrap();
    let summer = &scenes[1];

    assert_eq!(summer.band_assets(), vec!["B02", "B03", "B04"]);
    assert_eq!(summer.epsg, Some(32613));
    let href = &summer.asset("B04").unwrap().href;
    assert_eq!(gdal_path(href), "/vsicurl/https://example.com/T13TDE/B04.tif");
    assert!(scenes[0].asset("B02").is_err());
}

#[test]
fn test_invalid_query_rejected() {
    let file = catalog_file();
    let catalog = StaticCatalog::from_json_file(file.path()).unwrap();
    let mut query = PipelineConfig::default().search.to_query();
    std::mem::swap(&mut query.start, &mut query.end);
    assert!(catalog.search(&query).is_err());
}
