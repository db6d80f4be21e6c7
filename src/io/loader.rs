use crate::core::plan::{ChunkSpec, CubeDescriptor, DataType};
use crate::io::stac::SceneMetadata;
use crate::types::{
    BoundingBox, CoordinateSystem, GeoTransform, RasterCube, S2Error, S2Result, NODATA,
};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::Dataset;
use ndarray::{s, Array2, Array4};

/// Pixel window `(col_off, row_off, cols, rows)` within a raster
pub type PixelWindow = (usize, usize, usize, usize);

/// Projected bounding box `(min_x, min_y, max_x, max_y)`
pub type ProjectedBounds = [f64; 4];

/// Array loader collaborator
pub trait ArrayLoader {
    /// Read the requested bands of every scene over `bbox` into one cube
    fn load(
        &self,
        scenes: &[SceneMetadata],
        bands: &[String],
        bbox: &BoundingBox,
    ) -> S2Result<RasterCube>;

    /// Describe the cube [`ArrayLoader::load`] would produce without reading pixels
    fn describe(
        &self,
        scenes: &[SceneMetadata],
        bands: &[String],
        bbox: &BoundingBox,
    ) -> S2Result<CubeDescriptor>;
}

/// Pixel window of `raster_size` covering `bounds`, clipped to the raster
///
/// Only north-up geotransforms are supported.
pub fn pixel_window(
    gt: &GeoTransform,
    bounds: &ProjectedBounds,
    raster_size: (usize, usize),
) -> S2Result<PixelWindow> {
    if gt.rotation_x != 0.0 || gt.rotation_y != 0.0 {
        return Err(S2Error::Processing(
            "Rotated geotransforms are not supported".to_string(),
        ));
    }
    if gt.pixel_width <= 0.0 || gt.pixel_height >= 0.0 {
        return Err(S2Error::Processing(format!(
            "Expected north-up geotransform, got pixel size ({}, {})",
            gt.pixel_width, gt.pixel_height
        )));
    }

    let [min_x, min_y, max_x, max_y] = *bounds;
    let (width, height) = raster_size;

    let col_start = ((min_x - gt.top_left_x) / gt.pixel_width).floor();
    let col_end = ((max_x - gt.top_left_x) / gt.pixel_width).ceil();
    let row_start = ((max_y - gt.top_left_y) / gt.pixel_height).floor();
    let row_end = ((min_y - gt.top_left_y) / gt.pixel_height).ceil();

    let clip = |v: f64, limit: usize| v.max(0.0).min(limit as f64) as usize;
    let (c0, c1) = (clip(col_start, width), clip(col_end, width));
    let (r0, r1) = (clip(row_start, height), clip(row_end, height));

    if c1 <= c0 || r1 <= r0 {
        return Err(S2Error::Processing(format!(
            "Bounds {:?} do not overlap raster of {}x{} pixels",
            bounds, width, height
        )));
    }
    Ok((c0, r0, c1 - c0, r1 - r0))
}

/// GDAL path for an asset href; remote assets go through `/vsicurl/`
pub fn gdal_path(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        format!("/vsicurl/{}", href)
    } else {
        href.to_string()
    }
}

/// Source pixels sampled by a reference grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridSampling {
    /// Source window `(col_off, row_off, cols, rows)` to read
    pub window: PixelWindow,
    /// Per grid column, the column inside `window` it samples
    pub cols: Vec<Option<usize>>,
    /// Per grid row, the row inside `window` it samples
    pub rows: Vec<Option<usize>>,
}

/// Source index containing each destination pixel centre along one axis
fn axis_lookup(
    dst_origin: f64,
    dst_step: f64,
    dst_len: usize,
    src_origin: f64,
    src_step: f64,
    src_len: usize,
) -> Vec<Option<usize>> {
    (0..dst_len)
        .map(|i| {
            let center = dst_origin + (i as f64 + 0.5) * dst_step;
            let index = ((center - src_origin) / src_step).floor();
            if index >= 0.0 && index < src_len as f64 {
                Some(index as usize)
            } else {
                None
            }
        })
        .collect()
}

/// Nearest-neighbour sampling of a north-up raster by `grid`
///
/// Returns `None` when the raster does not cover any grid pixel centre.
pub fn grid_sampling(
    grid: &ReferenceGrid,
    src: &GeoTransform,
    raster_size: (usize, usize),
) -> S2Result<Option<GridSampling>> {
    if src.rotation_x != 0.0 || src.rotation_y != 0.0 || src.pixel_width <= 0.0 || src.pixel_height >= 0.0 {
        return Err(S2Error::Processing(
            "Only north-up, unrotated assets are supported".to_string(),
        ));
    }
    let dst = &grid.geo_transform;
    let (width, height) = raster_size;
    let mut cols = axis_lookup(dst.top_left_x, dst.pixel_width, grid.cols, src.top_left_x, src.pixel_width, width);
    let mut rows = axis_lookup(dst.top_left_y, dst.pixel_height, grid.rows, src.top_left_y, src.pixel_height, height);

    let span = |lookup: &[Option<usize>]| {
        let hit = lookup.iter().flatten();
        Some((*hit.clone().min()?, *hit.max()?))
    };
    let (Some((c0, c1)), Some((r0, r1))) = (span(&cols), span(&rows)) else {
        return Ok(None);
    };
    for index in cols.iter_mut().flatten() {
        *index -= c0;
    }
    for index in rows.iter_mut().flatten() {
        *index -= r0;
    }
    Ok(Some(GridSampling {
        window: (c0, r0, c1 - c0 + 1, r1 - r0 + 1),
        cols,
        rows,
    }))
}

/// Reference grid shared by every asset of a cube
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceGrid {
    pub bounds: ProjectedBounds,
    pub geo_transform: GeoTransform,
    pub cols: usize,
    pub rows: usize,
    pub crs: CoordinateSystem,
}

impl ReferenceGrid {
    pub fn x_coords(&self) -> Vec<f64> {
        (0..self.cols).map(|c| self.geo_transform.pixel_center_x(c)).collect()
    }

    pub fn y_coords(&self) -> Vec<f64> {
        (0..self.rows).map(|r| self.geo_transform.pixel_center_y(r)).collect()
    }
}

/// Loads Sentinel-2 assets through GDAL onto a common grid
pub struct GdalLoader;

impl GdalLoader {
    pub fn new() -> Self {
        Self
    }

    /// Transform a lon/lat bounding box into `epsg` coordinates
    pub fn project_bbox(bbox: &BoundingBox, epsg: u32) -> S2Result<ProjectedBounds> {
        let source = SpatialRef::from_epsg(4326)?;
        let target = SpatialRef::from_epsg(epsg)?;
        source.set_axis_mapping_strategy(
            gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );
        target.set_axis_mapping_strategy(
            gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );
        let transform = CoordTransform::new(&source, &target)?;

        let mut xs = [bbox.min_lon, bbox.max_lon, bbox.max_lon, bbox.min_lon];
        let mut ys = [bbox.min_lat, bbox.min_lat, bbox.max_lat, bbox.max_lat];
        let mut zs = [0.0; 4];
        transform.transform_coords(&mut xs, &mut ys, &mut zs)?;

        let fold = |values: &[f64], f: fn(f64, f64) -> f64, init: f64| {
            values.iter().copied().fold(init, f)
        };
        Ok([
            fold(&xs, f64::min, f64::INFINITY),
            fold(&ys, f64::min, f64::INFINITY),
            fold(&xs, f64::max, f64::NEG_INFINITY),
            fold(&ys, f64::max, f64::NEG_INFINITY),
        ])
    }

    fn common_crs(scenes: &[SceneMetadata]) -> S2Result<CoordinateSystem> {
        let first = scenes
            .first()
            .ok_or_else(|| S2Error::InvalidParameter("No scenes to load".to_string()))?;
        let crs = first.coordinate_system().ok_or_else(|| {
            S2Error::Catalog(format!("Scene {} has no projection EPSG code", first.id))
        })?;
        for scene in &scenes[1..] {
            if scene.coordinate_system() != Some(crs) {
                return Err(S2Error::Processing(format!(
                    "Scene {} is not in {} like {}; reprojection is not supported",
                    scene.id, crs, first.id
                )));
            }
        }
        Ok(crs)
    }

    /// Grid of the first band of the first scene, cropped to `bbox`
    pub fn reference_grid(
        &self,
        scenes: &[SceneMetadata],
        bands: &[String],
        bbox: &BoundingBox,
    ) -> S2Result<ReferenceGrid> {
        bbox.validate()?;
        let crs = Self::common_crs(scenes)?;
        let band = bands
            .first()
            .ok_or_else(|| S2Error::InvalidParameter("No bands requested".to_string()))?;
        let bounds = Self::project_bbox(bbox, crs.epsg())?;

        let asset = scenes[0].asset(band)?;
        let dataset = Dataset::open(gdal_path(&asset.href))?;
        let gt = GeoTransform::from_gdal(dataset.geo_transform()?);
        let (col, row, cols, rows) = pixel_window(&gt, &bounds, dataset.raster_size())?;

        let geo_transform = GeoTransform {
            top_left_x: gt.top_left_x + col as f64 * gt.pixel_width,
            top_left_y: gt.top_left_y + row as f64 * gt.pixel_height,
            ..gt
        };
        let grid_bounds = [
            geo_transform.top_left_x,
            geo_transform.top_left_y + rows as f64 * geo_transform.pixel_height,
            geo_transform.top_left_x + cols as f64 * geo_transform.pixel_width,
            geo_transform.top_left_y,
        ];

        log::debug!("Reference grid {}x{} at {:?} in {}", cols, rows, geo_transform, crs);
        Ok(ReferenceGrid {
            bounds: grid_bounds,
            geo_transform,
            cols,
            rows,
            crs,
        })
    }

    /// Read one asset onto the reference grid with nearest-neighbour sampling
    ///
    /// Grid pixels the asset does not cover stay no-data.
    fn read_asset(&self, href: &str, grid: &ReferenceGrid) -> S2Result<Array2<f64>> {
        let dataset = Dataset::open(gdal_path(href))?;
        let gt = GeoTransform::from_gdal(dataset.geo_transform()?);
        let mut values = Array2::from_elem((grid.rows, grid.cols), NODATA);

        let sampling = match grid_sampling(grid, &gt, dataset.raster_size())? {
            Some(sampling) => sampling,
            None => {
                log::warn!("Asset {} does not overlap the cube footprint", href);
                return Ok(values);
            }
        };

        let (col, row, cols, rows) = sampling.window;
        let rasterband = dataset.rasterband(1)?;
        let nodata = rasterband.no_data_value();
        let buffer = rasterband.read_as::<f64>(
            (col as isize, row as isize),
            (cols, rows),
            (cols, rows),
            None,
        )?;
        let window = Array2::from_shape_vec((rows, cols), buffer.data)
            .map_err(|e| S2Error::Processing(format!("Failed to reshape asset data: {}", e)))?;

        for (r, src_row) in sampling.rows.iter().enumerate() {
            let Some(src_row) = *src_row else { continue };
            for (c, src_col) in sampling.cols.iter().enumerate() {
                if let Some(src_col) = *src_col {
                    let v = window[[src_row, src_col]];
                    values[[r, c]] = match nodata {
                        Some(nodata) if v == nodata => NODATA,
                        _ => v,
                    };
                }
            }
        }
        Ok(values)
    }

    /// Read every `(scene, band)` asset onto an existing grid
    pub fn load_onto_grid(
        &self,
        scenes: &[SceneMetadata],
        bands: &[String],
        grid: &ReferenceGrid,
    ) -> S2Result<RasterCube> {
        let mut scenes = scenes.to_vec();
        scenes.sort_by_key(|s| s.datetime);

        let mut data = Array4::<f64>::from_elem((scenes.len(), bands.len(), grid.rows, grid.cols), NODATA);
        for (t, scene) in scenes.iter().enumerate() {
            log::debug!("Reading scene {} ({})", scene.id, scene.datetime);
            for (b, band) in bands.iter().enumerate() {
                let asset = scene.asset(band)?;
                let values = self.read_asset(&asset.href, grid)?;
                data.slice_mut(s![t, b, .., ..]).assign(&values);
            }
        }

        let cube = RasterCube::new(
            scenes.iter().map(|s| s.datetime).collect(),
            bands.to_vec(),
            grid.y_coords(),
            grid.x_coords(),
            data,
            grid.crs,
        )?;
        log::info!("Loaded cube {:?} with {} no-data cells", cube.dim(), cube.nodata_count());
        Ok(cube)
    }
}

impl Default for GdalLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayLoader for GdalLoader {
    fn load(
        &self,
        scenes: &[SceneMetadata],
        bands: &[String],
        bbox: &BoundingBox,
    ) -> S2Result<RasterCube> {
        let mut scenes = scenes.to_vec();
        scenes.sort_by_key(|s| s.datetime);

        log::info!("Loading {} bands from {} scenes", bands.len(), scenes.len());
        let grid = self.reference_grid(&scenes, bands, bbox)?;
        self.load_onto_grid(&scenes, bands, &grid)
    }

    fn describe(
        &self,
        scenes: &[SceneMetadata],
        bands: &[String],
        bbox: &BoundingBox,
    ) -> S2Result<CubeDescriptor> {
        let mut scenes = scenes.to_vec();
        scenes.sort_by_key(|s| s.datetime);
        let times: Vec<_> = scenes.iter().map(|s| s.datetime).collect();
        let grid = self.reference_grid(&scenes, bands, bbox)?;
        let shape = (times.len(), bands.len(), grid.rows, grid.cols);
        Ok(CubeDescriptor {
            times,
            bands: bands.to_vec(),
            rows: grid.rows,
            cols: grid.cols,
            dtype: DataType::UInt16,
            chunks: ChunkSpec::per_acquisition(shape),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utm_transform() -> GeoTransform {
        GeoTransform::from_gdal([499980.0, 10.0, 0.0, 4500000.0, 0.0, -10.0])
    }

    #[test]
    fn test_pixel_window_inside() {
        let gt = utm_transform();
        let bounds = [500000.0, 4499000.0, 500100.0, 4499500.0];
        let window = pixel_window(&gt, &bounds, (10980, 10980)).unwrap();
        assert_eq!(window, (2, 50, 10, 50));
    }

    #[test]
    fn test_pixel_window_clipped() {
        let gt = utm_transform();
        let bounds = [499000.0, 4499990.0, 500000.0, 4501000.0];
        let window = pixel_window(&gt, &bounds, (100, 100)).unwrap();
        assert_eq!(window, (0, 0, 2, 1));
    }

    #[test]
    fn test_pixel_window_disjoint() {
        let gt = utm_transform();
        let bounds = [600000.0, 4000000.0, 600100.0, 4000100.0];
        assert!(pixel_window(&gt, &bounds, (100, 100)).is_err());
    }

    #[test]
    fn test_rotated_transform_rejected() {
        let gt = GeoTransform::from_gdal([0.0, 10.0, 1.0, 0.0, 0.0, -10.0]);
        assert!(pixel_window(&gt, &[0.0, -10.0, 10.0, 0.0], (10, 10)).is_err());
    }

    #[test]
    fn test_gdal_path() {
        assert_eq!(gdal_path("https://a/b.tif"), "/vsicurl/https://a/b.tif");
        assert_eq!(gdal_path("/data/b.tif"), "/data/b.tif");
    }

    #[test]
    fn test_reference_grid_coords() {
        let grid = ReferenceGrid {
            bounds: [0.0, -20.0, 30.0, 0.0],
            geo_transform: GeoTransform::from_gdal([0.0, 10.0, 0.0, 0.0, 0.0, -10.0]),
            cols: 3,
            rows: 2,
            crs: CoordinateSystem::Projected { epsg: 32613 },
        };
        assert_eq!(grid.x_coords(), vec![5.0, 15.0, 25.0]);
        assert_eq!(grid.y_coords(), vec![-5.0, -15.0]);
    }

    fn ten_metre_grid() -> ReferenceGrid {
        ReferenceGrid {
            bounds: [500000.0, 4399900.0, 500100.0, 4400000.0],
            geo_transform: GeoTransform::from_gdal([500000.0, 10.0, 0.0, 4400000.0, 0.0, -10.0]),
            cols: 10,
            rows: 10,
            crs: CoordinateSystem::Projected { epsg: 32613 },
        }
    }

    #[test]
    fn test_partial_tile_leaves_uncovered_columns_empty() {
        let src = GeoTransform::from_gdal([500050.0, 10.0, 0.0, 4400000.0, 0.0, -10.0]);
        let sampling = grid_sampling(&ten_metre_grid(), &src, (10, 10)).unwrap().unwrap();

        assert_eq!(sampling.window, (0, 0, 5, 10));
        assert!(sampling.cols[..5].iter().all(|c| c.is_none()));
        assert_eq!(sampling.cols[5..], [Some(0), Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(sampling.rows, (0..10).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn test_coarse_band_repeats_source_pixels() {
        // 20 m band starting 100 m up and left of the grid
        let src = GeoTransform::from_gdal([499900.0, 20.0, 0.0, 4400100.0, 0.0, -20.0]);
        let sampling = grid_sampling(&ten_metre_grid(), &src, (15, 15)).unwrap().unwrap();

        assert_eq!(sampling.window, (5, 5, 5, 5));
        let expected: Vec<_> = (0..10).map(|c| Some(c / 2)).collect();
        assert_eq!(sampling.cols, expected);
        assert_eq!(sampling.rows, expected);
    }

    #[test]
    fn test_disjoint_tile_samples_nothing() {
        let src = GeoTransform::from_gdal([600000.0, 10.0, 0.0, 4400000.0, 0.0, -10.0]);
        assert_eq!(grid_sampling(&ten_metre_grid(), &src, (10, 10)).unwrap(), None);

        let rotated = GeoTransform::from_gdal([500000.0, 10.0, 1.0, 4400000.0, 0.0, -10.0]);
        assert!(grid_sampling(&ten_metre_grid(), &rotated, (10, 10)).is_err());
    }
}
