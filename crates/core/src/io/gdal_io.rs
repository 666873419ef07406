//! GeoTIFF reading and writing using GDAL

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::RasterMeta;
use crate::raster::{DataType, GeoTransform, GridSpec, Raster, RasterElement};
use gdal::raster::{Buffer, GdalDataType, GdalType, RasterCreationOptions};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use std::path::Path;

/// Options for writing GeoTIFF files
#[derive(Debug, Clone)]
pub struct GeoTiffOptions {
    /// Compression type: "DEFLATE", "LZW", "ZSTD", "NONE"
    pub compression: String,
    /// Tile size for tiled TIFFs (0 for strips)
    pub tile_size: usize,
}

impl Default for GeoTiffOptions {
    fn default() -> Self {
        Self {
            compression: "DEFLATE".to_string(),
            tile_size: 256,
        }
    }
}

/// Read a GeoTIFF file into a Raster
///
/// # Arguments
/// * `path` - Path to the GeoTIFF file
/// * `band` - Band number (1-indexed), defaults to 1
pub fn read_geotiff<T, P>(path: P, band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement + GdalType,
    P: AsRef<Path>,
{
    let dataset = Dataset::open(path.as_ref())?;
    let meta = dataset_meta(&dataset, band.unwrap_or(1))?;
    let rasterband = dataset.rasterband(band.unwrap_or(1))?;
    let (rows, cols) = meta.shape();

    let buffer = rasterband.read_as::<T>((0, 0), (cols, rows), (cols, rows), None)?;
    let (_, data) = buffer.into_shape_and_vec();

    let mut raster = Raster::from_vec(data, rows, cols)?;
    raster.set_transform(meta.spec.transform);
    raster.set_crs(meta.spec.crs);
    raster.set_nodata(meta.nodata.and_then(num_traits::cast));
    Ok(raster)
}

/// Read dimensions, georeferencing and no-data without decoding pixels
pub fn read_geotiff_meta<P: AsRef<Path>>(path: P) -> Result<RasterMeta> {
    let dataset = Dataset::open(path.as_ref())?;
    dataset_meta(&dataset, 1)
}

fn dataset_meta(dataset: &Dataset, band: usize) -> Result<RasterMeta> {
    let (cols, rows) = dataset.raster_size();
    let rasterband = dataset.rasterband(band)?;

    let transform = dataset
        .geo_transform()
        .map(GeoTransform::from_gdal)
        .unwrap_or_default();

    let crs = dataset.spatial_ref().ok().and_then(|srs| {
        match srs.auth_code() {
            Ok(code) => Some(CRS::from_epsg(code as u32)),
            Err(_) => srs.to_wkt().ok().map(CRS::from_wkt),
        }
    });

    let data_type = match rasterband.band_type() {
        GdalDataType::UInt8 => DataType::UInt8,
        GdalDataType::UInt16 => DataType::UInt16,
        GdalDataType::Int16 => DataType::Int16,
        GdalDataType::Int32 => DataType::Int32,
        GdalDataType::Float32 => DataType::Float32,
        GdalDataType::Float64 => DataType::Float64,
        other => {
            return Err(Error::UnsupportedDataType(format!("GDAL band type {:?}", other)));
        }
    };

    Ok(RasterMeta {
        spec: GridSpec::new(crs, transform, rows, cols),
        nodata: rasterband.no_data_value(),
        data_type,
    })
}

/// Write a Raster to a GeoTIFF file
///
/// `u8` and `u16` rasters keep their type; everything else is written as
/// 32-bit float, matching the native writer.
pub fn write_geotiff<T, P>(
    raster: &Raster<T>,
    path: P,
    options: Option<GeoTiffOptions>,
) -> Result<()>
where
    T: RasterElement + GdalType,
    P: AsRef<Path>,
{
    match T::DATA_TYPE {
        DataType::UInt8 => write_as::<T, u8>(raster, path.as_ref(), options),
        DataType::UInt16 => write_as::<T, u16>(raster, path.as_ref(), options),
        _ => write_as::<T, f32>(raster, path.as_ref(), options),
    }
}

fn write_as<T, U>(raster: &Raster<T>, path: &Path, options: Option<GeoTiffOptions>) -> Result<()>
where
    T: RasterElement,
    U: RasterElement + GdalType,
{
    let opts = options.unwrap_or_default();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (rows, cols) = raster.shape();

    let mut create_options = RasterCreationOptions::new();
    create_options.set_name_value("COMPRESS", &opts.compression)?;
    if opts.tile_size > 0 {
        let block = opts.tile_size.to_string();
        create_options.set_name_value("TILED", "YES")?;
        create_options.set_name_value("BLOCKXSIZE", &block)?;
        create_options.set_name_value("BLOCKYSIZE", &block)?;
    }

    let mut dataset = driver.create_with_band_type_with_options::<U, _>(
        path,
        cols,
        rows,
        1,
        &create_options,
    )?;

    dataset.set_geo_transform(&raster.transform().to_gdal())?;

    if let Some(crs) = raster.crs() {
        if let Some(epsg) = crs.epsg() {
            dataset.set_spatial_ref(&SpatialRef::from_epsg(epsg)?)?;
        } else if let Some(wkt) = crs.wkt() {
            dataset.set_spatial_ref(&SpatialRef::from_wkt(wkt)?)?;
        }
    }

    let mut band = dataset.rasterband(1)?;
    if let Some(nd) = raster.nodata().and_then(|nd| nd.to_f64()) {
        band.set_no_data_value(Some(nd))?;
    }

    let data: Vec<U> = raster
        .data()
        .iter()
        .map(|&v| num_traits::cast(v).unwrap_or(U::default_nodata()))
        .collect();
    let mut buffer = Buffer::new((cols, rows), data);
    band.write((0, 0), (cols, rows), &mut buffer)?;

    Ok(())
}
