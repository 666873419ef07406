//! Native GeoTIFF reading/writing (without GDAL dependency)
//!
//! Uses the `tiff` crate. Georeferencing is carried by the ModelPixelScale,
//! ModelTiepoint and GeoKeyDirectory tags, no-data by the GDAL_NODATA tag,
//! so files round-trip through GDAL-based tools.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::RasterMeta;
use crate::raster::{DataType, GeoTransform, GridSpec, Raster, RasterElement};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{ColorType, Gray16, Gray32Float, Gray8};
use tiff::encoder::compression::{Compression as TiffCompression, Deflate, Lzw, Uncompressed};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tiff::ColorType as PixelLayout;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
/// GeoTIFF marker for a user-defined (non-EPSG) CRS
const USER_DEFINED: u16 = 32767;

/// Options for writing GeoTIFF files
#[derive(Debug, Clone)]
pub struct GeoTiffOptions {
    /// Compression type: "DEFLATE", "LZW", "NONE"
    pub compression: String,
}

impl Default for GeoTiffOptions {
    fn default() -> Self {
        Self {
            compression: "DEFLATE".to_string(),
        }
    }
}

/// Read a GeoTIFF file into a Raster
///
/// Only the first band is decoded; `band` is accepted for parity with the
/// GDAL backend.
pub fn read_geotiff<T, P>(path: P, band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(BufReader::new(file), band)
}

/// Read a GeoTIFF from an in-memory buffer into a Raster
pub fn read_geotiff_from_buffer<T>(data: &[u8], band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
{
    decode_geotiff(Cursor::new(data), band)
}

/// Read dimensions, georeferencing and no-data of a GeoTIFF without
/// decoding its pixels
pub fn read_geotiff_meta<P: AsRef<Path>>(path: P) -> Result<RasterMeta> {
    let file = File::open(path.as_ref())?;
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(tiff_err("TIFF decode error"))?;
    read_meta(&mut decoder)
}

fn tiff_err(context: &'static str) -> impl Fn(tiff::TiffError) -> Error {
    move |e| Error::Other(format!("{}: {}", context, e))
}

fn read_meta<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<RasterMeta> {
    let (width, height) = decoder
        .dimensions()
        .map_err(tiff_err("Cannot read dimensions"))?;

    let sample_format = decoder.get_tag_u32(Tag::SampleFormat).unwrap_or(1);
    let layout = decoder.colortype().map_err(tiff_err("Cannot read pixel layout"))?;
    let data_type = match (layout, sample_format) {
        (PixelLayout::Gray(8), _) => DataType::UInt8,
        (PixelLayout::Gray(16), 2) => DataType::Int16,
        (PixelLayout::Gray(16), _) => DataType::UInt16,
        (PixelLayout::Gray(32), 3) => DataType::Float32,
        (PixelLayout::Gray(32), _) => DataType::Int32,
        (PixelLayout::Gray(64), 3) => DataType::Float64,
        (other, _) => {
            return Err(Error::UnsupportedDataType(format!(
                "TIFF pixel layout {:?}",
                other
            )))
        }
    };

    let transform = read_geotransform(decoder).unwrap_or_default();
    let crs = read_crs(decoder);
    let nodata = decoder
        .get_tag_ascii_string(Tag::Unknown(TAG_GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim().trim_end_matches('\0').parse::<f64>().ok());

    Ok(RasterMeta {
        spec: GridSpec::new(crs, transform, height as usize, width as usize),
        nodata,
        data_type,
    })
}

/// Internal: decode a GeoTIFF from any `Read + Seek` source
fn decode_geotiff<T, R>(reader: R, _band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
    R: Read + Seek,
{
    let mut decoder = Decoder::new(reader).map_err(tiff_err("TIFF decode error"))?;
    let meta = read_meta(&mut decoder)?;
    let (rows, cols) = meta.shape();

    let result = decoder
        .read_image()
        .map_err(tiff_err("Cannot read image data"))?;

    let data: Vec<T> = match result {
        DecodingResult::F32(buf) => cast_all(&buf),
        DecodingResult::F64(buf) => cast_all(&buf),
        DecodingResult::U8(buf) => cast_all(&buf),
        DecodingResult::U16(buf) => cast_all(&buf),
        DecodingResult::U32(buf) => cast_all(&buf),
        DecodingResult::I8(buf) => cast_all(&buf),
        DecodingResult::I16(buf) => cast_all(&buf),
        DecodingResult::I32(buf) => cast_all(&buf),
        _ => return Err(Error::UnsupportedDataType("Unsupported TIFF pixel format".to_string())),
    };

    // Multi-sample (chunky) images decode interleaved; keep the first sample
    let samples = data.len() / (rows * cols).max(1);
    let data = if samples > 1 {
        data.into_iter().step_by(samples).collect()
    } else {
        data
    };

    let mut raster = Raster::from_vec(data, rows, cols)?;
    raster.set_transform(meta.spec.transform);
    raster.set_crs(meta.spec.crs);
    raster.set_nodata(meta.nodata.and_then(num_traits::cast));

    Ok(raster)
}

fn cast_all<S: Copy + num_traits::NumCast, T: RasterElement>(buf: &[S]) -> Vec<T> {
    buf.iter()
        .map(|&v| num_traits::cast(v).unwrap_or(T::default_nodata()))
        .collect()
}

/// Attempt to read GeoTransform from TIFF tags
fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::Unknown(TAG_MODEL_PIXEL_SCALE))
        .map_err(|_| Error::Other("No pixel scale tag".into()))?;

    let tiepoint = decoder
        .get_tag_f64_vec(Tag::Unknown(TAG_MODEL_TIEPOINT))
        .map_err(|_| Error::Other("No tiepoint tag".into()))?;

    if scale.len() >= 2 && tiepoint.len() >= 6 {
        // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        return Ok(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]));
    }

    Err(Error::Other("Cannot determine geotransform".into()))
}

/// EPSG code from the GeoKeyDirectory, projected key first
fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let keys = decoder
        .get_tag_u16_vec(Tag::Unknown(TAG_GEO_KEY_DIRECTORY))
        .ok()?;
    let lookup = |wanted: u16| {
        keys.get(4..)?
            .chunks_exact(4)
            .find(|entry| entry[0] == wanted && entry[1] == 0)
            .map(|entry| entry[3])
            .filter(|&code| code != 0 && code != USER_DEFINED)
    };
    lookup(KEY_PROJECTED_CS_TYPE)
        .or_else(|| lookup(KEY_GEOGRAPHIC_TYPE))
        .map(|code| CRS::from_epsg(code as u32))
}

/// GeoKeyDirectory for a raster, keys sorted by id
fn geo_keys(crs: Option<&CRS>) -> Vec<u16> {
    let mut entries: Vec<[u16; 4]> = Vec::new();
    let epsg = crs.and_then(|c| c.epsg()).and_then(|e| u16::try_from(e).ok());

    match (crs, epsg) {
        (Some(c), Some(code)) if c.is_geographic() => {
            entries.push([KEY_MODEL_TYPE, 0, 1, MODEL_TYPE_GEOGRAPHIC]);
            entries.push([KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
            entries.push([KEY_GEOGRAPHIC_TYPE, 0, 1, code]);
        }
        (Some(_), Some(code)) => {
            entries.push([KEY_MODEL_TYPE, 0, 1, MODEL_TYPE_PROJECTED]);
            entries.push([KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
            entries.push([KEY_PROJECTED_CS_TYPE, 0, 1, code]);
        }
        _ => {
            entries.push([KEY_MODEL_TYPE, 0, 1, MODEL_TYPE_PROJECTED]);
            entries.push([KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
        }
    }

    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.into_iter().flatten());
    keys
}

/// GDAL_NODATA text for a sentinel
fn format_nodata(nodata: f64) -> String {
    if nodata.is_nan() {
        "nan".to_string()
    } else {
        format!("{}", nodata)
    }
}

/// Write a Raster to a GeoTIFF file
///
/// `u8` and `u16` rasters keep their type; everything else is written as
/// 32-bit float.
pub fn write_geotiff<T, P>(
    raster: &Raster<T>,
    path: P,
    options: Option<GeoTiffOptions>,
) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    encode_geotiff(raster, file, &options.unwrap_or_default())
}

/// Write a Raster to an in-memory GeoTIFF buffer
pub fn write_geotiff_to_buffer<T>(
    raster: &Raster<T>,
    options: Option<GeoTiffOptions>,
) -> Result<Vec<u8>>
where
    T: RasterElement,
{
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf), &options.unwrap_or_default())?;
    Ok(buf)
}

/// Georeferencing tags shared by every sample type
struct GeoTags {
    scale: [f64; 3],
    tiepoint: [f64; 6],
    keys: Vec<u16>,
    nodata: Option<String>,
}

impl GeoTags {
    fn for_raster<T: RasterElement>(raster: &Raster<T>) -> Self {
        let gt = raster.transform();
        Self {
            scale: [gt.pixel_width, gt.pixel_height.abs(), 0.0],
            tiepoint: [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0],
            keys: geo_keys(raster.crs()),
            nodata: raster
                .nodata()
                .and_then(|nd| nd.to_f64())
                .map(format_nodata),
        }
    }
}

/// Internal: encode a Raster as GeoTIFF into any `Write + Seek` sink
fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W, options: &GeoTiffOptions) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let mut encoder = TiffEncoder::new(writer).map_err(tiff_err("TIFF encoder error"))?;
    let tags = GeoTags::for_raster(raster);
    let compression = options.compression.to_ascii_uppercase();

    match T::DATA_TYPE {
        DataType::UInt8 => {
            let data: Vec<u8> = raster
                .data()
                .iter()
                .map(|&v| num_traits::cast(v).unwrap_or(u8::MAX))
                .collect();
            encode_with::<_, Gray8>(&mut encoder, raster, &tags, &data, &compression)
        }
        DataType::UInt16 => {
            let data: Vec<u16> = raster
                .data()
                .iter()
                .map(|&v| num_traits::cast(v).unwrap_or(u16::MAX))
                .collect();
            encode_with::<_, Gray16>(&mut encoder, raster, &tags, &data, &compression)
        }
        _ => {
            let data: Vec<f32> = raster
                .data()
                .iter()
                .map(|&v| num_traits::cast(v).unwrap_or(f32::NAN))
                .collect();
            encode_with::<_, Gray32Float>(&mut encoder, raster, &tags, &data, &compression)
        }
    }
}

fn encode_with<W, C>(
    encoder: &mut TiffEncoder<W>,
    raster: &Raster<impl RasterElement>,
    tags: &GeoTags,
    data: &[C::Inner],
    compression: &str,
) -> Result<()>
where
    W: Write + Seek,
    C: ColorType,
    [C::Inner]: TiffValue,
{
    let (rows, cols) = raster.shape();
    match compression {
        "NONE" => write_image::<W, C, _>(encoder, cols, rows, tags, data, Uncompressed),
        "LZW" => write_image::<W, C, _>(encoder, cols, rows, tags, data, Lzw::default()),
        "DEFLATE" => write_image::<W, C, _>(encoder, cols, rows, tags, data, Deflate::default()),
        other => Err(Error::InvalidParameter {
            name: "compression",
            value: other.to_string(),
            reason: "expected NONE, LZW or DEFLATE".into(),
        }),
    }
}

fn write_image<W, C, D>(
    encoder: &mut TiffEncoder<W>,
    cols: usize,
    rows: usize,
    tags: &GeoTags,
    data: &[C::Inner],
    compression: D,
) -> Result<()>
where
    W: Write + Seek,
    C: ColorType,
    [C::Inner]: TiffValue,
    D: TiffCompression,
{
    let mut image = encoder
        .new_image_with_compression::<C, D>(cols as u32, rows as u32, compression)
        .map_err(tiff_err("Cannot create TIFF image"))?;

    let dir = image.encoder();
    dir.write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), &tags.scale[..])
        .map_err(tiff_err("Cannot write scale tag"))?;
    dir.write_tag(Tag::Unknown(TAG_MODEL_TIEPOINT), &tags.tiepoint[..])
        .map_err(tiff_err("Cannot write tiepoint tag"))?;
    dir.write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), tags.keys.as_slice())
        .map_err(tiff_err("Cannot write geokey tag"))?;
    if let Some(nodata) = &tags.nodata {
        dir.write_tag(Tag::Unknown(TAG_GDAL_NODATA), nodata.as_str())
            .map_err(tiff_err("Cannot write nodata tag"))?;
    }

    image
        .write_data(data)
        .map_err(tiff_err("Cannot write image data"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn make_grid() -> Raster<f64> {
        let mut raster = Raster::new(6, 5);
        for r in 0..6 {
            for c in 0..5 {
                raster.set(r, c, (r * 5 + c) as f64 / 30.0).unwrap();
            }
        }
        raster.set(2, 3, f64::NAN).unwrap();
        raster.set_transform(GeoTransform::north_up(440_000.0, 4_475_000.0, 10.0));
        raster.set_crs(Some(CRS::utm(30, true)));
        raster.set_nodata(Some(f64::NAN));
        raster
    }

    #[test]
    fn test_float_roundtrip_keeps_georeferencing() {
        let raster = make_grid();
        let tmp = NamedTempFile::with_suffix(".tif").unwrap();
        write_geotiff(&raster, tmp.path(), None).unwrap();

        let loaded: Raster<f64> = read_geotiff(tmp.path(), None).unwrap();
        assert_eq!(loaded.shape(), (6, 5));
        assert_eq!(loaded.crs(), Some(&CRS::utm(30, true)));
        assert_eq!(loaded.transform(), raster.transform());
        assert!(loaded.nodata().is_some_and(|nd| nd.is_nan()));
        assert!(loaded.get(2, 3).unwrap().is_nan());

        let v = loaded.get(4, 1).unwrap();
        assert!((v - 21.0 / 30.0).abs() < 1e-6, "expected float32 precision, got {}", v);
    }

    #[test]
    fn test_u8_roundtrip_keeps_sentinel() {
        let mut classes: Raster<u8> = Raster::filled(3, 3, 0);
        classes.set(1, 1, 2).unwrap();
        classes.set(0, 0, 255).unwrap();
        classes.set_transform(GeoTransform::north_up(10.0, 50.0, 0.001));
        classes.set_crs(Some(CRS::wgs84()));
        classes.set_nodata(Some(255));

        let buf = write_geotiff_to_buffer(&classes, Some(GeoTiffOptions {
            compression: "lzw".into(),
        }))
        .unwrap();
        let loaded: Raster<u8> = read_geotiff_from_buffer(&buf, None).unwrap();

        assert_eq!(loaded.get(1, 1).unwrap(), 2);
        assert_eq!(loaded.nodata(), Some(255));
        assert_eq!(loaded.crs(), Some(&CRS::wgs84()));
    }

    #[test]
    fn test_meta_without_pixels() {
        let raster = make_grid();
        let tmp = NamedTempFile::with_suffix(".tif").unwrap();
        write_geotiff(&raster, tmp.path(), Some(GeoTiffOptions {
            compression: "NONE".into(),
        }))
        .unwrap();

        let meta = read_geotiff_meta(tmp.path()).unwrap();
        assert_eq!(meta.shape(), (6, 5));
        assert_eq!(meta.data_type, DataType::Float32);
        assert_eq!(meta.spec.crs, Some(CRS::utm(30, true)));
        assert_eq!(meta.bounds(), (440_000.0, 4_474_940.0, 440_050.0, 4_475_000.0));
    }

    #[test]
    fn test_unknown_compression_is_rejected() {
        let raster = make_grid();
        let err = write_geotiff_to_buffer(&raster, Some(GeoTiffOptions {
            compression: "JPEG".into(),
        }))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "compression", .. }));
    }

    #[test]
    fn test_geokeys_are_sorted() {
        let keys = geo_keys(Some(&CRS::equal_area()));
        assert_eq!(&keys[..4], &[1, 1, 0, 3]);
        let ids: Vec<u16> = keys[4..].chunks(4).map(|e| e[0]).collect();
        assert_eq!(ids, vec![KEY_MODEL_TYPE, KEY_RASTER_TYPE, KEY_PROJECTED_CS_TYPE]);
    }
}
