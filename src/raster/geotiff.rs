//! GeoTIFF decoding on top of the `tiff` crate.
//!
//! Only the georeferencing tags needed to build a pixel-to-world affine transform and a CRS
//! identifier are interpreted. Pixel samples are handed back interleaved as decoded.

use crate::error::PipelineError;
use crate::raster::PixelBuffer;
use crate::raster::affine::GeoTransform;
use ndarray::Array3;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

pub const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
pub const MODEL_TIEPOINT_TAG: u16 = 33922;
pub const MODEL_TRANSFORMATION_TAG: u16 = 34264;
pub const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
pub const GEO_DOUBLE_PARAMS_TAG: u16 = 34736;
pub const GEO_ASCII_PARAMS_TAG: u16 = 34737;

const GT_RASTER_TYPE_KEY: u16 = 1025;
const GT_CITATION_KEY: u16 = 1026;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const GEOG_CITATION_KEY: u16 = 2049;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const PCS_CITATION_KEY: u16 = 3073;

const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

/// Everything read out of one GeoTIFF.
pub struct GeoTiff {
    pub pixels: PixelBuffer,
    pub transform: Option<GeoTransform>,
    pub crs: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum GeoKeyValue {
    Short(u16),
    Ascii(String),
    Double(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
struct GeoKey {
    id: u16,
    value: GeoKeyValue,
}

fn tiff_error(path: &Path) -> impl Fn(tiff::TiffError) -> PipelineError + '_ {
    move |err| match err {
        tiff::TiffError::IoError(e) => PipelineError::io(path, e),
        other => PipelineError::format(format!("{}: {}", path.display(), other)),
    }
}

fn find_f64_tag(
    decoder: &mut Decoder<BufReader<File>>,
    tag: u16,
    path: &Path,
) -> Result<Option<Vec<f64>>, PipelineError> {
    match decoder.find_tag(Tag::from_u16_exhaustive(tag)).map_err(tiff_error(path))? {
        Some(value) => Ok(Some(value.into_f64_vec().map_err(tiff_error(path))?)),
        None => Ok(None),
    }
}

pub fn read_geotiff(path: &Path) -> Result<GeoTiff, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(tiff_error(path))?
        .with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions().map_err(tiff_error(path))?;

    let pixel_scale = find_f64_tag(&mut decoder, MODEL_PIXEL_SCALE_TAG, path)?;
    let tiepoints = find_f64_tag(&mut decoder, MODEL_TIEPOINT_TAG, path)?;
    let model_transformation = find_f64_tag(&mut decoder, MODEL_TRANSFORMATION_TAG, path)?;
    let double_params = find_f64_tag(&mut decoder, GEO_DOUBLE_PARAMS_TAG, path)?.unwrap_or_default();
    let ascii_params = match decoder
        .find_tag(Tag::from_u16_exhaustive(GEO_ASCII_PARAMS_TAG))
        .map_err(tiff_error(path))?
    {
        Some(value) => value.into_string().map_err(tiff_error(path))?,
        None => String::new(),
    };
    let keys = match decoder
        .find_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG))
        .map_err(tiff_error(path))?
    {
        Some(value) => {
            let raw: Vec<u16> = value
                .into_u32_vec()
                .map_err(tiff_error(path))?
                .into_iter()
                .map(|v| v as u16)
                .collect();
            parse_geo_keys(&raw, &double_params, &ascii_params)
        }
        None => vec![],
    };

    let mut transform = build_transform(
        pixel_scale.as_deref(),
        tiepoints.as_deref(),
        model_transformation.as_deref(),
    );
    if short_key(&keys, GT_RASTER_TYPE_KEY) == Some(RASTER_PIXEL_IS_POINT) {
        transform = transform.map(|t| t.shifted(-0.5, -0.5));
    }
    let crs = crs_identifier(&keys);

    let decoded = decoder.read_image().map_err(tiff_error(path))?;
    let pixels = into_pixel_buffer(decoded, width as usize, height as usize)?;
    Ok(GeoTiff {
        pixels,
        transform,
        crs,
    })
}

fn into_pixel_buffer(
    decoded: DecodingResult,
    width: usize,
    height: usize,
) -> Result<PixelBuffer, PipelineError> {
    fn shaped<T>(data: Vec<T>, width: usize, height: usize) -> Result<Array3<T>, PipelineError> {
        let pixel_count = width * height;
        if pixel_count == 0 || data.len() % pixel_count != 0 {
            return Err(PipelineError::format(format!(
                "sample count {} does not divide into {}x{} pixels",
                data.len(),
                width,
                height
            )));
        }
        let bands = data.len() / pixel_count;
        Array3::from_shape_vec((height, width, bands), data)
            .map_err(|e| PipelineError::format(e.to_string()))
    }
    fn to_f32<T: Copy>(data: Vec<T>, f: impl Fn(T) -> f32) -> Vec<f32> {
        data.into_iter().map(f).collect()
    }
    let pixels = match decoded {
        DecodingResult::U8(data) => PixelBuffer::U8(shaped(data, width, height)?),
        DecodingResult::U16(data) => PixelBuffer::U16(shaped(data, width, height)?),
        DecodingResult::F32(data) => PixelBuffer::F32(shaped(data, width, height)?),
        DecodingResult::F64(data) => {
            PixelBuffer::F32(shaped(to_f32(data, |v| v as f32), width, height)?)
        }
        DecodingResult::U32(data) => {
            PixelBuffer::F32(shaped(to_f32(data, |v| v as f32), width, height)?)
        }
        DecodingResult::I8(data) => {
            PixelBuffer::F32(shaped(to_f32(data, |v| v as f32), width, height)?)
        }
        DecodingResult::I16(data) => {
            PixelBuffer::F32(shaped(to_f32(data, |v| v as f32), width, height)?)
        }
        DecodingResult::I32(data) => {
            PixelBuffer::F32(shaped(to_f32(data, |v| v as f32), width, height)?)
        }
        _ => {
            return Err(PipelineError::format(
                "unsupported TIFF sample format (64-bit integer samples)",
            ));
        }
    };
    Ok(pixels)
}

/// Builds the affine transform from the model tags.
///
/// A full model transformation matrix wins over scale + tiepoint. Only the first tiepoint is
/// used; rasters georeferenced by many tiepoints (GCPs) without a scale are not supported.
pub fn build_transform(
    pixel_scale: Option<&[f64]>,
    tiepoints: Option<&[f64]>,
    model_transformation: Option<&[f64]>,
) -> Option<GeoTransform> {
    if let Some(m) = model_transformation {
        if m.len() >= 8 {
            return Some(GeoTransform::new(m[0], m[1], m[3], m[4], m[5], m[7]));
        }
    }
    match (pixel_scale, tiepoints) {
        (Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => {
            let (sx, sy) = (scale[0], scale[1]);
            let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
            Some(GeoTransform::new(sx, 0.0, x - i * sx, 0.0, -sy, y + j * sy))
        }
        _ => None,
    }
}

fn parse_geo_keys(raw: &[u16], doubles: &[f64], ascii: &str) -> Vec<GeoKey> {
    if raw.len() < 4 {
        return vec![];
    }
    let count = raw[3] as usize;
    raw[4..]
        .chunks_exact(4)
        .take(count)
        .filter_map(|entry| {
            let (id, location, n, offset) =
                (entry[0], entry[1], entry[2] as usize, entry[3] as usize);
            let value = match location {
                0 => GeoKeyValue::Short(offset as u16),
                GEO_ASCII_PARAMS_TAG => {
                    let text = ascii.get(offset..offset + n)?;
                    GeoKeyValue::Ascii(text.trim_end_matches(['|', '\0']).trim().to_string())
                }
                GEO_DOUBLE_PARAMS_TAG => GeoKeyValue::Double(doubles.get(offset..offset + n)?.to_vec()),
                _ => return None,
            };
            Some(GeoKey { id, value })
        })
        .collect()
}

fn short_key(keys: &[GeoKey], id: u16) -> Option<u16> {
    keys.iter().find(|k| k.id == id).and_then(|k| match k.value {
        GeoKeyValue::Short(v) => Some(v),
        _ => None,
    })
}

fn ascii_key(keys: &[GeoKey], id: u16) -> Option<&str> {
    keys.iter().find(|k| k.id == id).and_then(|k| match &k.value {
        GeoKeyValue::Ascii(s) if !s.is_empty() => Some(s.as_str()),
        _ => None,
    })
}

/// `EPSG:<code>` for a projected or geographic EPSG code, otherwise a citation string.
fn crs_identifier(keys: &[GeoKey]) -> Option<String> {
    for id in [PROJECTED_CS_TYPE_KEY, GEOGRAPHIC_TYPE_KEY] {
        if let Some(code) = short_key(keys, id) {
            if code != 0 && code != USER_DEFINED {
                return Some(format!("EPSG:{}", code));
            }
        }
    }
    [PCS_CITATION_KEY, GEOG_CITATION_KEY, GT_CITATION_KEY]
        .iter()
        .find_map(|id| ascii_key(keys, *id))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tiff::encoder::{TiffEncoder, colortype};

    #[test]
    fn transform_from_scale_and_tiepoint() {
        let t = build_transform(
            Some(&[0.5, 0.25, 0.0]),
            Some(&[0.0, 0.0, 0.0, 300000.0, 4000000.0, 0.0]),
            None,
        )
        .unwrap();
        assert_eq!(t, GeoTransform::new(0.5, 0.0, 300000.0, 0.0, -0.25, 4000000.0));
    }

    #[test]
    fn transform_from_offset_tiepoint() {
        let t = build_transform(
            Some(&[2.0, 2.0, 0.0]),
            Some(&[10.0, 20.0, 0.0, 1000.0, 5000.0, 0.0]),
            None,
        )
        .unwrap();
        let p = t.apply(10.0, 20.0);
        assert_relative_eq!(p.x, 1000.0);
        assert_relative_eq!(p.y, 5000.0);
    }

    #[test]
    fn model_transformation_wins() {
        let m = [
            1.0, 0.1, 0.0, 50.0, //
            0.2, -1.0, 0.0, 60.0, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        let t = build_transform(Some(&[9.0, 9.0, 0.0]), Some(&[0.0; 6]), Some(&m)).unwrap();
        assert_eq!(t, GeoTransform::new(1.0, 0.1, 50.0, 0.2, -1.0, 60.0));
    }

    #[test]
    fn epsg_from_geo_keys() {
        let raw = [1, 1, 0, 2, 1024, 0, 1, 1, 3072, 0, 1, 32650];
        let keys = parse_geo_keys(&raw, &[], "");
        assert_eq!(crs_identifier(&keys).as_deref(), Some("EPSG:32650"));
    }

    #[test]
    fn citation_for_user_defined_crs() {
        let ascii = "Local grid|";
        let raw = [1, 1, 0, 2, 3072, 0, 1, USER_DEFINED, 3073, GEO_ASCII_PARAMS_TAG, 11, 0];
        let keys = parse_geo_keys(&raw, &[], ascii);
        assert_eq!(crs_identifier(&keys).as_deref(), Some("Local grid"));
    }

    #[test]
    fn reads_encoded_geotiff() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scene.tif");
        let (w, h) = (4u32, 3u32);
        let data: Vec<u8> = (0..(w * h * 3)).map(|v| v as u8).collect();
        {
            let file = File::create(&path).unwrap();
            let mut encoder = TiffEncoder::new(file).unwrap();
            let mut image = encoder.new_image::<colortype::RGB8>(w, h).unwrap();
            image
                .encoder()
                .write_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE_TAG), &[0.5f64, 0.5, 0.0][..])
                .unwrap();
            image
                .encoder()
                .write_tag(
                    Tag::from_u16_exhaustive(MODEL_TIEPOINT_TAG),
                    &[0.0f64, 0.0, 0.0, 117.0, 34.0, 0.0][..],
                )
                .unwrap();
            image
                .encoder()
                .write_tag(
                    Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG),
                    &[1u16, 1, 0, 1, 2048, 0, 1, 4326][..],
                )
                .unwrap();
            image.write_data(&data).unwrap();
        }
        let geotiff = read_geotiff(&path).unwrap();
        assert_eq!(geotiff.crs.as_deref(), Some("EPSG:4326"));
        assert_eq!(
            geotiff.transform,
            Some(GeoTransform::new(0.5, 0.0, 117.0, 0.0, -0.5, 34.0))
        );
        match geotiff.pixels {
            PixelBuffer::U8(arr) => {
                assert_eq!(arr.shape(), &[3, 4, 3]);
                assert_eq!(arr[[1, 2, 0]], 18);
            }
            _ => panic!("expected 8-bit samples"),
        }
    }
}
