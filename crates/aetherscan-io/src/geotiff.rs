//! GeoTIFF decoding.
//!
//! Pixel-interleaved TIFFs with any number of samples per pixel become
//! one band per sample, whatever the photometric interpretation says.
//! Georeferencing is read from `ModelPixelScale` + `ModelTiepoint` or
//! from `ModelTransformation`, and the EPSG code from the GeoKey
//! directory.

use std::io::{Cursor, Read, Seek};

use aetherscan_pipeline::{FloatImage, GeoTransform};
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

use crate::IoError;

const PLANAR_SEPARATE: u16 = 2;

const RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

const MAGIC: [&[u8]; 4] = [b"II*\0", b"MM\0*", b"II+\0", b"MM\0+"];

/// Spatial reference embedded in a GeoTIFF.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Georeferencing {
    /// Pixel-corner affine transform.
    pub transform: GeoTransform,
    /// EPSG code of the projected or geographic CRS, if declared.
    pub epsg: Option<u16>,
}

/// Whether `bytes` start with a classic or BigTIFF header.
pub(crate) fn is_tiff(bytes: &[u8]) -> bool {
    MAGIC.iter().any(|magic| bytes.starts_with(magic))
}

/// Decode the first image of a TIFF into per-sample bands.
pub(crate) fn decode_tiff(
    bytes: &[u8],
) -> Result<(Vec<FloatImage>, Option<Georeferencing>), IoError> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?;
    if decoder.find_tag_unsigned::<u16>(Tag::PlanarConfiguration)? == Some(PLANAR_SEPARATE) {
        return Err(IoError::UnsupportedLayout(
            "band-sequential (planar) TIFF".to_owned(),
        ));
    }
    let (width, height) = decoder.dimensions()?;
    let samples = samples_to_f32(decoder.read_image()?);
    let bands = deinterleave(samples, width, height)?;
    let georeferencing = read_georeferencing(&mut decoder)?;
    tracing::debug!(
        width,
        height,
        bands = bands.len(),
        georeferenced = georeferencing.is_some(),
        epsg = georeferencing.and_then(|g| g.epsg),
        "tiff decoded"
    );
    Ok((bands, georeferencing))
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn samples_to_f32(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(buf) => buf.into_iter().map(|v| v as f32).collect(),
    }
}

/// Split chunky `[p0s0, p0s1, .., p1s0, ..]` samples into planes.
fn deinterleave(samples: Vec<f32>, width: u32, height: u32) -> Result<Vec<FloatImage>, IoError> {
    let pixels = width as usize * height as usize;
    if pixels == 0 {
        return Ok(Vec::new());
    }
    let count = samples.len() / pixels;
    if count == 0 || samples.len() % pixels != 0 {
        return Err(IoError::UnsupportedLayout(format!(
            "{} samples do not divide into {width}x{height} pixels",
            samples.len()
        )));
    }
    if count == 1 {
        return single_plane(samples, width, height).map(|band| vec![band]);
    }

    let mut planes = vec![Vec::with_capacity(pixels); count];
    for pixel in samples.chunks_exact(count) {
        for (plane, &value) in planes.iter_mut().zip(pixel) {
            plane.push(value);
        }
    }
    planes
        .into_iter()
        .map(|plane| single_plane(plane, width, height))
        .collect()
}

fn single_plane(plane: Vec<f32>, width: u32, height: u32) -> Result<FloatImage, IoError> {
    FloatImage::from_raw(width, height, plane)
        .ok_or_else(|| IoError::UnsupportedLayout(format!("short {width}x{height} plane")))
}

fn read_georeferencing<R: Read + Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Option<Georeferencing>, IoError> {
    let keys = GeoKeys::read(decoder)?;
    let transform = match tiepoint_transform(decoder)? {
        Some(transform) => Some(transform),
        None => matrix_transform(decoder)?,
    };
    let Some(mut transform) = transform else {
        return Ok(None);
    };
    if keys.get(RASTER_TYPE_KEY) == Some(RASTER_PIXEL_IS_POINT) {
        let (x, y) = transform.apply(-0.5, -0.5);
        transform.origin_x = x;
        transform.origin_y = y;
    }
    let epsg = keys
        .get(PROJECTED_CS_TYPE_KEY)
        .or_else(|| keys.get(GEOGRAPHIC_TYPE_KEY))
        .filter(|&code| code != 0 && code != USER_DEFINED);
    Ok(Some(Georeferencing { transform, epsg }))
}

fn f64_tag<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    tag: Tag,
) -> Result<Option<Vec<f64>>, IoError> {
    Ok(decoder.find_tag(tag)?.map(Value::into_f64_vec).transpose()?)
}

/// North-up transform from a pixel scale and the first tiepoint.
fn tiepoint_transform<R: Read + Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Option<GeoTransform>, IoError> {
    let Some(scale) = f64_tag(decoder, Tag::ModelPixelScaleTag)? else {
        return Ok(None);
    };
    let Some(tiepoint) = f64_tag(decoder, Tag::ModelTiepointTag)? else {
        return Ok(None);
    };
    let (&[sx, sy, ..], &[i, j, _, x, y, ..]) = (scale.as_slice(), tiepoint.as_slice()) else {
        tracing::warn!(
            scale = scale.len(),
            tiepoint = tiepoint.len(),
            "ignoring truncated GeoTIFF scale/tiepoint tags"
        );
        return Ok(None);
    };
    Ok(Some(GeoTransform::from_gdal([
        (-i).mul_add(sx, x),
        sx,
        0.0,
        j.mul_add(sy, y),
        0.0,
        -sy,
    ])))
}

/// Affine part of a row-major 4x4 model transformation.
fn matrix_transform<R: Read + Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Option<GeoTransform>, IoError> {
    let Some(matrix) = f64_tag(decoder, Tag::ModelTransformationTag)? else {
        return Ok(None);
    };
    let [a, b, _, c, d, e, _, f, ..] = matrix[..] else {
        tracing::warn!(len = matrix.len(), "ignoring truncated GeoTIFF transformation tag");
        return Ok(None);
    };
    Ok(Some(GeoTransform::from_coefficients([a, b, c, d, e, f])))
}

/// Inline (SHORT-valued) entries of the GeoKey directory.
#[derive(Debug, Default)]
struct GeoKeys(Vec<(u16, u16)>);

impl GeoKeys {
    fn read<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Self, IoError> {
        let Some(directory) = decoder.find_tag(Tag::GeoKeyDirectoryTag)? else {
            return Ok(Self::default());
        };
        let directory = directory.into_u16_vec()?;
        Ok(Self(
            directory
                .chunks_exact(4)
                .skip(1)
                .filter(|entry| entry[1] == 0)
                .map(|entry| (entry[0], entry[3]))
                .collect(),
        ))
    }

    fn get(&self, key: u16) -> Option<u16> {
        self.0.iter().find(|(k, _)| *k == key).map(|&(_, v)| v)
    }
}

/// Little-endian TIFF writer for building decoder inputs in tests.
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod fixture {
    pub const PIXEL_SCALE: u16 = 33550;
    pub const TIEPOINT: u16 = 33922;
    pub const TRANSFORMATION: u16 = 34264;
    pub const GEO_KEYS: u16 = 34735;
    pub const PLANAR_CONFIGURATION: u16 = 284;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const STRIP_BYTE_COUNTS: u16 = 279;

    #[derive(Debug, Clone)]
    pub enum Field {
        Short(Vec<u16>),
        Long(Vec<u32>),
        Double(Vec<f64>),
    }

    impl Field {
        fn encode(&self) -> (u16, u32, Vec<u8>) {
            match self {
                Self::Short(v) => (3, count(v.len()), v.iter().flat_map(|x| x.to_le_bytes()).collect()),
                Self::Long(v) => (4, count(v.len()), v.iter().flat_map(|x| x.to_le_bytes()).collect()),
                Self::Double(v) => (12, count(v.len()), v.iter().flat_map(|x| x.to_le_bytes()).collect()),
            }
        }
    }

    fn count(n: usize) -> u32 {
        u32::try_from(n).unwrap()
    }

    /// Uncompressed, single-strip, MinIsBlack TIFF with `samples` 16-bit
    /// samples per pixel in chunky order, plus any `extra` tags.
    ///
    /// `StripOffsets` values are relative to the start of `data`.
    pub fn u16_tiff(
        width: u32,
        height: u32,
        samples: u16,
        data: &[u16],
        extra: Vec<(u16, Field)>,
    ) -> Vec<u8> {
        let n = usize::from(samples);
        assert_eq!(data.len(), width as usize * height as usize * n);
        let pixels: Vec<u8> = data.iter().flat_map(|s| s.to_le_bytes()).collect();

        let mut fields = vec![
            (256, Field::Long(vec![width])),
            (257, Field::Long(vec![height])),
            (258, Field::Short(vec![16; n])),
            (259, Field::Short(vec![1])),
            (262, Field::Short(vec![1])),
            (STRIP_OFFSETS, Field::Long(vec![0])),
            (277, Field::Short(vec![samples])),
            (278, Field::Long(vec![height])),
            (STRIP_BYTE_COUNTS, Field::Long(vec![count(pixels.len())])),
            (339, Field::Short(vec![1; n])),
        ];
        fields.retain(|(tag, _)| extra.iter().all(|(t, _)| t != tag));
        fields.extend(extra);
        fields.sort_by_key(|(tag, _)| *tag);

        let pixel_offset = 8 + 2 + 12 * fields.len() + 4;
        let external_start = pixel_offset + pixels.len();
        let mut ifd = u16::try_from(fields.len()).unwrap().to_le_bytes().to_vec();
        let mut external = Vec::new();
        for (tag, field) in &fields {
            let (kind, n, mut bytes) = match field {
                Field::Long(relative) if *tag == STRIP_OFFSETS => Field::Long(
                    relative.iter().map(|r| r + count(pixel_offset)).collect(),
                )
                .encode(),
                other => other.encode(),
            };
            ifd.extend(tag.to_le_bytes());
            ifd.extend(kind.to_le_bytes());
            ifd.extend(n.to_le_bytes());
            if bytes.len() <= 4 {
                bytes.resize(4, 0);
                ifd.extend(bytes);
            } else {
                ifd.extend(count(external_start + external.len()).to_le_bytes());
                external.extend(bytes);
            }
        }
        ifd.extend(0u32.to_le_bytes());

        let mut out = b"II".to_vec();
        out.extend(42u16.to_le_bytes());
        out.extend(8u32.to_le_bytes());
        out.extend(ifd);
        out.extend(pixels);
        out.extend(external);
        out
    }

    /// GeoKey directory declaring a projected CRS and a raster type.
    pub fn geo_keys(epsg: u16, raster_type: u16) -> Field {
        Field::Short(vec![1, 1, 0, 2, 1025, 0, 1, raster_type, 3072, 0, 1, epsg])
    }
}
