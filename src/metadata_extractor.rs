use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{Exif, In, Reader, Tag, Value};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::format_registry;
use crate::raw_processor::{self, RawError};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Unreadable source {path}: {source}")]
    UnreadableSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode {path}: {message}")]
    DecodeFailure { path: PathBuf, message: String },
    #[error("Not a recognized image format: {0}")]
    UnsupportedFormat(PathBuf),
}

impl ExtractError {
    fn unreadable(path: &Path, source: std::io::Error) -> Self {
        Self::UnreadableSource {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Camera and exposure attributes read from embedded EXIF data. Every field except
/// `orientation` is independently optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CameraAttributes {
    pub author: Option<String>,
    pub camera: Option<String>,
    pub orientation: i64,
    pub x_resolution: Option<f64>,
    pub y_resolution: Option<f64>,
    pub date_taken: Option<DateTime<Utc>>,
    pub exposure_time: Option<f64>,
    pub f_number: Option<f64>,
    pub iso: Option<i64>,
    pub focal_length: Option<f64>,
}

impl Default for CameraAttributes {
    fn default() -> Self {
        Self {
            author: None,
            camera: None,
            orientation: 1,
            x_resolution: None,
            y_resolution: None,
            date_taken: None,
            exposure_time: None,
            f_number: None,
            iso: None,
            focal_length: None,
        }
    }
}

/// Everything needed to create a catalog entry for one file.
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    pub location: String,
    pub content_fingerprint: String,
    pub format: String,
    pub attributes: CameraAttributes,
}

pub struct MetadataExtractor;

impl MetadataExtractor {
    /// Fingerprints the file and reads its embedded metadata. Touches nothing but the file.
    pub fn extract(path: &Path) -> Result<ExtractedImage, ExtractError> {
        let format = format_registry::from_path(path)
            .ok_or_else(|| ExtractError::UnsupportedFormat(path.to_path_buf()))?;

        let file = File::open(path).map_err(|e| ExtractError::unreadable(path, e))?;
        let mut reader = BufReader::new(file);

        let content_fingerprint =
            Self::hash_reader(&mut reader).map_err(|e| ExtractError::unreadable(path, e))?;

        reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| ExtractError::unreadable(path, e))?;

        let attributes = match Reader::new().read_from_container(&mut reader) {
            Ok(exif) => Self::read_attributes(&exif),
            Err(e) => {
                debug!("No EXIF data for {}: {}", path.display(), e);
                CameraAttributes::default()
            }
        };

        Ok(ExtractedImage {
            location: path.to_string_lossy().to_string(),
            content_fingerprint,
            format: format.tag.to_string(),
            attributes,
        })
    }

    /// SHA-256 of the whole file, hex encoded.
    pub fn fingerprint(path: &Path) -> Result<String, ExtractError> {
        let file = File::open(path).map_err(|e| ExtractError::unreadable(path, e))?;
        Self::hash_reader(&mut BufReader::new(file)).map_err(|e| ExtractError::unreadable(path, e))
    }

    fn hash_reader<R: Read>(reader: &mut R) -> std::io::Result<String> {
        let mut hasher = Sha256::new();
        let mut buffer = [0; 8192];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect())
    }

    /// Bytes in a standard photographic format: RAW files are developed to JPEG, every
    /// other recognized format is returned verbatim.
    pub fn displayable_bytes(path: &Path) -> Result<Vec<u8>, ExtractError> {
        let format = format_registry::from_path(path)
            .ok_or_else(|| ExtractError::UnsupportedFormat(path.to_path_buf()))?;

        if !format.requires_conversion {
            return fs::read(path).map_err(|e| ExtractError::unreadable(path, e));
        }

        raw_processor::develop(path).map_err(|e| match e {
            RawError::IoError(source) => ExtractError::unreadable(path, source),
            other => ExtractError::DecodeFailure {
                path: path.to_path_buf(),
                message: other.to_string(),
            },
        })
    }

    pub fn read_attributes(exif: &Exif) -> CameraAttributes {
        CameraAttributes {
            author: first_text(exif, Tag::Artist),
            camera: first_text(exif, Tag::Model),
            orientation: first_number(exif, Tag::Orientation)
                .map(|v| v as i64)
                .unwrap_or(1),
            x_resolution: first_number(exif, Tag::XResolution),
            y_resolution: first_number(exif, Tag::YResolution),
            date_taken: first_text(exif, Tag::DateTimeOriginal)
                .and_then(|s| parse_exif_datetime(&s)),
            exposure_time: first_number(exif, Tag::ExposureTime),
            f_number: first_number(exif, Tag::FNumber),
            iso: first_number(exif, Tag::PhotographicSensitivity).map(|v| v as i64),
            focal_length: first_number(exif, Tag::FocalLength),
        }
    }
}

/// Removes null padding, surrounding quotes and whitespace from EXIF text
fn clean_exif_string(value: &str) -> String {
    value
        .replace('\0', "")
        .trim()
        .trim_matches('"')
        .trim()
        .to_string()
}

/// First element of a text tag; empty values count as absent.
fn first_text(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let value = match &field.value {
        Value::Ascii(values) => values
            .first()
            .map(|v| clean_exif_string(&String::from_utf8_lossy(v)))?,
        _ => clean_exif_string(&field.display_value().to_string()),
    };
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// First element of a numeric tag. Rationals are divided out.
fn first_number(exif: &Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let ratio = |num: f64, denom: f64| if denom == 0.0 { None } else { Some(num / denom) };

    match &field.value {
        Value::Byte(v) => v.first().map(|&x| x as f64),
        Value::Short(v) => v.first().map(|&x| x as f64),
        Value::Long(v) => v.first().map(|&x| x as f64),
        Value::SByte(v) => v.first().map(|&x| x as f64),
        Value::SShort(v) => v.first().map(|&x| x as f64),
        Value::SLong(v) => v.first().map(|&x| x as f64),
        Value::Float(v) => v.first().map(|&x| x as f64),
        Value::Double(v) => v.first().copied(),
        Value::Rational(v) => v
            .first()
            .and_then(|r| ratio(r.num as f64, r.denom as f64)),
        Value::SRational(v) => v
            .first()
            .and_then(|r| ratio(r.num as f64, r.denom as f64)),
        _ => None,
    }
}

pub fn parse_exif_datetime(datetime_str: &str) -> Option<DateTime<Utc>> {
    let cleaned = datetime_str.replace('"', "");

    // EXIF format: "2023:01:15 10:30:00"
    if let Ok(naive_dt) = NaiveDateTime::parse_from_str(&cleaned, "%Y:%m:%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
    }

    // Some software rewrites dates as ISO 8601
    if let Ok(naive_dt) = NaiveDateTime::parse_from_str(&cleaned, "%F %T") {
        return Some(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use exif::experimental::Writer;
    use exif::{Field, Rational};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn tiff_with_fields(fields: &[Field]) -> Vec<u8> {
        let mut writer = Writer::new();
        for field in fields {
            writer.push_field(field);
        }
        let mut buf = Cursor::new(Vec::new());
        writer.write(&mut buf, false).unwrap();
        buf.into_inner()
    }

    fn field(tag: Tag, value: Value) -> Field {
        Field {
            tag,
            ifd_num: In::PRIMARY,
            value,
        }
    }

    #[test]
    fn test_clean_exif_string() {
        assert_eq!(clean_exif_string("\"Canon\""), "Canon");
        assert_eq!(clean_exif_string("Canon\0\0\0"), "Canon");
        assert_eq!(clean_exif_string("  Canon  "), "Canon");
        assert_eq!(clean_exif_string("\"\""), "");
    }

    #[test]
    fn test_parse_exif_datetime() {
        let dt = parse_exif_datetime("2023:01:15 10:30:00").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2023, 1, 15));
        assert_eq!((dt.hour(), dt.minute()), (10, 30));

        assert!(parse_exif_datetime("2023-01-15 10:30:00").is_some());
        assert!(parse_exif_datetime("not a date").is_none());
    }

    #[test]
    fn test_fingerprint_is_sha256() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("abc.jpg");
        fs::write(&path, b"abc").unwrap();

        assert_eq!(
            MetadataExtractor::fingerprint(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_extract_without_exif_defaults_orientation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("plain.JPG");
        fs::write(&path, b"not really a jpeg").unwrap();

        let extracted = MetadataExtractor::extract(&path).unwrap();
        assert_eq!(extracted.format, "jpg");
        assert_eq!(extracted.location, path.to_string_lossy());
        assert_eq!(extracted.content_fingerprint.len(), 64);
        assert_eq!(extracted.attributes, CameraAttributes::default());
        assert_eq!(extracted.attributes.orientation, 1);
    }

    #[test]
    fn test_extract_reads_tags() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("DSC_0001.nef");
        let bytes = tiff_with_fields(&[
            field(Tag::Model, Value::Ascii(vec![b"NIKON D750".to_vec()])),
            field(Tag::Artist, Value::Ascii(vec![b"Jane Doe".to_vec()])),
            field(Tag::Orientation, Value::Short(vec![6])),
            field(Tag::XResolution, Value::Rational(vec![Rational::from((300, 1))])),
            field(Tag::PhotographicSensitivity, Value::Short(vec![200, 400])),
            field(Tag::FNumber, Value::Rational(vec![Rational::from((28, 10))])),
            field(Tag::ExposureTime, Value::Rational(vec![Rational::from((1, 250))])),
            field(
                Tag::DateTimeOriginal,
                Value::Ascii(vec![b"2024:06:01 08:15:30".to_vec()]),
            ),
        ]);
        fs::write(&path, bytes).unwrap();

        let extracted = MetadataExtractor::extract(&path).unwrap();
        let attrs = extracted.attributes;
        assert_eq!(extracted.format, "nef");
        assert_eq!(attrs.camera.as_deref(), Some("NIKON D750"));
        assert_eq!(attrs.author.as_deref(), Some("Jane Doe"));
        assert_eq!(attrs.orientation, 6);
        assert_eq!(attrs.x_resolution, Some(300.0));
        assert_eq!(attrs.y_resolution, None);
        assert_eq!(attrs.iso, Some(200));
        assert_eq!(attrs.f_number, Some(2.8));
        assert_eq!(attrs.exposure_time, Some(0.004));
        assert_eq!(attrs.focal_length, None);
        assert_eq!(attrs.date_taken.unwrap().year(), 2024);
    }

    #[test]
    fn test_zero_denominator_degrades_to_null() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("odd.tif");
        let bytes = tiff_with_fields(&[
            field(Tag::FocalLength, Value::Rational(vec![Rational::from((50, 0))])),
            field(Tag::PhotographicSensitivity, Value::Short(vec![100])),
        ]);
        fs::write(&path, bytes).unwrap();

        let attrs = MetadataExtractor::extract(&path).unwrap().attributes;
        assert_eq!(attrs.focal_length, None);
        assert_eq!(attrs.iso, Some(100));
    }

    #[test]
    fn test_extract_missing_file_is_unreadable() {
        let result = MetadataExtractor::extract(Path::new("/nonexistent/photo.jpg"));
        assert!(matches!(
            result,
            Err(ExtractError::UnreadableSource { .. })
        ));
    }

    #[test]
    fn test_extract_rejects_unknown_format() {
        let result = MetadataExtractor::extract(Path::new("/tmp/notes.txt"));
        assert!(matches!(result, Err(ExtractError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_displayable_bytes_passthrough() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("photo.png");
        fs::write(&path, b"png bytes").unwrap();

        let bytes = MetadataExtractor::displayable_bytes(&path).unwrap();
        assert_eq!(bytes, b"png bytes");
    }

    #[test]
    fn test_displayable_bytes_corrupt_raw() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.nef");
        fs::write(&path, b"garbage").unwrap();

        for _ in 0..2 {
            let result = MetadataExtractor::displayable_bytes(&path);
            assert!(matches!(result, Err(ExtractError::DecodeFailure { .. })));
        }
        assert_eq!(fs::read(&path).unwrap(), b"garbage");
    }

    #[test]
    fn test_displayable_bytes_missing_raw() {
        let result = MetadataExtractor::displayable_bytes(Path::new("/nonexistent/a.nef"));
        assert!(matches!(
            result,
            Err(ExtractError::UnreadableSource { .. })
        ));
    }
}
