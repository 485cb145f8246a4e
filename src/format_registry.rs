use std::path::Path;

/// What the pipeline can do with a file of a given extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    /// Canonical lower-case format tag stored on catalog entries.
    pub tag: &'static str,
    pub content_type: &'static str,
    /// RAW sensor formats must be developed before they can be displayed.
    pub requires_conversion: bool,
}

impl FormatInfo {
    const fn standard(tag: &'static str, content_type: &'static str) -> Self {
        Self {
            tag,
            content_type,
            requires_conversion: false,
        }
    }

    const fn raw(tag: &'static str) -> Self {
        Self {
            tag,
            content_type: "image/x-raw",
            requires_conversion: true,
        }
    }

    /// Content type of the bytes the displayable-bytes accessor returns.
    pub fn display_content_type(&self) -> &'static str {
        if self.requires_conversion {
            "image/jpeg"
        } else {
            self.content_type
        }
    }
}

/// Looks up a path's format from its extension. `None` means the file is not an image
/// the catalog knows about.
pub fn from_path(path: &Path) -> Option<FormatInfo> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(from_extension)
}

pub fn from_extension(ext: &str) -> Option<FormatInfo> {
    let ext_lower = ext.to_lowercase();
    match ext_lower.as_str() {
        "jpg" => Some(FormatInfo::standard("jpg", "image/jpeg")),
        "jpeg" => Some(FormatInfo::standard("jpeg", "image/jpeg")),
        "png" => Some(FormatInfo::standard("png", "image/png")),
        "gif" => Some(FormatInfo::standard("gif", "image/gif")),
        "webp" => Some(FormatInfo::standard("webp", "image/webp")),
        "bmp" => Some(FormatInfo::standard("bmp", "image/bmp")),
        "tif" => Some(FormatInfo::standard("tif", "image/tiff")),
        "tiff" => Some(FormatInfo::standard("tiff", "image/tiff")),

        // Nikon
        "nef" => Some(FormatInfo::raw("nef")),
        "nrw" => Some(FormatInfo::raw("nrw")),
        // Canon
        "cr2" => Some(FormatInfo::raw("cr2")),
        // Sony
        "arw" => Some(FormatInfo::raw("arw")),
        "srf" => Some(FormatInfo::raw("srf")),
        "sr2" => Some(FormatInfo::raw("sr2")),
        // Fujifilm, Olympus, Panasonic, Pentax, Adobe
        "raf" => Some(FormatInfo::raw("raf")),
        "orf" => Some(FormatInfo::raw("orf")),
        "rw2" => Some(FormatInfo::raw("rw2")),
        "pef" => Some(FormatInfo::raw("pef")),
        "dng" => Some(FormatInfo::raw("dng")),

        _ => None,
    }
}

pub fn is_recognized(path: &Path) -> bool {
    from_path(path).is_some()
}

pub fn requires_conversion(path: &Path) -> bool {
    from_path(path)
        .map(|f| f.requires_conversion)
        .unwrap_or(false)
}
