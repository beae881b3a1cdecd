use std::path::Path;

/// Extensions of files the engine knows how to handle.
pub(crate) const MEDIA_EXTENSIONS: &[&str] = &[
    // Native packet embedding
    "jpg", "jpeg", "png", "webp", "wav", "avi",
    // ISO BMFF / QuickTime
    "mp4", "m4v", "m4a", "mov", "qt", "3gp", "3g2",
    // Sidecar .xmp (when enabled)
    "heic", "heif", "avif", "tif", "tiff",
    "cr3", "cr2", "dng", "nef", "arw", "raf", "orf", "rw2", "pef", "srw",
];

// ftyp major brands that carry XMP in a `meta` item rather than a uuid box.
const ITEM_BRANDS: &[&[u8; 4]] = &[b"heic", b"heix", b"hevc", b"heim", b"heis", b"mif1", b"msf1", b"avif", b"avis", b"crx "];

// Top-level box types an old QuickTime file may start with (no ftyp).
const QUICKTIME_LEAD_BOXES: &[&[u8; 4]] = &[b"moov", b"mdat", b"wide", b"free", b"skip", b"pnot"];

/// The container type of a media file, which decides where the packet lives.
///
/// Detection prefers magic bytes ([`MediaKind::sniff`]) and falls back to the
/// extension ([`MediaKind::from_path`]).
///
/// # Example
///
/// ```rust
/// use xmp_gate::MediaKind;
/// use std::path::Path;
///
/// assert_eq!(MediaKind::from_path(Path::new("clip.MOV")), Some(MediaKind::Bmff));
/// assert_eq!(MediaKind::from_path(Path::new("photo.heic")), Some(MediaKind::Sidecar));
/// assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// JPEG — APP1 XMP segment
    Jpeg,
    /// PNG — iTXt `XML:com.adobe.xmp` chunk
    Png,
    /// MP4/MOV/3GP — top-level XMP uuid box
    Bmff,
    /// WAV — RIFF `_PMX` chunk
    Wav,
    /// AVI — RIFF `_PMX` chunk
    Avi,
    /// WebP (extended) — RIFF `XMP ` chunk
    WebP,
    /// HEIC/HEIF/AVIF/TIFF/RAW — `.xmp` sidecar next to the file
    Sidecar,
    /// No embedding rule; read-only packet scan
    Unknown,
}

impl MediaKind {
    /// Determine the media kind from a file path extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "wav" => Some(Self::Wav),
            "avi" => Some(Self::Avi),
            "mp4" | "m4v" | "m4a" | "mov" | "qt" | "3gp" | "3g2" => Some(Self::Bmff),
            "heic" | "heif" | "avif" | "tif" | "tiff"
            | "cr3" | "cr2" | "dng" | "nef" | "arw" | "raf" | "orf" | "rw2" | "pef" | "srw"
                => Some(Self::Sidecar),
            _ => None,
        }
    }

    /// Determine the media kind from the leading bytes of the file.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            return Some(Self::Png);
        }
        if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            return Some(Self::Sidecar);
        }
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" {
            return match &bytes[8..12] {
                b"WAVE" => Some(Self::Wav),
                b"AVI " => Some(Self::Avi),
                b"WEBP" => Some(Self::WebP),
                _ => None,
            };
        }
        if bytes.len() >= 8 {
            let box_type = &bytes[4..8];
            if box_type == b"ftyp" {
                let brand = bytes.get(8..12)?;
                return if ITEM_BRANDS.iter().any(|b| b.as_slice() == brand) {
                    Some(Self::Sidecar)
                } else {
                    Some(Self::Bmff)
                };
            }
            if QUICKTIME_LEAD_BOXES.iter().any(|b| b.as_slice() == box_type) {
                return Some(Self::Bmff);
            }
        }
        None
    }

    /// Detect from contents first, then from the extension.
    pub fn detect(path: &Path, bytes: &[u8]) -> Self {
        Self::sniff(bytes)
            .or_else(|| Self::from_path(path))
            .unwrap_or(Self::Unknown)
    }

    /// Short format name used in diagnostics and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::Bmff => "MP4/QuickTime",
            Self::Wav => "WAV",
            Self::Avi => "AVI",
            Self::WebP => "WebP",
            Self::Sidecar => "sidecar",
            Self::Unknown => "unknown",
        }
    }

    /// `true` if the packet is embedded in the file itself.
    pub fn is_embedded(&self) -> bool {
        !matches!(self, Self::Sidecar | Self::Unknown)
    }
}

/// Check if a file has a supported media extension.
pub(crate) fn is_supported_media(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
