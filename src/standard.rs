use crate::error::ExportError;

pub const DEFAULT_PDF_VERSION: PdfVersion = PdfVersion(4);
pub const FALLBACK_PDF_VERSION: PdfVersion = PdfVersion(6);

/// A `1.x` PDF header version, x in 3..=7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PdfVersion(u8);

impl PdfVersion {
    pub const MIN_MINOR: u8 = 3;
    pub const MAX_MINOR: u8 = 7;

    pub fn from_minor(minor: u8) -> Option<Self> {
        (Self::MIN_MINOR..=Self::MAX_MINOR)
            .contains(&minor)
            .then_some(Self(minor))
    }

    /// Blank means the default 1.4; anything outside 1.3..1.7 becomes 1.6.
    pub fn parse_or_fallback(value: Option<&str>) -> Self {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return DEFAULT_PDF_VERSION;
        };
        raw.strip_prefix("1.")
            .and_then(|minor| minor.parse::<u8>().ok())
            .and_then(Self::from_minor)
            .unwrap_or(FALLBACK_PDF_VERSION)
    }

    pub fn minor(self) -> u8 {
        self.0
    }

    pub fn as_string(self) -> String {
        format!("1.{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PdfStandard {
    #[default]
    None,
    X1a2001,
    X3_2002,
    X3_2003,
    X4_2008,
}

impl PdfStandard {
    pub const ALL: [PdfStandard; 5] = [
        PdfStandard::None,
        PdfStandard::X1a2001,
        PdfStandard::X3_2002,
        PdfStandard::X3_2003,
        PdfStandard::X4_2008,
    ];

    /// Accepts `pdf/x-4:2008`, `pdfx-4:2008`, `pdfx-4`, `pdf/x-4` and the like, any case.
    pub fn parse(value: Option<&str>) -> Result<Self, ExportError> {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(PdfStandard::None);
        };
        let lower = raw.to_ascii_lowercase();
        if lower == "none" {
            return Ok(PdfStandard::None);
        }
        let variant = ["pdf/x-", "pdfx-", "pdf-x-", "x-"]
            .iter()
            .find_map(|prefix| lower.strip_prefix(prefix))
            .unwrap_or(&lower);
        match variant {
            "1a" | "1a:2001" => Ok(PdfStandard::X1a2001),
            "3:2002" => Ok(PdfStandard::X3_2002),
            "3" | "3:2003" => Ok(PdfStandard::X3_2003),
            "4" | "4:2008" => Ok(PdfStandard::X4_2008),
            _ => Err(ExportError::UnsupportedFormat(format!(
                "pdfStandard '{raw}' is not supported"
            ))),
        }
    }

    /// Lowercase identifier, also written to the `Keywords` info entry.
    pub fn id(self) -> &'static str {
        match self {
            PdfStandard::None => "none",
            PdfStandard::X1a2001 => "pdf/x-1a:2001",
            PdfStandard::X3_2002 => "pdf/x-3:2002",
            PdfStandard::X3_2003 => "pdf/x-3:2003",
            PdfStandard::X4_2008 => "pdf/x-4:2008",
        }
    }

    pub fn is_pdfx(self) -> bool {
        self != PdfStandard::None
    }

    pub fn min_version(self) -> Option<PdfVersion> {
        match self {
            PdfStandard::None => None,
            PdfStandard::X1a2001 | PdfStandard::X3_2002 | PdfStandard::X3_2003 => {
                Some(PdfVersion(3))
            }
            PdfStandard::X4_2008 => Some(PdfVersion(6)),
        }
    }

    pub fn gts_pdfx_version(self) -> Option<&'static str> {
        match self {
            PdfStandard::None => None,
            PdfStandard::X1a2001 => Some("PDF/X-1:2001"),
            PdfStandard::X3_2002 => Some("PDF/X-3:2002"),
            PdfStandard::X3_2003 => Some("PDF/X-3:2003"),
            PdfStandard::X4_2008 => Some("PDF/X-4"),
        }
    }

    pub fn gts_pdfx_conformance(self) -> Option<&'static str> {
        match self {
            PdfStandard::None => None,
            PdfStandard::X1a2001 => Some("PDF/X-1a:2001"),
            PdfStandard::X3_2002 => Some("PDF/X-3:2002"),
            PdfStandard::X3_2003 => Some("PDF/X-3:2003"),
            PdfStandard::X4_2008 => Some("PDF/X-4:2008"),
        }
    }

    pub fn forbids_transparency(self) -> bool {
        matches!(self, PdfStandard::X1a2001 | PdfStandard::X3_2002)
    }

    /// Upgrades, never downgrades, to the standard's minimum version.
    pub fn effective_version(self, requested: PdfVersion) -> PdfVersion {
        match self.min_version() {
            Some(min) if requested < min => min,
            _ => requested,
        }
    }
}
