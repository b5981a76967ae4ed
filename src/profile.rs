use crate::error::ExportError;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_PROFILE_ID: &str = "coated_fogra39";

/// Minimum size of an ICC header.
const ICC_HEADER_LEN: usize = 128;

pub(crate) type CmykTransform = Arc<dyn moxcms::TransformExecutor<u8> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub file_name: &'static str,
    pub output_condition_identifier: &'static str,
    pub output_condition: &'static str,
}

pub const BUILTIN_PROFILES: [ProfileDescriptor; 3] = [
    ProfileDescriptor {
        id: DEFAULT_PROFILE_ID,
        display_name: "Coated FOGRA39",
        description: "FOGRA39L CMYK Profile (ISO 12647-2:2004)",
        file_name: "CoatedFOGRA39.icc",
        output_condition_identifier: "Coated FOGRA39",
        output_condition: "Coated FOGRA39",
    },
    ProfileDescriptor {
        id: "iso_coated_v2",
        display_name: "ISO Coated v2 (ECI)",
        description: "ISO Coated v2 (ECI) CMYK Profile",
        file_name: "ISOcoated_v2_eci.icc",
        output_condition_identifier: "ISOcoated_v2_eci",
        output_condition: "ISO Coated v2",
    },
    ProfileDescriptor {
        id: "us_web_coated_swop",
        display_name: "US Web Coated (SWOP) v2",
        description: "U.S. Web Coated (SWOP) v2 CMYK Profile",
        file_name: "USWebCoatedSWOP.icc",
        output_condition_identifier: "USWebCoatedSWOP",
        output_condition: "U.S. Web Coated (SWOP) v2",
    },
];

/// An immutable CMYK output profile.
///
/// The ICC blob is shared between clones; [`ColorProfile::icc_bytes`] hands out copies.
#[derive(Clone)]
pub struct ColorProfile {
    id: String,
    display_name: String,
    description: String,
    output_condition_identifier: String,
    output_condition: String,
    icc: Arc<[u8]>,
    transform: Option<CmykTransform>,
}

impl std::fmt::Debug for ColorProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorProfile")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("icc_len", &self.icc.len())
            .field("icc_transform", &self.transform.is_some())
            .finish()
    }
}

impl ColorProfile {
    /// Validates the ICC header and builds the sRGB -> CMYK transform.
    ///
    /// Profiles that parse as CMYK but that the colour engine cannot build a transform for are
    /// still accepted; conversions then use the device formula.
    pub fn from_icc(descriptor: &ProfileDescriptor, icc: Vec<u8>) -> Result<Self, ExportError> {
        validate_cmyk_header(&icc).map_err(|reason| {
            ExportError::UnsupportedProfile(format!("{}: {}", descriptor.id, reason))
        })?;
        let transform = build_transform(&icc);
        if transform.is_none() {
            tracing::warn!(
                profile = descriptor.id,
                "icc transform unavailable, falling back to device cmyk formula"
            );
        }
        Ok(Self {
            id: descriptor.id.to_ascii_lowercase(),
            display_name: descriptor.display_name.to_string(),
            description: descriptor.description.to_string(),
            output_condition_identifier: descriptor.output_condition_identifier.to_string(),
            output_condition: descriptor.output_condition.to_string(),
            icc: Arc::from(icc),
            transform,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn output_condition_identifier(&self) -> &str {
        &self.output_condition_identifier
    }

    pub fn output_condition(&self) -> &str {
        &self.output_condition
    }

    /// Always 4: only CMYK profiles pass validation.
    pub fn components(&self) -> u8 {
        4
    }

    pub fn icc_len(&self) -> usize {
        self.icc.len()
    }

    pub fn icc_bytes(&self) -> Vec<u8> {
        self.icc.to_vec()
    }

    pub fn sha256_hex(&self) -> String {
        let digest = Sha256::digest(&self.icc);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub(crate) fn transform(&self) -> Option<&CmykTransform> {
        self.transform.as_ref()
    }
}

fn validate_cmyk_header(icc: &[u8]) -> Result<(), String> {
    if icc.len() < ICC_HEADER_LEN {
        return Err(format!("icc data too short ({} bytes)", icc.len()));
    }
    if &icc[36..40] != b"acsp" {
        return Err("missing 'acsp' signature".to_string());
    }
    if &icc[16..20] != b"CMYK" {
        return Err(format!(
            "data colour space is '{}', expected CMYK",
            String::from_utf8_lossy(&icc[16..20])
        ));
    }
    Ok(())
}

fn build_transform(icc: &[u8]) -> Option<CmykTransform> {
    let cmyk = moxcms::ColorProfile::new_from_slice(icc).ok()?;
    let srgb = moxcms::ColorProfile::new_srgb();
    let transform = srgb
        .create_transform_8bit(
            moxcms::Layout::Rgb,
            &cmyk,
            moxcms::Layout::Rgba,
            moxcms::TransformOptions::default(),
        )
        .ok()?;
    Some(transform.into())
}

/// Process-wide catalog of CMYK profiles, built once at startup.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    default: ColorProfile,
    profiles: BTreeMap<String, ColorProfile>,
}

impl ProfileStore {
    pub fn load(dir: &Path) -> Result<Self, ExportError> {
        Self::load_descriptors(dir, &BUILTIN_PROFILES)
    }

    /// Missing or invalid files are skipped with a warning, except the default profile.
    pub fn load_descriptors(
        dir: &Path,
        descriptors: &[ProfileDescriptor],
    ) -> Result<Self, ExportError> {
        let mut profiles = Vec::new();
        for descriptor in descriptors {
            let path = dir.join(descriptor.file_name);
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(
                        profile = descriptor.id,
                        path = %path.display(),
                        error = %err,
                        "icc profile not found, skipped"
                    );
                    continue;
                }
            };
            match ColorProfile::from_icc(descriptor, bytes) {
                Ok(profile) => {
                    tracing::info!(
                        profile = descriptor.id,
                        path = %path.display(),
                        bytes = profile.icc_len(),
                        sha256 = %profile.sha256_hex(),
                        "icc profile loaded"
                    );
                    profiles.push(profile);
                }
                Err(err) => {
                    tracing::warn!(profile = descriptor.id, error = %err, "icc profile rejected");
                }
            }
        }
        Self::from_profiles(profiles)
    }

    pub fn from_profiles(profiles: Vec<ColorProfile>) -> Result<Self, ExportError> {
        let profiles: BTreeMap<String, ColorProfile> = profiles
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        let Some(default) = profiles.get(DEFAULT_PROFILE_ID).cloned() else {
            tracing::error!(profile = DEFAULT_PROFILE_ID, "default icc profile is missing");
            return Err(ExportError::ProfileMissing(format!(
                "required icc profile '{}' could not be loaded",
                DEFAULT_PROFILE_ID
            )));
        };
        Ok(Self { default, profiles })
    }

    pub fn default_profile(&self) -> &ColorProfile {
        &self.default
    }

    /// Unknown or blank ids fall back to the default profile.
    pub fn resolve(&self, id: Option<&str>) -> &ColorProfile {
        id.and_then(|id| self.get(id)).unwrap_or(&self.default)
    }

    /// Like [`ProfileStore::resolve`], but ids outside the built-in catalog are refused.
    pub fn select(&self, id: Option<&str>) -> Result<&ColorProfile, ExportError> {
        let Some(raw) = id.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(&self.default);
        };
        if !BUILTIN_PROFILES.iter().any(|d| d.id.eq_ignore_ascii_case(raw)) {
            return Err(ExportError::UnsupportedProfile(format!(
                "pdfColorProfile '{raw}' is not supported"
            )));
        }
        Ok(self.resolve(Some(raw)))
    }

    pub fn get(&self, id: &str) -> Option<&ColorProfile> {
        let key = id.trim().to_ascii_lowercase();
        self.profiles.get(&key)
    }

    pub fn available(&self) -> Vec<&ColorProfile> {
        self.profiles.values().collect()
    }
}
