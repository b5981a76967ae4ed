use crate::error::ExportError;
use crate::font_patch::ensure_embeddable;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use svg2pdf::usvg::fontdb::Database;

/// Fonts available to SVG text, shared read-only by every request.
#[derive(Clone, Default)]
pub struct FontLibrary {
    db: Arc<Database>,
    families: Vec<String>,
}

impl std::fmt::Debug for FontLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontLibrary")
            .field("faces", &self.db.len())
            .field("families", &self.families)
            .finish()
    }
}

impl FontLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(fonts_dir: Option<&Path>, system_fonts: bool) -> Self {
        let mut db = Database::new();
        if system_fonts {
            db.load_system_fonts();
        }
        let mut library = Self {
            db: Arc::new(db),
            families: Vec::new(),
        };
        if let Some(dir) = fonts_dir {
            library.register_dir(dir);
        }
        if library.face_count() == 0 {
            tracing::warn!("font database is empty; svg text will not render");
        } else {
            tracing::info!(
                faces = library.face_count(),
                custom = library.families.len(),
                "font database ready"
            );
        }
        library
    }

    pub fn register_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "fonts directory unreadable");
                return;
            }
        };
        let mut files: Vec<_> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        for file in files {
            self.register_file(file);
        }
    }

    pub fn register_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
            return;
        };
        let ext = ext.to_ascii_lowercase();
        if ext != "ttf" && ext != "otf" {
            return;
        }
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "font unreadable");
                return;
            }
        };
        let name = path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("font.ttf");
        if let Err(err) = self.register_bytes(data, name) {
            tracing::warn!(path = %path.display(), error = %err, "font skipped");
        }
    }

    /// Patches licensing bits on `.ttf` data, validates the face and adds it.
    pub fn register_bytes(&mut self, data: Vec<u8>, file_name: &str) -> Result<String, ExportError> {
        let data = ensure_embeddable(&data, file_name).into_owned();
        let family = {
            let face = ttf_parser::Face::parse(&data, 0).map_err(|err| {
                ExportError::UnsupportedFont(format!("invalid font data for {file_name}: {err}"))
            })?;
            family_name(&face).unwrap_or_else(|| file_stem(file_name))
        };
        let db = Arc::make_mut(&mut self.db);
        db.load_font_data(data);
        if self.families.is_empty() {
            // Unresolved SVG families fall back to the generic ones.
            db.set_serif_family(family.as_str());
            db.set_sans_serif_family(family.as_str());
            db.set_monospace_family(family.as_str());
        }
        if !self.families.iter().any(|f| f.eq_ignore_ascii_case(&family)) {
            self.families.push(family.clone());
        }
        tracing::debug!(font = file_name, family = %family, "font registered");
        Ok(family)
    }

    pub fn database(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    pub fn face_count(&self) -> usize {
        self.db.len()
    }

    /// Families registered from files, in load order.
    pub fn families(&self) -> &[String] {
        &self.families
    }

    /// Family used when SVG text names nothing that resolves.
    pub fn default_family(&self) -> Option<&str> {
        self.families.first().map(String::as_str)
    }
}

fn family_name(face: &ttf_parser::Face<'_>) -> Option<String> {
    face.names()
        .into_iter()
        .filter(|name| {
            name.name_id == ttf_parser::name_id::TYPOGRAPHIC_FAMILY
                || name.name_id == ttf_parser::name_id::FAMILY
        })
        .filter(|name| name.is_unicode())
        .filter_map(|name| name.to_string())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|v| v.to_str())
        .unwrap_or(file_name)
        .to_string()
}
