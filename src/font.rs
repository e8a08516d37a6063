//! Font lookup.
//!
//! Rendering asks a [`FontResolver`] for a face. Resolution never fails: the
//! last link of every chain is the bundled DejaVu Sans face.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use ab_glyph::{FontArc, FontRef};
use tracing::error;

/// DejaVu Sans, bundled so text renders without any installed fonts.
/// License: `src/fonts/LICENSE-DejaVu.txt`.
const EMBEDDED_FONT_DATA: &[u8] = include_bytes!("fonts/DejaVuSans.ttf");

static EMBEDDED_FONT: OnceLock<Option<FontArc>> = OnceLock::new();

/// The bundled face, parsed on first use.
pub fn embedded_font() -> Option<FontArc> {
    EMBEDDED_FONT
        .get_or_init(|| match FontRef::try_from_slice(EMBEDDED_FONT_DATA) {
            Ok(font) => Some(FontArc::new(font)),
            Err(e) => {
                error!(error = %e, "bundled font failed to parse");
                None
            }
        })
        .clone()
}

/// A font lookup request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FontRequest {
    pub family: String,
    pub bold: bool,
    pub italic: bool,
}

impl FontRequest {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            bold: false,
            italic: false,
        }
    }
}

/// A resolved face. `Builtin` is the bundled regular-weight face.
#[derive(Clone)]
pub enum FontFace {
    Scalable(FontArc),
    Builtin,
}

impl FontFace {
    pub fn is_builtin(&self) -> bool {
        matches!(self, FontFace::Builtin)
    }

    /// Outline font to draw with.
    pub fn font(&self) -> Option<FontArc> {
        match self {
            FontFace::Scalable(font) => Some(font.clone()),
            FontFace::Builtin => embedded_font(),
        }
    }
}

impl std::fmt::Debug for FontFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FontFace::Scalable(_) => f.write_str("FontFace::Scalable"),
            FontFace::Builtin => f.write_str("FontFace::Builtin"),
        }
    }
}

/// Pluggable font lookup capability.
pub trait FontResolver: Send + Sync {
    /// Resolve a face for `request`, degrading to a fallback rather than failing.
    fn resolve(&self, request: &FontRequest) -> FontFace;
}

/// Always answers with the bundled face, whatever family is asked for.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinFontResolver;

impl FontResolver for BuiltinFontResolver {
    fn resolve(&self, _request: &FontRequest) -> FontFace {
        FontFace::Builtin
    }
}

/// Resolver over an explicit set of scalable faces keyed by family name,
/// falling back to `default` and then to the bundled face.
#[derive(Clone, Default)]
pub struct FontSet {
    faces: HashMap<String, FontArc>,
    default: Option<FontArc>,
}

impl FontSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a face from raw TrueType/OpenType bytes.
    pub fn insert(&mut self, family: impl Into<String>, data: Vec<u8>) -> Result<(), ab_glyph::InvalidFont> {
        let font = FontArc::try_from_vec(data)?;
        let family = family.into().to_lowercase();
        if self.default.is_none() {
            self.default = Some(font.clone());
        }
        self.faces.insert(family, font);
        Ok(())
    }
}

impl FontResolver for FontSet {
    fn resolve(&self, request: &FontRequest) -> FontFace {
        self.faces
            .get(&request.family.to_lowercase())
            .or(self.default.as_ref())
            .cloned()
            .map(FontFace::Scalable)
            .unwrap_or(FontFace::Builtin)
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use system::SystemFontResolver;

#[cfg(not(target_arch = "wasm32"))]
mod system {
    use super::*;

    use fontdb::{Database, Family, Query, Style, Weight, ID};
    use parking_lot::Mutex;
    use tracing::{debug, warn};

    /// Families tried, in order, after the requested one.
    const FALLBACK_FAMILIES: &[&str] = &[
        "DejaVu Sans",
        "Liberation Sans",
        "Arial",
        "Helvetica",
        "Noto Sans",
        "Segoe UI",
    ];

    /// Looks up installed system fonts through fontdb.
    ///
    /// Chain: requested family and style, requested family any style, the
    /// common sans families, generic sans-serif, any face, bundled.
    pub struct SystemFontResolver {
        db: Database,
        cache: Mutex<HashMap<FontRequest, FontFace>>,
    }

    impl SystemFontResolver {
        pub fn new() -> Self {
            let mut db = Database::new();
            db.load_system_fonts();
            debug!(faces = db.len(), "loaded system fonts");
            Self::with_database(db)
        }

        pub fn with_database(db: Database) -> Self {
            Self {
                db,
                cache: Mutex::new(HashMap::new()),
            }
        }

        fn query(&self, family: Family<'_>, weight: Weight, style: Style) -> Option<ID> {
            self.db.query(&Query {
                families: &[family],
                weight,
                style,
                ..Query::default()
            })
        }

        fn lookup(&self, request: &FontRequest) -> Option<ID> {
            let weight = if request.bold { Weight::BOLD } else { Weight::NORMAL };
            let style = if request.italic { Style::Italic } else { Style::Normal };

            self.query(Family::Name(&request.family), weight, style)
                .or_else(|| self.query(Family::Name(&request.family), Weight::NORMAL, Style::Normal))
                .or_else(|| {
                    FALLBACK_FAMILIES
                        .iter()
                        .find_map(|name| self.query(Family::Name(*name), weight, style))
                })
                .or_else(|| self.query(Family::SansSerif, weight, style))
                .or_else(|| self.db.faces().next().map(|face| face.id))
        }

        fn load(&self, id: ID) -> Option<FontArc> {
            self.db
                .with_face_data(id, |data, index| {
                    ab_glyph::FontVec::try_from_vec_and_index(data.to_vec(), index).ok()
                })
                .flatten()
                .map(FontArc::new)
        }
    }

    impl Default for SystemFontResolver {
        fn default() -> Self {
            Self::new()
        }
    }

    impl FontResolver for SystemFontResolver {
        fn resolve(&self, request: &FontRequest) -> FontFace {
            if let Some(face) = self.cache.lock().get(request) {
                return face.clone();
            }

            let face = match self.lookup(request).and_then(|id| self.load(id)) {
                Some(font) => FontFace::Scalable(font),
                None => {
                    warn!(family = %request.family, "no usable system font, using bundled face");
                    FontFace::Builtin
                }
            };
            self.cache.lock().insert(request.clone(), face.clone());
            face
        }
    }
}

/// Shared resolver handle as stored by the pipeline.
pub type SharedFontResolver = Arc<dyn FontResolver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_resolver_never_fails() {
        let face = BuiltinFontResolver.resolve(&FontRequest::new("Nonexistent Family"));
        assert!(face.is_builtin());
    }

    #[test]
    fn test_bundled_face_is_scalable() {
        use ab_glyph::Font;

        let font = FontFace::Builtin.font().unwrap();
        assert_ne!(font.glyph_id('a'), font.glyph_id('A'));
        assert_ne!(font.glyph_id('é').0, 0);
        assert_ne!(font.glyph_id('Ж').0, 0);
    }

    #[test]
    fn test_empty_font_set_falls_back_to_builtin() {
        let set = FontSet::new();
        assert!(set.resolve(&FontRequest::new("Arial")).is_builtin());
    }

    #[test]
    fn test_font_set_rejects_garbage() {
        let mut set = FontSet::new();
        assert!(set.insert("Broken", vec![0, 1, 2, 3]).is_err());
        assert!(set.resolve(&FontRequest::new("Broken")).is_builtin());
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_system_resolver_with_empty_database_degrades() {
        let resolver = SystemFontResolver::with_database(fontdb::Database::new());
        let mut request = FontRequest::new("Definitely Missing Family");
        request.bold = true;
        assert!(resolver.resolve(&request).is_builtin());
        // served from cache the second time
        assert!(resolver.resolve(&request).is_builtin());
    }
}
