//! Named, saved watermark configurations.
//!
//! Each template is one JSON file in the store directory. Files written by a
//! newer schema, or that fail strict parsing, are reported and left alone.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Anchor, Color, WatermarkConfig};
use crate::error::{TemplateError, TemplateSchemaError};
use crate::export::sanitize_file_name;

/// Schema version written by this build; anything newer is rejected.
pub const TEMPLATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Template {
    pub schema_version: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub config: WatermarkConfig,
    #[serde(skip)]
    pub builtin: bool,
}

impl Template {
    pub fn new(name: impl Into<String>, description: impl Into<String>, config: WatermarkConfig) -> Self {
        Self {
            schema_version: TEMPLATE_SCHEMA_VERSION,
            name: name.into(),
            description: description.into(),
            created_at: Utc::now(),
            config,
            builtin: false,
        }
    }

    /// Strictly parse a template; `origin` names the source in errors.
    pub fn from_json(json: &str, origin: &Path) -> Result<Self, TemplateSchemaError> {
        let schema_error = |message: String| TemplateSchemaError {
            path: origin.to_path_buf(),
            message,
        };

        let value: serde_json::Value = serde_json::from_str(json).map_err(|e| schema_error(e.to_string()))?;
        let version = value
            .get("schema_version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| schema_error("missing or invalid schema_version".to_string()))?;
        if version > u64::from(TEMPLATE_SCHEMA_VERSION) {
            return Err(schema_error(format!(
                "schema version {version} is newer than supported version {TEMPLATE_SCHEMA_VERSION}"
            )));
        }

        let template: Template = serde_json::from_value(value).map_err(|e| schema_error(e.to_string()))?;
        if template.name.trim().is_empty() {
            return Err(schema_error("template name is empty".to_string()));
        }
        template
            .config
            .validate()
            .map_err(|e| schema_error(e.to_string()))?;
        Ok(template)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", sanitize_file_name(&self.name))
    }
}

/// The read-only templates every store starts with.
pub fn builtin_templates() -> Vec<Template> {
    let builtin = |name: &str, description: &str, config: WatermarkConfig| Template {
        schema_version: TEMPLATE_SCHEMA_VERSION,
        name: name.to_string(),
        description: description.to_string(),
        created_at: DateTime::default(),
        config,
        builtin: true,
    };

    let mut simple = WatermarkConfig::text("All rights reserved");
    simple.text.font_size = 48.0;
    simple.text.opacity = 80;
    simple.placement.margin_x = 20;
    simple.placement.margin_y = 20;

    let mut outlined = WatermarkConfig::text("SAMPLE");
    outlined.text.font_size = 120.0;
    outlined.text.bold = true;
    outlined.text.opacity = 60;
    outlined.stroke.enabled = true;
    outlined.stroke.color = Color::black();
    outlined.stroke.width = 3;
    outlined.stroke.opacity = 80;
    outlined.placement.anchor = Anchor::Center;
    outlined.placement.margin_x = 0;
    outlined.placement.margin_y = 0;
    outlined.placement.rotation = -45.0;

    let mut shadowed = WatermarkConfig::text("\u{a9} {date}");
    shadowed.text.font_size = 36.0;
    shadowed.text.opacity = 90;
    shadowed.shadow.enabled = true;
    shadowed.shadow.offset_x = 3;
    shadowed.shadow.offset_y = 3;
    shadowed.shadow.blur = 5;
    shadowed.shadow.opacity = 60;
    shadowed.placement.anchor = Anchor::TopLeft;
    shadowed.placement.margin_x = 20;
    shadowed.placement.margin_y = 20;

    vec![
        builtin("simple text", "White text in the bottom-right corner, for darker photos", simple),
        builtin("outlined text", "Large centered diagonal text with a black outline", outlined),
        builtin("shadowed text", "Top-left text with a soft drop shadow", shadowed),
    ]
}

/// Templates on disk plus the built-in defaults, keyed by name.
#[derive(Debug)]
pub struct TemplateStore {
    dir: PathBuf,
    templates: BTreeMap<String, Template>,
    /// File backing each user template.
    files: BTreeMap<String, PathBuf>,
    rejected: Vec<TemplateSchemaError>,
}

impl TemplateStore {
    /// Open (creating if needed) the store at `dir` and load every
    /// `*.json` in it.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TemplateError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;

        let mut store = Self {
            dir,
            templates: builtin_templates()
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
            files: BTreeMap::new(),
            rejected: Vec::new(),
        };

        let mut paths: Vec<PathBuf> = fs::read_dir(&store.dir)
            .map_err(|source| io_error(&store.dir, source))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"))
            .collect();
        paths.sort();

        for path in paths {
            match load_file(&path) {
                Ok(template) if store.is_builtin(&template.name) => {
                    warn!(path = %path.display(), name = %template.name, "template shadows a built-in, ignored");
                    store.rejected.push(TemplateSchemaError {
                        path,
                        message: format!("name `{}` is reserved by a built-in template", template.name),
                    });
                }
                Ok(template) => {
                    debug!(path = %path.display(), name = %template.name, "loaded template");
                    store.files.insert(template.name.clone(), path);
                    store.templates.insert(template.name.clone(), template);
                }
                Err(err) => {
                    warn!(error = %err, "template rejected");
                    store.rejected.push(err);
                }
            }
        }
        info!(
            dir = %store.dir.display(),
            templates = store.templates.len(),
            rejected = store.rejected.len(),
            "template store opened"
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files that could not be loaded, with the reason.
    pub fn rejected(&self) -> &[TemplateSchemaError] {
        &self.rejected
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// Built-ins first, then user templates, each group by name.
    pub fn list(&self) -> Vec<&Template> {
        let mut all: Vec<&Template> = self.templates.values().collect();
        all.sort_by_key(|t| !t.builtin);
        all
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.templates.get(name).is_some_and(|t| t.builtin)
    }

    /// Create or update a user template.
    ///
    /// An existing template keeps its file. A new one gets a file of its
    /// own, numbered `"stem (n).json"` when another name already maps to the
    /// same file name.
    pub fn save(&mut self, mut template: Template) -> Result<PathBuf, TemplateError> {
        if self.is_builtin(&template.name) {
            return Err(TemplateError::ReadOnly(template.name));
        }
        let path = match self.files.get(&template.name) {
            Some(path) => path.clone(),
            None => self.free_path(&template),
        };
        template.config.validate().map_err(|e| TemplateSchemaError {
            path: path.clone(),
            message: e.to_string(),
        })?;
        template.schema_version = TEMPLATE_SCHEMA_VERSION;
        template.builtin = false;

        fs::write(&path, template.to_json()?).map_err(|source| io_error(&path, source))?;
        info!(name = %template.name, path = %path.display(), "template saved");
        self.files.insert(template.name.clone(), path.clone());
        self.templates.insert(template.name.clone(), template);
        Ok(path)
    }

    fn free_path(&self, template: &Template) -> PathBuf {
        let stem = sanitize_file_name(&template.name);
        let mut path = self.dir.join(template.file_name());
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{stem} ({n}).json"));
            n += 1;
        }
        path
    }

    pub fn delete(&mut self, name: &str) -> Result<(), TemplateError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
        if template.builtin {
            return Err(TemplateError::ReadOnly(name.to_string()));
        }
        if let Some(path) = self.files.get(name) {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(io_error(path, source)),
            }
        }
        self.files.remove(name);
        self.templates.remove(name);
        info!(name, "template deleted");
        Ok(())
    }

    /// Write the named template to `path`.
    pub fn export(&self, name: &str, path: &Path) -> Result<(), TemplateError> {
        let template = self
            .get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
        fs::write(path, template.to_json()?).map_err(|source| io_error(path, source))?;
        info!(name, path = %path.display(), "template exported");
        Ok(())
    }

    /// Import a template file, renaming it `"name (n)"` if the name is taken.
    pub fn import(&mut self, path: &Path) -> Result<Template, TemplateError> {
        let mut template = load_file(path)?;
        let original = template.name.clone();
        let mut n = 1;
        while self.templates.contains_key(&template.name) {
            template.name = format!("{original} ({n})");
            n += 1;
        }
        self.save(template.clone())?;
        info!(name = %template.name, from = %path.display(), "template imported");
        Ok(template)
    }
}

fn load_file(path: &Path) -> Result<Template, TemplateSchemaError> {
    let json = fs::read_to_string(path).map_err(|e| TemplateSchemaError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Template::from_json(&json, path)
}

fn io_error(path: &Path, source: io::Error) -> TemplateError {
    TemplateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_template(name: &str) -> Template {
        let mut config = WatermarkConfig::text("Studio {date}");
        config.stroke.enabled = true;
        config.placement.anchor = Anchor::Custom { x: 12, y: 34 };
        config.placement.rotation = 30.0;
        Template::new(name, "mine", config)
    }

    #[test]
    fn test_builtins_are_valid_and_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TemplateStore::open(dir.path()).unwrap();
        for t in builtin_templates() {
            t.config.validate().unwrap();
            assert!(store.is_builtin(&t.name));
        }
        assert!(matches!(store.delete("simple text"), Err(TemplateError::ReadOnly(_))));
        let mut clash = user_template("outlined text");
        clash.description = "override".into();
        assert!(matches!(store.save(clash), Err(TemplateError::ReadOnly(_))));
        assert_eq!(store.list().len(), 3);
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let saved = user_template("Night / Studio");
        {
            let mut store = TemplateStore::open(dir.path()).unwrap();
            let path = store.save(saved.clone()).unwrap();
            assert_eq!(path.file_name().unwrap(), "Night _ Studio.json");
        }
        let store = TemplateStore::open(dir.path()).unwrap();
        assert!(store.rejected().is_empty());
        let loaded = store.get("Night / Studio").unwrap();
        assert_eq!(loaded, &saved);
        assert_eq!(store.list().last().unwrap().name, "Night / Studio");
    }

    #[test]
    fn test_newer_schema_is_rejected_not_coerced() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = user_template("future");
        t.schema_version = TEMPLATE_SCHEMA_VERSION + 1;
        let path = dir.path().join("future.json");
        fs::write(&path, serde_json::to_string(&t).unwrap()).unwrap();

        let store = TemplateStore::open(dir.path()).unwrap();
        assert!(store.get("future").is_none());
        assert_eq!(store.rejected().len(), 1);
        assert_eq!(store.rejected()[0].path, path);
        assert!(store.rejected()[0].message.contains("newer"));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let json = serde_json::to_string(&user_template("x")).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["config"]["text"]["glow"] = serde_json::json!(true);
        let err = Template::from_json(&value.to_string(), Path::new("x.json")).unwrap_err();
        assert!(err.message.contains("glow"));

        let err = Template::from_json(r#"{"name":"x"}"#, Path::new("y.json")).unwrap_err();
        assert!(err.message.contains("schema_version"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut t = user_template("bad");
        t.config.text.opacity = 250;
        let json = serde_json::to_string(&t).unwrap();
        let err = Template::from_json(&json, Path::new("bad.json")).unwrap_err();
        assert!(err.message.contains("text.opacity"));
    }

    #[test]
    fn test_import_renames_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TemplateStore::open(dir.path().join("store")).unwrap();
        store.save(user_template("mine")).unwrap();

        let exported = dir.path().join("mine-export.json");
        store.export("mine", &exported).unwrap();
        assert_eq!(store.import(&exported).unwrap().name, "mine (1)");
        assert_eq!(store.import(&exported).unwrap().name, "mine (2)");

        // built-ins can be exported and re-imported as user copies
        let builtin = dir.path().join("simple.json");
        store.export("simple text", &builtin).unwrap();
        let copy = store.import(&builtin).unwrap();
        assert_eq!(copy.name, "simple text (1)");
        assert!(!store.is_builtin("simple text (1)"));
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TemplateStore::open(dir.path()).unwrap();
        let path = store.save(user_template("temp")).unwrap();
        store.delete("temp").unwrap();
        assert!(!path.exists());
        assert!(matches!(store.delete("temp"), Err(TemplateError::NotFound(_))));
    }

    #[test]
    fn test_names_sharing_a_file_name_keep_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TemplateStore::open(dir.path()).unwrap();
        let first = store.save(user_template("a/b")).unwrap();
        let mut other = user_template("a_b");
        other.description = "second".into();
        let second = store.save(other).unwrap();
        assert_eq!(first.file_name().unwrap(), "a_b.json");
        assert_eq!(second.file_name().unwrap(), "a_b (1).json");

        // updating keeps the template's own file
        let mut updated = user_template("a/b");
        updated.description = "edited".into();
        assert_eq!(store.save(updated).unwrap(), first);

        let mut store = TemplateStore::open(dir.path()).unwrap();
        assert_eq!(store.get("a/b").unwrap().description, "edited");
        assert_eq!(store.get("a_b").unwrap().description, "second");

        store.delete("a_b").unwrap();
        assert!(first.exists());
        assert!(!second.exists());
        assert!(TemplateStore::open(dir.path()).unwrap().get("a/b").is_some());
    }

    #[test]
    fn test_save_never_overwrites_a_rejected_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("later.json");
        let mut newer = serde_json::to_value(user_template("later")).unwrap();
        newer["schema_version"] = serde_json::json!(TEMPLATE_SCHEMA_VERSION + 1);
        fs::write(&path, newer.to_string()).unwrap();

        let mut store = TemplateStore::open(dir.path()).unwrap();
        assert_eq!(store.rejected().len(), 1);
        let saved = store.save(user_template("later")).unwrap();
        assert_ne!(saved, path);
        assert_eq!(fs::read_to_string(&path).unwrap(), newer.to_string());
    }
}
