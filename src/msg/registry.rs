// src/msg/registry.rs

use anyhow::{Context, Result};
use glob::glob;
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};
use tracing::{debug, warn};

use super::types::MessageSchema;

/// Resolves a message type name to its declared layout.
///
/// Passed explicitly into every decode/convert call; there is no
/// process-wide registry.
pub trait SchemaLookup {
    fn resolve(&self, type_name: &str) -> Option<&MessageSchema>;

    /// Resolve a type referenced from inside `package`. Bare names such as
    /// `Vector3` are tried as `<package>/msg/Vector3` first.
    fn resolve_in(&self, type_name: &str, package: Option<&str>) -> Option<&MessageSchema> {
        if !type_name.contains('/') {
            if let Some(pkg) = package {
                if let Some(s) = self.resolve(&format!("{}/msg/{}", pkg, type_name)) {
                    return Some(s);
                }
            }
        }
        self.resolve(type_name)
    }
}

/// `pkg/msg/Type` and `pkg/Type` name the same message.
fn canonical(name: &str) -> String {
    let parts: Vec<&str> = name.split('/').collect();
    match parts.as_slice() {
        [pkg, "msg", ty] => format!("{}/{}", pkg, ty),
        _ => name.to_string(),
    }
}

fn short_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// A schema file holds one schema or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaFile {
    Many(Vec<MessageSchema>),
    One(MessageSchema),
}

/// Owned set of declared message schemas.
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    schemas: Vec<MessageSchema>,
    /// canonical name (and aliases) → index
    by_name: HashMap<String, usize>,
    /// bare type name → index
    by_short: HashMap<String, usize>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set pre-populated with the common ROS2 types most logs reference.
    pub fn with_builtins() -> Self {
        let mut set = Self::new();
        for schema in builtin_schemas() {
            set.insert(schema);
        }
        set
    }

    /// Add `schema`; a schema with the same name replaces the previous one.
    pub fn insert(&mut self, schema: MessageSchema) {
        let key = canonical(&schema.name);
        let idx = match self.by_name.get(&key) {
            Some(&idx) => {
                warn!(schema = %schema.name, "replacing previously declared schema");
                self.schemas[idx] = schema;
                idx
            }
            None => {
                self.schemas.push(schema);
                self.schemas.len() - 1
            }
        };

        let schema = &self.schemas[idx];
        self.by_name.insert(key, idx);
        for alias in &schema.aliases {
            self.by_name.insert(canonical(alias), idx);
        }
        let short = short_name(&schema.name).to_string();
        if let Some(prev) = self.by_short.insert(short.clone(), idx) {
            if prev != idx {
                debug!(name = %short, "bare type name is ambiguous, last declaration wins");
            }
        }
    }

    /// Load every `*.yaml`, `*.yml` and `*.json` file below `dir`.
    /// Returns the number of schemas loaded.
    pub fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize> {
        let dir = dir.as_ref();
        let mut files = Vec::new();
        for ext in ["yaml", "yml", "json"] {
            let pattern = format!("{}/**/*.{}", dir.display(), ext);
            for entry in glob(&pattern).with_context(|| format!("bad glob pattern {}", pattern))? {
                files.push(entry?);
            }
        }
        files.sort();

        let mut loaded = 0;
        for file in files {
            let text =
                fs::read_to_string(&file).with_context(|| format!("reading {:?}", file))?;
            let parsed: SchemaFile = if file.extension().and_then(|e| e.to_str()) == Some("json") {
                serde_json::from_str(&text).with_context(|| format!("parsing {:?}", file))?
            } else {
                serde_yaml::from_str(&text).with_context(|| format!("parsing {:?}", file))?
            };
            let schemas = match parsed {
                SchemaFile::Many(v) => v,
                SchemaFile::One(s) => vec![s],
            };
            debug!(file = %file.display(), count = schemas.len(), "loaded schemas");
            loaded += schemas.len();
            for schema in schemas {
                self.insert(schema);
            }
        }
        Ok(loaded)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageSchema> {
        self.schemas.iter()
    }
}

impl SchemaLookup for SchemaSet {
    fn resolve(&self, type_name: &str) -> Option<&MessageSchema> {
        if let Some(&idx) = self.by_name.get(&canonical(type_name)) {
            return Some(&self.schemas[idx]);
        }
        if !type_name.contains('/') {
            if let Some(&idx) = self.by_short.get(type_name) {
                return Some(&self.schemas[idx]);
            }
        }
        None
    }
}

fn builtin_schemas() -> Vec<MessageSchema> {
    const VEC3: [(&str, &str); 3] = [("x", "float64"), ("y", "float64"), ("z", "float64")];
    let decls: Vec<(&str, Vec<(&str, &str)>)> = vec![
        (
            "builtin_interfaces/msg/Time",
            vec![("sec", "int32"), ("nanosec", "uint32")],
        ),
        (
            "std_msgs/msg/Header",
            vec![
                ("stamp", "builtin_interfaces/msg/Time"),
                ("frame_id", "string"),
            ],
        ),
        ("geometry_msgs/msg/Vector3", VEC3.to_vec()),
        ("geometry_msgs/msg/Point", VEC3.to_vec()),
        (
            "geometry_msgs/msg/Quaternion",
            vec![
                ("x", "float64"),
                ("y", "float64"),
                ("z", "float64"),
                ("w", "float64"),
            ],
        ),
        (
            "geometry_msgs/msg/Pose",
            vec![
                ("position", "geometry_msgs/msg/Point"),
                ("orientation", "geometry_msgs/msg/Quaternion"),
            ],
        ),
        (
            "geometry_msgs/msg/PoseStamped",
            vec![
                ("header", "std_msgs/msg/Header"),
                ("pose", "geometry_msgs/msg/Pose"),
            ],
        ),
    ];

    decls
        .into_iter()
        .filter_map(|(name, fields)| match MessageSchema::new(name, fields) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(schema = name, "invalid builtin schema: {:#}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn resolves_long_short_and_bare_names() {
        let set = SchemaSet::with_builtins();
        assert!(set.resolve("geometry_msgs/msg/Vector3").is_some());
        assert!(set.resolve("geometry_msgs/Vector3").is_some());
        assert!(set.resolve("Vector3").is_some());
        assert!(set.resolve("nav_msgs/msg/Odometry").is_none());
    }

    #[test]
    fn relative_names_prefer_declaring_package() -> Result<()> {
        let mut set = SchemaSet::new();
        set.insert(MessageSchema::new("a_msgs/msg/Status", [("ok", "bool")])?);
        set.insert(MessageSchema::new("b_msgs/msg/Status", [("code", "uint8")])?);

        let a = set.resolve_in("Status", Some("a_msgs")).unwrap();
        assert_eq!(a.name, "a_msgs/msg/Status");
        let b = set.resolve_in("Status", Some("b_msgs")).unwrap();
        assert_eq!(b.name, "b_msgs/msg/Status");
        Ok(())
    }

    #[test]
    fn aliases_resolve_and_redeclaration_replaces() -> Result<()> {
        let mut set = SchemaSet::new();
        set.insert(
            MessageSchema::new("sbg_driver/msg/SbgEkfStatus", [("solution_mode", "uint8")])?
                .with_alias("msg/SbgEkfStatus"),
        );
        assert_eq!(
            set.resolve("msg/SbgEkfStatus").unwrap().name,
            "sbg_driver/msg/SbgEkfStatus"
        );

        set.insert(MessageSchema::new(
            "sbg_driver/SbgEkfStatus",
            [("solution_mode", "uint8"), ("heading_valid", "bool")],
        )?);
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.resolve("sbg_driver/msg/SbgEkfStatus").unwrap().fields.len(),
            2
        );
        Ok(())
    }

    #[test]
    fn load_dir_reads_yaml_and_json() -> Result<()> {
        let dir = tempdir()?;
        let nested = dir.path().join("waverunner_msgs");
        fs::create_dir_all(&nested)?;

        let mut f = fs::File::create(nested.join("log1_tcu.yaml"))?;
        writeln!(
            f,
            "name: waverunner_msgs/msg/Log1Tcu\nfields:\n  - {{ name: aps_out, type: float32 }}\n  - {{ name: rps, type: uint16 }}"
        )?;

        let json = r#"[
            {"name": "waverunner_msgs/msg/Log1Ncu", "fields": [{"name": "angle", "type": "float32"}]},
            {"name": "waverunner_msgs/msg/Marker", "fields": [{"name": "data", "type": "bool"}]}
        ]"#;
        fs::write(dir.path().join("more.json"), json)?;
        fs::write(dir.path().join("notes.txt"), "ignored")?;

        let mut set = SchemaSet::new();
        assert_eq!(set.load_dir(dir.path())?, 3);
        assert_eq!(set.len(), 3);
        assert!(set.resolve("waverunner_msgs/msg/Log1Tcu").is_some());
        assert!(set.resolve("Log1Ncu").is_some());
        Ok(())
    }

    #[test]
    fn load_dir_rejects_invalid_types() -> Result<()> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("bad.yaml"),
            "name: x/msg/Bad\nfields:\n  - { name: v, type: 'float64[' }\n",
        )?;
        let mut set = SchemaSet::new();
        assert!(set.load_dir(dir.path()).is_err());
        Ok(())
    }
}
