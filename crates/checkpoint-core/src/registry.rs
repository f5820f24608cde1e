//! Enrolled identities and their descriptors.
//!
//! The registry file lists who may pass; enrollment (external) turns each
//! reference image into a descriptor. Entries whose enrollment failed stay
//! listed but are never matchable.

use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Descriptor;

pub type EntryId = u32;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry file not readable: {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("registry file malformed: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate registry id {0}")]
    DuplicateId(EntryId),
}

/// One configured identity, before enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySpec {
    pub id: EntryId,
    pub display_name: String,
    pub reference_image: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default, rename = "entry")]
    entries: Vec<RegistrySpec>,
}

/// Parse a TOML registry file.
///
/// Relative `reference_image` paths resolve against the file's directory.
pub fn load_file(path: &Path) -> Result<Vec<RegistrySpec>, RegistryError> {
    let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse(&text, base)
}

fn parse(text: &str, base: &Path) -> Result<Vec<RegistrySpec>, RegistryError> {
    let file: RegistryFile = toml::from_str(text)?;

    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(file.entries.len());
    for mut spec in file.entries {
        if !seen.insert(spec.id) {
            return Err(RegistryError::DuplicateId(spec.id));
        }
        if spec.reference_image.is_relative() {
            spec.reference_image = base.join(&spec.reference_image);
        }
        specs.push(spec);
    }

    Ok(specs)
}

/// A registry identity with its descriptor, if enrollment succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub id: EntryId,
    pub display_name: String,
    pub reference_image: PathBuf,
    pub descriptor: Option<Descriptor>,
}

impl RegistryEntry {
    pub fn is_matchable(&self) -> bool {
        self.descriptor.is_some()
    }
}

/// Loaded / failed listing for one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub id: EntryId,
    pub display_name: String,
    pub enrolled: bool,
}

/// Read-only set of identities, in registry-file order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    pub fn new(entries: Vec<RegistryEntry>) -> Self {
        Self { entries }
    }

    /// Enroll every spec synchronously with `enroll`; failures are dropped
    /// from matching and logged.
    pub fn enroll<E, F>(specs: Vec<RegistrySpec>, mut enroll: F) -> Self
    where
        E: Display,
        F: FnMut(&RegistrySpec) -> Result<Descriptor, E>,
    {
        let mut builder = RegistryBuilder::default();
        for spec in specs {
            let result = enroll(&spec);
            builder.record(spec, result);
        }
        builder.finish()
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn matchable_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_matchable()).count()
    }

    pub fn summary(&self) -> Vec<EntrySummary> {
        self.entries
            .iter()
            .map(|e| EntrySummary {
                id: e.id,
                display_name: e.display_name.clone(),
                enrolled: e.is_matchable(),
            })
            .collect()
    }
}

/// Collects enrollment results one entry at a time.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: Vec<RegistryEntry>,
}

impl RegistryBuilder {
    pub fn record<E: Display>(&mut self, spec: RegistrySpec, result: Result<Descriptor, E>) {
        let descriptor = match result {
            Ok(descriptor) => {
                tracing::debug!(id = spec.id, name = %spec.display_name, dim = descriptor.len(), "enrolled");
                Some(descriptor)
            }
            Err(e) => {
                tracing::warn!(
                    id = spec.id,
                    name = %spec.display_name,
                    image = %spec.reference_image.display(),
                    error = %e,
                    "enrollment failed; entry excluded from matching"
                );
                None
            }
        };

        self.entries.push(RegistryEntry {
            id: spec.id,
            display_name: spec.display_name,
            reference_image: spec.reference_image,
            descriptor,
        });
    }

    pub fn finish(self) -> Registry {
        let registry = Registry::new(self.entries);
        tracing::info!(
            configured = registry.entries().len(),
            loaded = registry.matchable_count(),
            "registry loaded"
        );
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[[entry]]
id = 1
display_name = "Alice"
reference_image = "faces/alice.jpg"

[[entry]]
id = 2
display_name = "Bob"
reference_image = "/srv/faces/bob.jpg"
"#;

    fn spec(id: EntryId, name: &str) -> RegistrySpec {
        RegistrySpec {
            id,
            display_name: name.into(),
            reference_image: PathBuf::from(format!("/faces/{name}.jpg")),
        }
    }

    #[test]
    fn test_parse_resolves_relative_paths() {
        let specs = parse(SAMPLE, Path::new("/etc/checkpoint")).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].display_name, "Alice");
        assert_eq!(specs[0].reference_image, PathBuf::from("/etc/checkpoint/faces/alice.jpg"));
        assert_eq!(specs[1].reference_image, PathBuf::from("/srv/faces/bob.jpg"));
    }

    #[test]
    fn test_parse_empty_file() {
        assert!(parse("", Path::new(".")).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_duplicate_ids() {
        let text = r#"
[[entry]]
id = 7
display_name = "A"
reference_image = "a.jpg"

[[entry]]
id = 7
display_name = "B"
reference_image = "b.jpg"
"#;
        assert!(matches!(parse(text, Path::new(".")), Err(RegistryError::DuplicateId(7))));
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let text = "[[entry]]\nid = 1\n";
        assert!(matches!(parse(text, Path::new(".")), Err(RegistryError::Parse(_))));
    }

    #[test]
    fn test_load_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let specs = load_file(&path).unwrap();
        assert_eq!(specs[0].reference_image, dir.path().join("faces/alice.jpg"));
    }

    #[test]
    fn test_load_file_missing() {
        let err = load_file(Path::new("/nonexistent/registry.toml")).unwrap_err();
        assert!(matches!(err, RegistryError::Read { .. }));
    }

    #[test]
    fn test_enroll_drops_failures_but_keeps_listing() {
        let specs = vec![spec(1, "alice"), spec(2, "bob"), spec(3, "carol")];
        let registry = Registry::enroll(specs, |s| {
            if s.id == 2 {
                Err("no face in reference image")
            } else {
                Ok(Descriptor::new(vec![s.id as f32]))
            }
        });

        assert_eq!(registry.entries().len(), 3);
        assert_eq!(registry.matchable_count(), 2);
        assert!(!registry.entries()[1].is_matchable());

        let summary = registry.summary();
        assert_eq!(
            summary.iter().map(|s| s.enrolled).collect::<Vec<_>>(),
            vec![true, false, true]
        );
    }

    #[test]
    fn test_enroll_all_failures_is_legal() {
        let registry = Registry::enroll(vec![spec(1, "alice")], |_| Err::<Descriptor, _>("boom"));
        assert_eq!(registry.matchable_count(), 0);
    }
}
