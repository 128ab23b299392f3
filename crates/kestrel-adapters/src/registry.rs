use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use kestrel_core::{Error, Result, ToolDescriptor, ToolManifest};
use tracing::{debug, info};

/// Registry of the tools a context can invoke, keyed by unique name.
///
/// Descriptors are immutable once registered and handed out behind an
/// `Arc`, so lookups during execution never copy schema data.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolDescriptor>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor, replacing any previous tool with the same name.
    #[must_use]
    pub fn with_tool(mut self, descriptor: ToolDescriptor) -> Self {
        self.tools
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        self
    }

    /// Registers a descriptor.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when the name is already registered
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(Error::Config(format!(
                "Tool '{}' is already registered",
                descriptor.name
            )));
        }
        debug!(
            "Registered tool '{}' ({})",
            descriptor.name,
            descriptor.adapter_kind()
        );
        self.tools
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Looks up a tool by name.
    ///
    /// # Errors
    /// Returns [`Error::ToolNotFound`] for unknown names
    pub fn get(&self, name: &str) -> Result<Arc<ToolDescriptor>> {
        self.tools
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| Error::ToolNotFound(name.to_owned()))
    }

    /// Whether a tool with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Sorted names of every registered tool.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every descriptor, sorted by name.
    #[must_use]
    pub fn descriptors(&self) -> Vec<Arc<ToolDescriptor>> {
        let mut all: Vec<Arc<ToolDescriptor>> = self.tools.values().map(Arc::clone).collect();
        all.sort_by(|left, right| left.name.cmp(&right.name));
        all
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Loads every tool from a JSON manifest file and returns how many
    /// were added.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for unreadable or invalid manifests and
    /// for duplicate tool names
    pub fn load_manifest(&mut self, path: &Path) -> Result<usize> {
        let raw = fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("Cannot read manifest '{}': {err}", path.display()))
        })?;
        let manifest: ToolManifest = serde_json::from_str(&raw).map_err(|err| {
            Error::Config(format!("Invalid manifest '{}': {err}", path.display()))
        })?;

        let count = manifest.tools.len();
        for descriptor in manifest.tools {
            self.register(descriptor)?;
        }
        info!("Loaded {count} tool(s) from '{}'", path.display());
        Ok(count)
    }

    /// Loads every `*.json` manifest in a directory, in file name order.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when the directory cannot be read or any
    /// manifest in it fails to load
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let entries = fs::read_dir(dir).map_err(|err| {
            Error::Config(format!(
                "Cannot read manifest directory '{}': {err}",
                dir.display()
            ))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut total = 0;
        for path in &paths {
            total += self.load_manifest(path)?;
        }
        Ok(total)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test code is allowed to use unwrap/expect"
)]
mod tests {
    use super::*;
    use kestrel_core::CallTemplate;
    use tempfile::TempDir;

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(
            name.to_owned(),
            CallTemplate::Http {
                url: format!("https://example.com/{name}"),
                method: kestrel_core::HttpMethod::Get,
            },
        )
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("get_weather")).unwrap();

        let found = registry.get("get_weather").unwrap();
        assert_eq!(found.name, "get_weather");
        assert!(matches!(
            registry.get("missing"),
            Err(Error::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("calculator")).unwrap();
        assert!(matches!(
            registry.register(descriptor("calculator")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_names_are_sorted() {
        let registry = ToolRegistry::new()
            .with_tool(descriptor("zeta"))
            .with_tool(descriptor("alpha"));
        assert_eq!(registry.names(), vec!["alpha".to_owned(), "zeta".to_owned()]);
    }

    #[test]
    fn test_load_manifest_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tools.json");
        fs::write(
            &path,
            r#"{"tools": [{"name": "wc", "call_template": {"kind": "cli", "program": "wc"}}]}"#,
        )
        .unwrap();

        let mut registry = ToolRegistry::new();
        assert_eq!(registry.load_manifest(&path).unwrap(), 1);
        assert!(registry.contains("wc"));
    }

    #[test]
    fn test_load_manifest_rejects_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let mut registry = ToolRegistry::new();
        assert!(matches!(
            registry.load_manifest(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_dir_reads_every_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"{"tools": [{"name": "first", "call_template": {"kind": "cli", "program": "true"}}]}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("b.json"),
            r#"{"tools": [{"name": "second", "call_template": {"kind": "cli", "program": "true"}}]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut registry = ToolRegistry::new();
        assert_eq!(registry.load_dir(dir.path()).unwrap(), 2);
        assert_eq!(
            registry.names(),
            vec!["first".to_owned(), "second".to_owned()]
        );
    }
}
