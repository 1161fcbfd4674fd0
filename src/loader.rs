//! Module loader confined to the render bundle directory.
//!
//! The render bundle and the chunks it splits off are the only code the
//! isolate may load: remote specifiers are rejected, paths are canonicalized
//! and must stay inside the bundle directory, and only ES module files load.

use deno_core::{
    anyhow::{anyhow, Error},
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier,
    ModuleType, RequestedModuleType, ResolutionKind,
};
use std::path::{Path, PathBuf};

const REMOTE_SCHEMES: &[&str] = &["http:", "https:", "data:", "blob:", "npm:", "jsr:", "node:"];

pub struct SandboxedLoader {
    bundle_dir: PathBuf,
}

impl SandboxedLoader {
    /// Confine loading to `bundle_dir`, which must be an existing directory.
    pub fn new(bundle_dir: impl AsRef<Path>) -> Result<Self, Error> {
        let bundle_dir = bundle_dir.as_ref();
        let canonical = bundle_dir.canonicalize().map_err(|e| {
            anyhow!(
                "Render bundle directory '{}' is not accessible: {}",
                bundle_dir.display(),
                e
            )
        })?;

        if !canonical.is_dir() {
            return Err(anyhow!(
                "Render bundle path '{}' is not a directory",
                canonical.display()
            ));
        }

        Ok(Self {
            bundle_dir: canonical,
        })
    }

    /// Canonical path of `path` if it may be loaded.
    fn admit(&self, path: &Path) -> Result<PathBuf, Error> {
        let canonical = path
            .canonicalize()
            .map_err(|e| anyhow!("Cannot load '{}': {}", path.display(), e))?;

        if !canonical.starts_with(&self.bundle_dir) {
            return Err(anyhow!(
                "Access denied: '{}' is outside the render bundle directory",
                path.display()
            ));
        }

        if !matches!(
            canonical.extension().and_then(|e| e.to_str()),
            Some("js") | Some("mjs")
        ) {
            return Err(anyhow!(
                "Only .js and .mjs modules can be loaded, got: {}",
                path.display()
            ));
        }

        Ok(canonical)
    }

    fn to_file_path(specifier: &ModuleSpecifier) -> Result<PathBuf, Error> {
        if specifier.scheme() != "file" {
            return Err(anyhow!(
                "Only file:// modules can be loaded, got: {}",
                specifier.scheme()
            ));
        }
        specifier
            .to_file_path()
            .map_err(|_| anyhow!("Invalid file URL: {}", specifier))
    }
}

impl ModuleLoader for SandboxedLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, Error> {
        if REMOTE_SCHEMES.iter().any(|scheme| specifier.starts_with(scheme)) {
            return Err(anyhow!(
                "Render bundles must be self-contained, cannot import: {}",
                specifier
            ));
        }

        let resolved = if specifier.starts_with("file://") {
            ModuleSpecifier::parse(specifier)
                .map_err(|e| anyhow!("Invalid file URL '{}': {}", specifier, e))?
        } else if specifier.starts_with('/') {
            ModuleSpecifier::from_file_path(specifier)
                .map_err(|_| anyhow!("Invalid absolute path: {}", specifier))?
        } else if specifier.starts_with("./") || specifier.starts_with("../") {
            let referrer_url = ModuleSpecifier::parse(referrer)
                .map_err(|e| anyhow!("Invalid referrer '{}': {}", referrer, e))?;
            referrer_url
                .join(specifier)
                .map_err(|e| anyhow!("Failed to resolve '{}': {}", specifier, e))?
        } else {
            // Bare names are split chunks emitted next to the entry
            ModuleSpecifier::from_file_path(self.bundle_dir.join(specifier))
                .map_err(|_| anyhow!("Invalid chunk name: {}", specifier))?
        };

        let path = Self::to_file_path(&resolved)?;
        let canonical = self.admit(&path)?;

        ModuleSpecifier::from_file_path(&canonical)
            .map_err(|_| anyhow!("Failed to create module specifier for '{}'", canonical.display()))
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let source = Self::to_file_path(module_specifier)
            .and_then(|path| self.admit(&path))
            .and_then(|path| {
                std::fs::read_to_string(&path)
                    .map_err(|e| anyhow!("Failed to read '{}': {}", path.display(), e))
            })
            .map(|code| {
                ModuleSource::new(
                    ModuleType::JavaScript,
                    ModuleSourceCode::String(code.into()),
                    module_specifier,
                    None,
                )
            });

        ModuleLoadResponse::Sync(source)
    }
}
