//! Discovery of Lua modules on disk.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::Result;

/// Source of one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuaModule {
    /// Path relative to the runtime directory, `/`-separated.
    pub name: String,
    pub source: String,
}

/// Scans a runtime directory for `.lua` files.
pub struct ModuleLoader {
    modules_dir: PathBuf,
}

impl ModuleLoader {
    pub fn new<P: AsRef<Path>>(modules_dir: P) -> Self {
        Self {
            modules_dir: modules_dir.as_ref().to_path_buf(),
        }
    }

    /// Read every module, sorted by relative path.
    ///
    /// A missing directory yields no modules.
    pub fn load_all(&self) -> Result<Vec<LuaModule>> {
        let mut modules = Vec::new();
        if !self.modules_dir.exists() {
            warn!(
                "Runtime directory {} does not exist, no Lua modules loaded",
                self.modules_dir.display()
            );
            return Ok(modules);
        }

        self.scan_directory(&self.modules_dir, &mut modules)?;
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(modules)
    }

    fn scan_directory(&self, dir: &Path, modules: &mut Vec<LuaModule>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                self.scan_directory(&path, modules)?;
            } else if path.extension().is_some_and(|ext| ext == "lua") {
                let name = self.relative_name(&path);
                debug!("Found Lua module {}", name);
                modules.push(LuaModule {
                    name,
                    source: fs::read_to_string(&path)?,
                });
            }
        }
        Ok(())
    }

    fn relative_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.modules_dir)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}
