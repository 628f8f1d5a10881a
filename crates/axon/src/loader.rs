//! Transactional dynamic-library loading.
//!
//! A library load either commits completely or leaves no trace: the loader
//! opens a registration transaction before calling the library's entry
//! point and rolls back every class the library registered if the entry
//! point fails. Load failures surface as events, never as resolver errors —
//! a directory scan keeps going past a bad file.

use std::path::{Path, PathBuf};

use libloading::Library;

use crate::bus::EventBusExt;
use crate::error::RegistryError;
use crate::events::{PluginLoadFailed, PluginLoaded};
use crate::library::LibraryGuard;
use crate::manager::Manager;
use crate::plugin::{InitContext, Registrar};
use crate::registry::LoadTransaction;

/// The one well-known entry point every participating library exports.
pub const INIT_SYMBOL: &str = "axon_plugin_init";

type PluginInitFn = unsafe extern "C" fn(*mut InitContext) -> i32;

mod platform {
    use std::path::Path;

    /// Does the shim recognise this path as a loadable library?
    pub fn is_plugin_file(path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("so") | Some("dylib") | Some("dll")
        )
    }
}

impl Manager {
    /// Scan a directory and load every library the platform shim
    /// recognises. Non-library files are skipped; per-file failures are
    /// reported through [`PluginLoadFailed`] and the scan continues.
    pub fn load_plugins_from_dir(&self, dir: &Path, recursive: bool) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(dir = %dir.display(), %error, "plugin directory not readable");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    self.load_plugins_from_dir(&path, true);
                }
            } else {
                self.load_plugin(&path);
            }
        }
    }

    /// Load one library. Returns whether its registrations were committed.
    pub fn load_plugin(&self, path: &Path) -> bool {
        if !platform::is_plugin_file(path) {
            return false;
        }
        match self.try_load(path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "plugin loaded");
                self.fire_global_with(|| PluginLoaded {
                    path: path.to_path_buf(),
                });
                true
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "plugin load failed");
                self.fire_global_with(|| PluginLoadFailed {
                    path: path.to_path_buf(),
                    error,
                });
                false
            }
        }
    }

    fn try_load(&self, path: &Path) -> Result<(), String> {
        // One load at a time: registrations tag the open transaction.
        let _loading = self.loading.lock();

        let lib = unsafe { Library::new(path) }
            .map_err(|error| format!("failed to map library: {error}"))?;
        let init: PluginInitFn = unsafe {
            *lib.get(b"axon_plugin_init\0")
                .map_err(|error| format!("missing entry symbol `{INIT_SYMBOL}`: {error}"))?
        };

        let guard = LibraryGuard::new(lib, path.to_path_buf());
        self.run_transaction(path, guard, |ctx| unsafe { init(ctx) })
    }

    /// Open a transaction, run the init function, and commit or roll back.
    fn run_transaction(
        &self,
        path: &Path,
        guard: LibraryGuard,
        init: impl FnOnce(*mut InitContext) -> i32,
    ) -> Result<(), String> {
        let manager = self
            .weak_self
            .upgrade()
            .ok_or_else(|| "manager is shutting down".to_string())?;

        {
            let mut registry = self.registry.lock();
            registry.load = Some(LoadTransaction {
                path: path.to_path_buf(),
                guard: guard.clone(),
                added: Vec::new(),
            });
        }

        let mut ctx = InitContext::new(manager, guard.clone());
        let rc = init(&mut ctx);

        let added = {
            let mut registry = self.registry.lock();
            registry.load.take().map(|tx| tx.added).unwrap_or_default()
        };

        if rc == 0 {
            let mut registry = self.registry.lock();
            registry.libraries.push((path.to_path_buf(), guard));
            Ok(())
        } else {
            let error = ctx
                .take_error()
                .unwrap_or_else(|| "plugin init failed".to_string());
            let mut registry = self.registry.lock();
            registry.rollback(&added);
            Err(error)
        }
    }

    /// Run an in-process registration bundle with the same transactional
    /// semantics as a library load: an error or panic in `init` rolls every
    /// registration back and fires [`PluginLoadFailed`].
    pub fn load_bundle(
        &self,
        name: &str,
        init: impl FnOnce(&Registrar<'_>) -> Result<(), RegistryError>,
    ) -> bool {
        let _loading = self.loading.lock();
        let path = PathBuf::from(name);

        let outcome = self.run_transaction(&path, LibraryGuard::host(), |ctx| {
            let ctx = unsafe { &mut *ctx };
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                init(&ctx.registrar())
            })) {
                Ok(Ok(())) => 0,
                Ok(Err(error)) => {
                    ctx.fail(error.to_string());
                    1
                }
                Err(panic) => {
                    ctx.fail(crate::plugin::panic_message(panic));
                    1
                }
            }
        });

        match outcome {
            Ok(()) => {
                self.fire_global_with(|| PluginLoaded { path: path.clone() });
                true
            }
            Err(error) => {
                tracing::warn!(bundle = name, %error, "bundle load failed");
                self.fire_global_with(|| PluginLoadFailed {
                    path: path.clone(),
                    error,
                });
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn non_library_files_are_skipped() {
        let manager = Manager::create();
        let dir = std::env::temp_dir().join("axon-loader-skip-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("not-a-plugin.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"hello")
            .unwrap();

        assert!(!manager.load_plugin(&path));
        assert!(!platform::is_plugin_file(&path));
    }

    #[test]
    fn a_file_that_is_not_a_library_fails_to_map() {
        let manager = Manager::create();
        let dir = std::env::temp_dir().join("axon-loader-map-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bogus.so");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"this is not an object file")
            .unwrap();

        use crate::bus::Delivery;
        use parking_lot::Mutex;
        use std::sync::Arc;

        let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let observer = Arc::new(());
        {
            let failures = failures.clone();
            manager.subscribe_global::<PluginLoadFailed, _, _>(
                &observer,
                Delivery::Direct,
                move |event| {
                    failures.lock().push(event.error.clone());
                },
            );
        }

        assert!(!manager.load_plugin(&path));
        let failures = failures.lock();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("failed to map library"));
    }

    #[test]
    fn missing_directory_is_quietly_ignored() {
        let manager = Manager::create();
        manager.load_plugins_from_dir(Path::new("/definitely/not/here"), true);
    }
}
