use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::OnceCell;
use tracing::debug;

use super::{CompileOptions, CompiledTemplate};
use crate::ast::directive::Document;
use crate::codegen::{IncludeSource, load_document};
use crate::error::{CompileError, Error};
use crate::eval::{Bindings, EvalOptions, Interpreter};
use crate::registry::Registry;

type Cache<T> = Mutex<HashMap<PathBuf, Arc<OnceCell<Arc<T>>>>>;

/// Compiles template files on first use and keeps them for later renders.
///
/// Files are keyed by canonical path, so the same file reached through
/// different relative paths is compiled once. Parsed documents are cached
/// the same way and shared between templates that `@include` them.
///
/// Edits to a file after it has been loaded are not picked up; use
/// [`TemplateLoader::clear`] to drop the cache.
pub struct TemplateLoader {
    options: CompileOptions,
    registry: Registry,
    eval_options: EvalOptions,
    templates: Cache<CompiledTemplate>,
    documents: Cache<Document>,
}

impl Default for TemplateLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateLoader {
    pub fn new() -> Self {
        Self::with_options(CompileOptions::default())
    }

    pub fn with_options(options: CompileOptions) -> Self {
        Self {
            options,
            registry: Registry::with_builtins(),
            eval_options: EvalOptions::default(),
            templates: Mutex::default(),
            documents: Mutex::default(),
        }
    }

    /// Replace the function registry used by [`TemplateLoader::render_file`].
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_eval_options(mut self, options: EvalOptions) -> Self {
        self.eval_options = options;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.options.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// The compiled template for `path`, compiling it on first use.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Arc<CompiledTemplate>, CompileError> {
        let path = self.resolve(path.as_ref());
        let key = path.canonicalize().unwrap_or(path);
        let cell = cell_for(&self.templates, &key);

        cell.get_or_try_init(|| {
            debug!(path = %key.display(), "compiling template");
            let document = self.document(&key)?;
            let options = CompileOptions {
                file: Some(key.clone()),
                ..self.options.clone()
            };
            let name = Some(Arc::from(key.display().to_string()));
            CompiledTemplate::compile_document(&document, name, &options, self).map(Arc::new)
        })
        .cloned()
    }

    /// Load `path` and render it with a fresh [`Interpreter`] over `bindings`.
    pub fn render_file(&self, path: impl AsRef<Path>, bindings: Bindings) -> Result<String, Error> {
        let template = self.load(path)?;
        let mut host = Interpreter::with_options(&self.registry, bindings, self.eval_options.clone());
        Ok(template.render(&mut host)?)
    }

    /// Number of compiled templates held.
    pub fn len(&self) -> usize {
        lock(&self.templates).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.templates).clear();
        lock(&self.documents).clear();
    }
}

impl IncludeSource for TemplateLoader {
    fn document(&self, path: &Path) -> Result<Arc<Document>, CompileError> {
        cell_for(&self.documents, path)
            .get_or_try_init(|| load_document(path).map(Arc::new))
            .cloned()
    }

    fn contents(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

fn lock<T>(cache: &Cache<T>) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<OnceCell<Arc<T>>>>> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

// The map lock is released before the cell is initialised, so compiling one
// file can load others (includes) without deadlocking.
fn cell_for<T>(cache: &Cache<T>, key: &Path) -> Arc<OnceCell<Arc<T>>> {
    lock(cache).entry(key.to_path_buf()).or_default().clone()
}

impl std::fmt::Debug for TemplateLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateLoader")
            .field("options", &self.options)
            .field("templates", &self.len())
            .finish()
    }
}
