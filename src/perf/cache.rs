//! Compilation Cache
//!
//! Content-keyed store of previously optimized ASTs: compiling a
//! script already seen returns the cached entry instead of re-running
//! the optimizer. Entries persist one file per entry under a cache
//! directory and are reloaded on startup; `clear` wipes both layers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

use crate::ast::types::ScriptNode;
use crate::interpreter::errors::{ErrorKind, ShellError};
use crate::perf::optimizer::{OptimizationReport, Optimizer};

/// File suffix for persisted entries.
const CACHE_FILE_SUFFIX: &str = ".fsc";

/// Engine version stamped into entries; bumping it invalidates old
/// files at load time.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One cached compilation, self-describing on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Content hash key
    pub key: String,
    /// Source path the script came from, when known
    pub source_path: Option<String>,
    /// Serialized optimized AST (the "bytecode" the engine consumes)
    pub bytecode: String,
    /// The unoptimized source AST
    pub source_ast: ScriptNode,
    pub compile_time_ms: f64,
    pub hit_count: u64,
    /// Size of the serialized form in bytes
    pub size: usize,
    pub engine_version: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl CacheEntry {
    /// Deserialize the optimized AST back out of the entry.
    pub fn optimized_ast(&self) -> Result<ScriptNode, ShellError> {
        serde_json::from_str(&self.bytecode).map_err(|e| {
            ShellError::new(ErrorKind::InvalidInput, format!("corrupt cache entry: {}", e))
                .with_context("key", &self.key)
        })
    }
}

/// Result of a compile call.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub ast: ScriptNode,
    pub cache_hit: bool,
    pub optimizations_applied: Vec<String>,
    pub key: String,
}

/// Content-keyed compilation cache. Clones share storage.
#[derive(Debug, Clone)]
pub struct CompilationCache {
    dir: PathBuf,
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    optimizer: Optimizer,
}

impl CompilationCache {
    /// Open a cache rooted at `dir`, reloading any persisted entries.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let cache = Self {
            dir,
            entries: Arc::new(RwLock::new(HashMap::new())),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            optimizer: Optimizer::new(),
        };
        cache.reload();
        cache
    }

    /// Content hash for a source string.
    pub fn content_key(source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Compile a parsed script, consulting the cache first. The result
    /// is a pure function of the source content.
    pub fn compile(
        &self,
        source: &str,
        source_path: Option<&str>,
        ast: &ScriptNode,
    ) -> Result<CompileOutput, ShellError> {
        let key = Self::content_key(source);

        if let Some(entry) = self.lookup_and_touch(&key) {
            debug!(key = %key, hits = entry.hit_count, "compilation cache hit");
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(CompileOutput {
                ast: entry.optimized_ast()?,
                cache_hit: true,
                optimizations_applied: Vec::new(),
                key,
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let OptimizationReport { script, applied } = self.optimizer.optimize(ast.clone());
        let compile_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let bytecode = serde_json::to_string(&script).map_err(|e| {
            ShellError::new(ErrorKind::InvalidInput, format!("cannot serialize AST: {}", e))
        })?;
        let entry = CacheEntry {
            key: key.clone(),
            source_path: source_path.map(|p| p.to_string()),
            size: bytecode.len(),
            bytecode,
            source_ast: ast.clone(),
            compile_time_ms,
            hit_count: 0,
            engine_version: ENGINE_VERSION.to_string(),
            created_at: chrono::Utc::now(),
        };

        self.persist(&entry);
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.clone(), entry);
        }

        Ok(CompileOutput {
            ast: script,
            cache_hit: false,
            optimizations_applied: applied,
            key,
        })
    }

    fn lookup_and_touch(&self, key: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.write().ok()?;
        let entry = entries.get_mut(key)?;
        entry.hit_count += 1;
        Some(entry.clone())
    }

    /// Remove everything, in memory and on disk.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
        if let Ok(read_dir) = std::fs::read_dir(&self.dir) {
            for file in read_dir.flatten() {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) == Some(&CACHE_FILE_SUFFIX[1..]) {
                    let _ = std::fs::remove_file(path);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", key, CACHE_FILE_SUFFIX))
    }

    fn persist(&self, entry: &CacheEntry) {
        if std::fs::create_dir_all(&self.dir).is_err() {
            return;
        }
        match serde_json::to_vec_pretty(entry) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(self.entry_path(&entry.key), bytes) {
                    warn!(key = %entry.key, error = %e, "failed to persist cache entry");
                }
            }
            Err(e) => warn!(key = %entry.key, error = %e, "failed to serialize cache entry"),
        }
    }

    fn reload(&self) {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(_) => return,
        };
        let mut loaded = 0usize;
        for file in read_dir.flatten() {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some(&CACHE_FILE_SUFFIX[1..]) {
                continue;
            }
            match read_entry(&path) {
                Some(entry) if entry.engine_version == ENGINE_VERSION => {
                    if let Ok(mut entries) = self.entries.write() {
                        entries.insert(entry.key.clone(), entry);
                        loaded += 1;
                    }
                }
                Some(stale) => {
                    debug!(key = %stale.key, version = %stale.engine_version, "dropping stale cache entry");
                    let _ = std::fs::remove_file(&path);
                }
                None => {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        if loaded > 0 {
            debug!(count = loaded, dir = %self.dir.display(), "reloaded compilation cache");
        }
    }
}

fn read_entry(path: &Path) -> Option<CacheEntry> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::grammar::parse;

    fn compile_twice(cache: &CompilationCache, source: &str) -> (CompileOutput, CompileOutput) {
        let ast = parse(source).unwrap();
        let first = cache.compile(source, None, &ast).unwrap();
        let second = cache.compile(source, None, &ast).unwrap();
        (first, second)
    }

    #[test]
    fn test_second_compile_hits() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompilationCache::open(dir.path());
        let (first, second) = compile_twice(&cache, "echo one\necho two");
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn test_compile_is_pure_function_of_content() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompilationCache::open(dir.path());
        let (first, second) = compile_twice(&cache, "X=1\necho $X");
        assert_eq!(first.ast, second.ast);
        assert_eq!(first.key, second.key);
    }

    #[test]
    fn test_different_content_different_key() {
        assert_ne!(
            CompilationCache::content_key("echo a"),
            CompilationCache::content_key("echo b")
        );
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = CompilationCache::open(dir.path());
            let ast = parse("echo persisted").unwrap();
            cache.compile("echo persisted", Some("a.fsh"), &ast).unwrap();
        }
        let reopened = CompilationCache::open(dir.path());
        assert_eq!(reopened.len(), 1);
        let ast = parse("echo persisted").unwrap();
        let output = reopened.compile("echo persisted", None, &ast).unwrap();
        assert!(output.cache_hit);
    }

    #[test]
    fn test_clear_wipes_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompilationCache::open(dir.path());
        let ast = parse("echo gone").unwrap();
        cache.compile("echo gone", None, &ast).unwrap();
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        let remaining = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|f| f.path().extension().and_then(|e| e.to_str()) == Some("fsc"))
            .count();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_entry_file_is_self_describing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompilationCache::open(dir.path());
        let ast = parse("echo meta").unwrap();
        let output = cache.compile("echo meta", Some("m.fsh"), &ast).unwrap();

        let path = dir.path().join(format!("{}.fsc", output.key));
        let entry: CacheEntry =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(entry.key, output.key);
        assert_eq!(entry.source_path.as_deref(), Some("m.fsh"));
        assert_eq!(entry.engine_version, ENGINE_VERSION);
        assert!(entry.size > 0);
        assert_eq!(entry.optimized_ast().unwrap(), output.ast);
    }
}
