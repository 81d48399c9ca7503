//! On-disk shader bytecode cache
//!
//! One file per source path: `<dir>/<hash64(path)>.wns`, holding a 16 byte
//! little-endian header `{ stage, mtime_low, mtime_high, size }` followed by
//! `size` bytes of bytecode. An entry is only reused when both mtime halves
//! match the live source file.

use std::path::{Path, PathBuf};

use crate::error::GraphicsResult;
use crate::gpu::constants::SHADER_CACHE_EXTENSION;
use crate::hot_reload::compiler::{CompiledShader, ShaderCompiler, ShaderStage};
use crate::hot_reload::error::{cache_corrupted_error, HotReloadErrorContext};
use crate::utils::{file_time, path_hash, FileTime};

pub const SHADER_CACHE_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderCacheHeader {
    pub stage: u32,
    pub low_time: u32,
    pub high_time: u32,
    pub size: u32,
}

impl ShaderCacheHeader {
    pub fn to_bytes(&self) -> [u8; SHADER_CACHE_HEADER_SIZE] {
        let mut bytes = [0u8; SHADER_CACHE_HEADER_SIZE];
        for (chunk, field) in bytes
            .chunks_exact_mut(4)
            .zip([self.stage, self.low_time, self.high_time, self.size])
        {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SHADER_CACHE_HEADER_SIZE {
            return None;
        }
        let field = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Some(Self {
            stage: field(0),
            low_time: field(4),
            high_time: field(8),
            size: field(12),
        })
    }

    pub fn time(&self) -> FileTime {
        FileTime::from_parts(self.low_time, self.high_time)
    }
}

#[derive(Debug)]
pub struct ShaderCache {
    dir: PathBuf,
    hits: u64,
    misses: u64,
}

impl ShaderCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file used for `source`
    pub fn cache_path(&self, source: &Path) -> PathBuf {
        let hash = path_hash(&source.to_string_lossy());
        self.dir.join(format!("{}.{}", hash, SHADER_CACHE_EXTENSION))
    }

    /// Read a cache file, validating its header against its length
    pub fn read_entry(&self, source: &Path) -> GraphicsResult<Option<(ShaderCacheHeader, Vec<u8>)>> {
        let path = self.cache_path(source);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).io_context(&path)?;
        let header = ShaderCacheHeader::from_bytes(&bytes)
            .ok_or_else(|| cache_corrupted_error(&path, "truncated header"))?;
        let body = &bytes[SHADER_CACHE_HEADER_SIZE..];
        if body.len() != header.size as usize {
            return Err(cache_corrupted_error(
                &path,
                format!("header says {} bytes, file holds {}", header.size, body.len()),
            ));
        }
        Ok(Some((header, body.to_vec())))
    }

    /// Cached bytecode for `source`, only if it was compiled for `stage`
    /// from a file with modification time `time`
    pub fn load(&self, source: &Path, stage: ShaderStage, time: FileTime) -> Option<Vec<u8>> {
        match self.read_entry(source) {
            Ok(Some((header, bytecode))) if header.stage == stage as u32 && header.time() == time => Some(bytecode),
            Ok(_) => None,
            Err(e) => {
                log::warn!("[ShaderCache::load] Ignoring cache entry: {}", e);
                None
            }
        }
    }

    pub fn store(&self, source: &Path, stage: ShaderStage, time: FileTime, bytecode: &[u8]) -> GraphicsResult<()> {
        std::fs::create_dir_all(&self.dir).io_context(&self.dir)?;

        let header = ShaderCacheHeader {
            stage: stage as u32,
            low_time: time.low,
            high_time: time.high,
            size: bytecode.len() as u32,
        };
        let mut contents = Vec::with_capacity(SHADER_CACHE_HEADER_SIZE + bytecode.len());
        contents.extend_from_slice(&header.to_bytes());
        contents.extend_from_slice(bytecode);

        let path = self.cache_path(source);
        std::fs::write(&path, contents).io_context(&path)
    }

    /// Compile `source`, reusing the cached bytecode when the file has not
    /// changed. Failed compiles are never cached.
    pub fn compile(
        &mut self,
        compiler: &mut dyn ShaderCompiler,
        source: &Path,
        stage: ShaderStage,
    ) -> GraphicsResult<CompiledShader> {
        let time = file_time(source)?;

        if let Some(bytecode) = self.load(source, stage, time) {
            self.hits += 1;
            log::debug!("[ShaderCache::compile] Cache hit for {}", source.display());
            return Ok(CompiledShader::new(stage, bytecode));
        }

        self.misses += 1;
        let bytecode = compiler.compile(source, stage)?;
        if let Err(e) = self.store(source, stage, time, &bytecode) {
            log::warn!("[ShaderCache::compile] Could not write cache for {}: {}", source.display(), e);
        }
        log::info!("[ShaderCache::compile] Compiled {} ({:?})", source.display(), stage);
        Ok(CompiledShader::new(stage, bytecode))
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}
