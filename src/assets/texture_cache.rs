//! Compressed texture cache files
//!
//! `<dir>/<hash64(path)>.wnt`: a 12 byte little-endian header
//! `{ width: i32, height: i32, levels: i32 }` followed by every mip level of
//! BC7 data, largest first, tightly packed.

use std::path::{Path, PathBuf};

use crate::error::GraphicsResult;
use crate::gpu::constants::TEXTURE_CACHE_EXTENSION;
use crate::gpu::texture::{max_mip_levels, Format};
use crate::hot_reload::{cache_corrupted_error, HotReloadErrorContext};
use crate::utils::path_hash;

pub const TEXTURE_CACHE_HEADER_SIZE: usize = 12;

/// Format of the cached mip data
pub const CACHED_TEXTURE_FORMAT: Format = Format::Bc7Unorm;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTexture {
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub data: Vec<u8>,
}

impl CachedTexture {
    /// Byte size of every mip, largest first. Levels past the full chain
    /// are ignored.
    pub fn mip_sizes(width: u32, height: u32, levels: u32) -> Vec<u64> {
        (0..levels.min(max_mip_levels(width, height)))
            .map(|mip| CACHED_TEXTURE_FORMAT.image_size((width >> mip).max(1), (height >> mip).max(1)))
            .collect()
    }

    /// Split the packed data into one buffer per mip
    pub fn mips(&self) -> Vec<Vec<u8>> {
        let mut offset = 0usize;
        Self::mip_sizes(self.width, self.height, self.levels)
            .into_iter()
            .map(|size| {
                let end = (offset + size as usize).min(self.data.len());
                let mip = self.data[offset.min(end)..end].to_vec();
                offset = end;
                mip
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TextureCache {
    dir: PathBuf,
}

impl TextureCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn cache_path(&self, source: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", path_hash(source), TEXTURE_CACHE_EXTENSION))
    }

    pub fn exists(&self, source: &str) -> bool {
        self.cache_path(source).exists()
    }

    /// Load the cached texture for `source`, `None` when no cache file exists
    pub fn load(&self, source: &str) -> GraphicsResult<Option<CachedTexture>> {
        let path = self.cache_path(source);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = std::fs::read(&path).io_context(&path)?;
        if bytes.len() < TEXTURE_CACHE_HEADER_SIZE {
            return Err(cache_corrupted_error(&path, "truncated header"));
        }
        let field = |i: usize| i32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let (width, height, levels) = (field(0), field(4), field(8));
        if width <= 0 || height <= 0 || levels <= 0 {
            return Err(cache_corrupted_error(
                &path,
                format!("invalid extent {}x{} with {} levels", width, height, levels),
            ));
        }

        let (width, height, levels) = (width as u32, height as u32, levels as u32);
        if levels > max_mip_levels(width, height) {
            return Err(cache_corrupted_error(
                &path,
                format!("{} levels exceed the mip chain of {}x{}", levels, width, height),
            ));
        }
        let expected: u64 = CachedTexture::mip_sizes(width, height, levels).iter().sum();
        let data = bytes[TEXTURE_CACHE_HEADER_SIZE..].to_vec();
        if data.len() as u64 != expected {
            return Err(cache_corrupted_error(
                &path,
                format!("expected {} bytes of mip data, found {}", expected, data.len()),
            ));
        }

        log::debug!("[TextureCache::load] {} -> {}", source, path.display());
        Ok(Some(CachedTexture {
            width,
            height,
            levels,
            data,
        }))
    }

    pub fn store(&self, source: &str, texture: &CachedTexture) -> GraphicsResult<()> {
        std::fs::create_dir_all(&self.dir).io_context(&self.dir)?;

        let mut contents = Vec::with_capacity(TEXTURE_CACHE_HEADER_SIZE + texture.data.len());
        for field in [texture.width as i32, texture.height as i32, texture.levels as i32] {
            contents.extend_from_slice(&field.to_le_bytes());
        }
        contents.extend_from_slice(&texture.data);

        let path = self.cache_path(source);
        std::fs::write(&path, contents).io_context(&path)
    }
}
