//! Reference-counted texture cache keyed by file path
//!
//! The first request for a path queues an upload; later requests only bump
//! the reference count. `give_back` drops a reference and frees the texture
//! when none remain. An entry whose upload fails is dropped, so the next
//! request for its path queues it again.

use std::path::Path;

use rustc_hash::FxHashMap;

use crate::assets::texture_cache::TextureCache;
use crate::assets::uploader::{UploadTicket, Uploader};
use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::context::GraphicsContext;
use crate::gpu::texture::Texture;

#[derive(Debug)]
struct CacheEntry {
    /// Set once the upload has been flushed
    texture: Option<Texture>,
    ticket: Option<UploadTicket>,
    refs: u32,
}

#[derive(Debug)]
pub struct ResourceCache {
    textures: FxHashMap<String, CacheEntry>,
    uploader: Uploader,
    texture_cache: TextureCache,
}

impl ResourceCache {
    pub fn new(texture_cache: TextureCache) -> Self {
        Self {
            textures: FxHashMap::default(),
            uploader: Uploader::new(),
            texture_cache,
        }
    }

    /// Take a reference to the texture at `path`, queueing its upload on
    /// first request. The texture is usable after the next [`flush`](Self::flush).
    pub fn request(&mut self, path: &str) -> GraphicsResult<()> {
        if let Some(entry) = self.textures.get_mut(path) {
            entry.refs += 1;
            return Ok(());
        }

        let ticket = self.uploader.enqueue_file(Path::new(path), &self.texture_cache)?;
        log::debug!("[ResourceCache::request] Queued '{}'", path);
        self.textures.insert(
            path.to_string(),
            CacheEntry {
                texture: None,
                ticket: Some(ticket),
                refs: 1,
            },
        );
        Ok(())
    }

    /// Take a reference and make sure the texture is resident
    pub fn get(&mut self, ctx: &mut GraphicsContext, path: &str) -> GraphicsResult<&Texture> {
        self.request(path)?;
        if self.textures.get(path).is_some_and(|e| e.texture.is_none()) {
            if let Err(e) = self.flush(ctx) {
                if self.texture(path).is_none() {
                    return Err(e);
                }
            }
        }
        self.texture(path).ok_or_else(|| GraphicsError::AssetLoad {
            path: path.to_string(),
            error: "texture was not uploaded".to_string(),
        })
    }

    /// Upload every queued texture. Textures that uploaded are installed
    /// even when others failed; the first failure is returned after the
    /// failed entries have been dropped.
    pub fn flush(&mut self, ctx: &mut GraphicsContext) -> GraphicsResult<()> {
        let batch = match self.uploader.flush(ctx) {
            Ok(batch) => batch,
            Err(e) => {
                // The whole batch is gone, so are its tickets
                self.textures.retain(|path, entry| {
                    if entry.ticket.is_some() {
                        log::error!("[ResourceCache::flush] Dropping '{}': {}", path, e);
                    }
                    entry.ticket.is_none()
                });
                return Err(e);
            }
        };

        for (ticket, texture) in batch.uploaded {
            match self.textures.values_mut().find(|e| e.ticket == Some(ticket)) {
                Some(entry) => {
                    entry.ticket = None;
                    entry.texture = Some(texture);
                }
                // Given back before its upload finished
                None => texture.free(ctx),
            }
        }

        let mut first_error = None;
        for (ticket, error) in batch.failed {
            self.textures.retain(|path, entry| {
                if entry.ticket != Some(ticket) {
                    return true;
                }
                log::error!(
                    "[ResourceCache::flush] Dropping '{}' with {} references: {}",
                    path,
                    entry.refs,
                    error
                );
                false
            });
            first_error.get_or_insert(error);
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn texture(&self, path: &str) -> Option<&Texture> {
        self.textures.get(path).and_then(|e| e.texture.as_ref())
    }

    pub fn ref_count(&self, path: &str) -> u32 {
        self.textures.get(path).map_or(0, |e| e.refs)
    }

    /// Drop one reference. Returns true when the texture was released.
    pub fn give_back(&mut self, ctx: &mut GraphicsContext, path: &str) -> bool {
        let Some(entry) = self.textures.get_mut(path) else {
            log::warn!("[ResourceCache::give_back] '{}' is not cached", path);
            return false;
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            return false;
        }

        if let Some(entry) = self.textures.remove(path) {
            if let Some(texture) = entry.texture {
                texture.free(ctx);
            }
        }
        log::debug!("[ResourceCache::give_back] Released '{}'", path);
        true
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Free everything, reporting entries that were never given back
    pub fn free(mut self, ctx: &mut GraphicsContext) {
        if let Err(e) = self.flush(ctx) {
            log::error!("[ResourceCache::free] Pending uploads failed: {}", e);
        }
        for (path, entry) in self.textures.drain() {
            log::warn!("[ResourceCache::free] '{}' still has {} references", path, entry.refs);
            if let Some(texture) = entry.texture {
                texture.free(ctx);
            }
        }
    }
}
