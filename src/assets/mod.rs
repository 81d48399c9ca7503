//! Texture assets: the compressed texture cache, batched uploads and the
//! path-keyed resource cache built on top of them.

pub mod resource_cache;
pub mod texture_cache;
pub mod uploader;

pub use resource_cache::ResourceCache;
pub use texture_cache::{CachedTexture, TextureCache, TEXTURE_CACHE_HEADER_SIZE};
pub use uploader::{TextureData, UploadBatch, UploadTicket, Uploader};
