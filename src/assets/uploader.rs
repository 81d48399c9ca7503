//! Batched texture uploads
//!
//! Jobs are queued with [`Uploader::enqueue`] and executed together by
//! [`Uploader::flush`]: one staging buffer per texture, one command buffer
//! for the whole batch, one blocking fence wait. A job that cannot be staged
//! is reported on its own and does not hold back the rest of the batch.

use std::path::Path;
use std::time::Instant;

use crate::assets::texture_cache::{CachedTexture, TextureCache, CACHED_TEXTURE_FORMAT};
use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::buffer::{Buffer, BufferDesc, BufferType};
use crate::gpu::command::{CommandBuffer, QueueType};
use crate::gpu::context::GraphicsContext;
use crate::gpu::resource::ResourceState;
use crate::gpu::texture::{max_mip_levels, pack_footprints, Format, MipSelector, Texture, TextureDesc};

/// CPU-side pixel data for every mip of a texture, largest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub mips: Vec<Vec<u8>>,
}

impl TextureData {
    /// Single-mip sRGB texture from tightly packed RGBA8 pixels
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> GraphicsResult<Self> {
        let data = Self {
            width,
            height,
            format: Format::Rgba8UnormSrgb,
            mips: vec![pixels],
        };
        data.validate("rgba8")?;
        Ok(data)
    }

    /// Decode an image file to RGBA8, flipped so row 0 is the bottom row
    pub fn decode_file(path: &Path) -> GraphicsResult<Self> {
        let image = image::open(path).map_err(|e| GraphicsError::AssetLoad {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let mut rgba = image.to_rgba8();
        image::imageops::flip_vertical_in_place(&mut rgba);
        let (width, height) = rgba.dimensions();
        Self::from_rgba8(width, height, rgba.into_raw())
    }

    pub fn from_cached(cached: &CachedTexture) -> Self {
        Self {
            width: cached.width,
            height: cached.height,
            format: CACHED_TEXTURE_FORMAT,
            mips: cached.mips(),
        }
    }

    pub fn levels(&self) -> u32 {
        self.mips.len() as u32
    }

    /// Every mip must hold exactly the tightly packed bytes of its extent
    pub fn validate(&self, name: &str) -> GraphicsResult<()> {
        if self.mips.is_empty() {
            return Err(GraphicsError::AssetLoad {
                path: name.to_string(),
                error: "no mip data".to_string(),
            });
        }
        if self.levels() > max_mip_levels(self.width, self.height) {
            return Err(GraphicsError::AssetLoad {
                path: name.to_string(),
                error: format!("{} mips exceed the chain of {}x{}", self.levels(), self.width, self.height),
            });
        }
        for (mip, data) in self.mips.iter().enumerate() {
            let expected = self
                .format
                .image_size((self.width >> mip).max(1), (self.height >> mip).max(1));
            if data.len() as u64 != expected {
                return Err(GraphicsError::AssetLoad {
                    path: name.to_string(),
                    error: format!("mip {} has {} bytes, expected {}", mip, data.len(), expected),
                });
            }
        }
        Ok(())
    }
}

/// Identifies a queued upload in the results of [`Uploader::flush`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadTicket(pub u64);

/// Outcome of one [`Uploader::flush`]
#[derive(Debug, Default)]
pub struct UploadBatch {
    /// Textures in `ShaderResource` state, ready to sample
    pub uploaded: Vec<(UploadTicket, Texture)>,
    /// Jobs that could not be staged, with nothing left allocated for them
    pub failed: Vec<(UploadTicket, GraphicsError)>,
}

#[derive(Debug)]
struct UploadJob {
    ticket: UploadTicket,
    name: String,
    data: TextureData,
}

#[derive(Debug, Default)]
pub struct Uploader {
    jobs: Vec<UploadJob>,
    next_ticket: u64,
}

impl Uploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, name: impl Into<String>, data: TextureData) -> GraphicsResult<UploadTicket> {
        let name = name.into();
        data.validate(&name)?;

        self.next_ticket += 1;
        let ticket = UploadTicket(self.next_ticket);
        self.jobs.push(UploadJob { ticket, name, data });
        Ok(ticket)
    }

    /// Queue an image file, preferring its compressed cache entry. A corrupt
    /// cache entry falls back to decoding the image.
    pub fn enqueue_file(&mut self, path: &Path, cache: &TextureCache) -> GraphicsResult<UploadTicket> {
        let key = path.to_string_lossy();
        let data = match cache.load(&key) {
            Ok(Some(cached)) => TextureData::from_cached(&cached),
            Ok(None) => TextureData::decode_file(path)?,
            Err(e @ GraphicsError::CacheCorrupted { .. }) => {
                log::warn!("[Uploader::enqueue_file] Ignoring cache entry for '{}': {}", key, e);
                TextureData::decode_file(path)?
            }
            Err(e) => return Err(e),
        };
        self.enqueue(key.into_owned(), data)
    }

    pub fn pending(&self) -> usize {
        self.jobs.len()
    }

    /// Create, stage and copy every queued texture, then block until the
    /// copies are complete. Jobs that fail to stage land in
    /// [`UploadBatch::failed`]; an error is only returned when the batch as a
    /// whole could not run, in which case nothing stays allocated.
    pub fn flush(&mut self, ctx: &mut GraphicsContext) -> GraphicsResult<UploadBatch> {
        if self.jobs.is_empty() {
            return Ok(UploadBatch::default());
        }

        let start = Instant::now();
        let jobs = std::mem::take(&mut self.jobs);
        let mut cmd = CommandBuffer::new(QueueType::Graphics);
        cmd.begin();

        let mut batch = UploadBatch::default();
        let mut staging = Vec::with_capacity(jobs.len());
        for job in jobs {
            match Self::record(ctx, &mut cmd, &job) {
                Ok((texture, buffer)) => {
                    batch.uploaded.push((job.ticket, texture));
                    staging.push(buffer);
                }
                Err(e) if e.is_fatal() => {
                    Self::discard(ctx, batch.uploaded, staging);
                    return Err(e);
                }
                Err(e) => {
                    log::error!("[Uploader::flush] Failed to stage '{}': {}", job.name, e);
                    batch.failed.push((job.ticket, e));
                }
            }
        }

        let submitted = cmd.end().and_then(|_| {
            if batch.uploaded.is_empty() {
                return Ok(());
            }
            ctx.submit(&[&cmd])?;
            ctx.flush().map(|_| ())
        });
        if let Err(e) = submitted {
            Self::discard(ctx, batch.uploaded, staging);
            return Err(e);
        }

        for buffer in staging {
            buffer.free(ctx);
        }
        log::info!(
            "[Uploader::flush] Uploaded {} textures ({} failed) in {:.2}ms",
            batch.uploaded.len(),
            batch.failed.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(batch)
    }

    fn record(ctx: &mut GraphicsContext, cmd: &mut CommandBuffer, job: &UploadJob) -> GraphicsResult<(Texture, Buffer)> {
        let data = &job.data;
        let desc = TextureDesc::new(data.width, data.height, data.format)
            .with_levels(data.levels())
            .named(job.name.clone());
        let mut texture = Texture::new(ctx, desc)?;

        let (footprints, total) = texture.footprints();
        let staging_desc = BufferDesc::new(total, 0, BufferType::Copy).named(format!("{} Staging", job.name));
        let staging = match Buffer::new(ctx, staging_desc) {
            Ok(buffer) => buffer,
            Err(e) => {
                texture.free(ctx);
                return Err(e);
            }
        };
        if let Err(e) = staging.write(ctx, 0, &pack_footprints(&data.mips, &footprints, total)) {
            staging.free(ctx);
            texture.free(ctx);
            return Err(e);
        }

        cmd.image_barrier(&mut texture, ResourceState::CopyDest, MipSelector::All);
        cmd.copy_buffer_to_texture(&texture, &staging, data.levels());
        cmd.image_barrier(&mut texture, ResourceState::ShaderResource, MipSelector::All);
        Ok((texture, staging))
    }

    fn discard(ctx: &mut GraphicsContext, textures: Vec<(UploadTicket, Texture)>, staging: Vec<Buffer>) {
        for (_, texture) in textures {
            texture.free(ctx);
        }
        for buffer in staging {
            buffer.free(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::config::GpuConfig;
    use crate::gpu::texture::copyable_footprints;

    fn context() -> (GraphicsContext, crate::backend::HeadlessProbe) {
        let backend = HeadlessBackend::new();
        let probe = backend.probe();
        let ctx = GraphicsContext::new(Box::new(backend), GpuConfig::default()).expect("context");
        (ctx, probe)
    }

    #[test]
    fn rgba8_size_is_validated() {
        assert!(TextureData::from_rgba8(2, 2, vec![0; 16]).is_ok());
        let err = TextureData::from_rgba8(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(err, GraphicsError::AssetLoad { .. }));
    }

    #[test]
    fn flush_uploads_pitched_texels_and_frees_staging() {
        let (mut ctx, probe) = context();
        let mut uploader = Uploader::new();
        let pixels: Vec<u8> = (0..4 * 4 * 4).map(|i| i as u8).collect();
        let ticket = uploader
            .enqueue("checker", TextureData::from_rgba8(4, 4, pixels.clone()).expect("data"))
            .expect("enqueue");
        assert_eq!(uploader.pending(), 1);

        let batch = uploader.flush(&mut ctx).expect("flush");
        assert!(batch.failed.is_empty());
        let uploaded = batch.uploaded;
        assert_eq!(uploader.pending(), 0);
        assert_eq!(uploaded.len(), 1);
        let (got, texture) = &uploaded[0];
        assert_eq!(*got, ticket);
        assert_eq!(texture.state(), ResourceState::ShaderResource);

        // Only the texture survives; its rows sit at the 256 byte pitch
        assert_eq!(probe.resource_count(), 1);
        let data = probe.resource_data(texture.handle()).expect("texture data");
        let (footprints, _) = copyable_footprints(4, 4, Format::Rgba8UnormSrgb, 1);
        let pitch = footprints[0].row_pitch as usize;
        assert_eq!(&data[..16], &pixels[..16]);
        assert_eq!(&data[pitch..pitch + 16], &pixels[16..32]);

        for (_, texture) in uploaded {
            texture.free(&mut ctx);
        }
        assert_eq!(ctx.shutdown().expect("shutdown"), 0);
    }

    #[test]
    fn failed_job_does_not_sink_the_batch() {
        let (mut ctx, probe) = context();
        let mut uploader = Uploader::new();
        let small = uploader
            .enqueue("small", TextureData::from_rgba8(1, 1, vec![255; 4]).expect("data"))
            .expect("enqueue");
        let huge = uploader
            .enqueue("huge", TextureData::from_rgba8(64, 64, vec![0; 64 * 64 * 4]).expect("data"))
            .expect("enqueue");

        probe.set_memory_budget(4096);
        let batch = uploader.flush(&mut ctx).expect("flush");
        assert_eq!(batch.uploaded.len(), 1);
        assert_eq!(batch.uploaded[0].0, small);
        assert_eq!(batch.uploaded[0].1.state(), ResourceState::ShaderResource);
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].0, huge);
        assert!(matches!(batch.failed[0].1, GraphicsError::OutOfMemory { .. }));

        // Nothing of the failed job or the staging buffers is left behind
        assert_eq!(probe.resource_count(), 1);
        for (_, texture) in batch.uploaded {
            texture.free(&mut ctx);
        }
        assert_eq!(ctx.tracker().live_count(), 0);
    }

    #[test]
    fn batch_where_every_job_fails_submits_nothing() {
        let (mut ctx, probe) = context();
        let mut uploader = Uploader::new();
        uploader
            .enqueue("huge", TextureData::from_rgba8(64, 64, vec![0; 64 * 64 * 4]).expect("data"))
            .expect("enqueue");

        probe.set_memory_budget(4096);
        let batch = uploader.flush(&mut ctx).expect("flush");
        assert!(batch.uploaded.is_empty());
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(ctx.queue().submissions(), 0);
        assert_eq!(probe.resource_count(), 0);
    }

    #[test]
    fn mip_count_past_the_chain_is_rejected() {
        let data = TextureData {
            width: 2,
            height: 2,
            format: Format::Rgba8Unorm,
            mips: vec![vec![0; 16], vec![0; 4], vec![0; 4]],
        };
        let err = data.validate("deep").unwrap_err();
        assert!(matches!(err, GraphicsError::AssetLoad { .. }));
    }
}
