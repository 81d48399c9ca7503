//! Textures, formats and copyable footprints

use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::constants::{
    align_up, ALL_MIPS, TEXTURE_PLACEMENT_ALIGNMENT, TEXTURE_ROW_PITCH_ALIGNMENT,
};
use crate::gpu::context::GraphicsContext;
use crate::gpu::resource::{ResourceHandle, ResourceKind, ResourceState};
use crate::utils::next_uuid;

/// Pixel formats understood by the GPU layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    R32Uint,
    R32Float,
    Depth32Float,
    /// 4x4 block compressed
    Bc7Unorm,
}

impl Format {
    /// Width/height of one block in texels
    pub fn block_dim(self) -> u32 {
        match self {
            Format::Bc7Unorm => 4,
            _ => 1,
        }
    }

    pub fn bytes_per_block(self) -> u32 {
        match self {
            Format::Rgba8Unorm
            | Format::Rgba8UnormSrgb
            | Format::Bgra8Unorm
            | Format::Bgra8UnormSrgb
            | Format::R32Uint
            | Format::R32Float
            | Format::Depth32Float => 4,
            Format::Rgba16Float => 8,
            Format::Rgba32Float | Format::Bc7Unorm => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Format::Depth32Float)
    }

    pub fn is_compressed(self) -> bool {
        self.block_dim() > 1
    }

    /// Tightly packed byte size of a `width` x `height` image
    pub fn image_size(self, width: u32, height: u32) -> u64 {
        let block = self.block_dim();
        let blocks_w = width.div_ceil(block) as u64;
        let blocks_h = height.div_ceil(block) as u64;
        blocks_w * blocks_h * self.bytes_per_block() as u64
    }
}

/// Selects every mip of a texture or a single level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MipSelector {
    #[default]
    All,
    Level(u32),
}

impl MipSelector {
    /// Decode the raw form where `0xFFFF` means all mips
    pub fn from_raw(raw: u32) -> Self {
        if raw == ALL_MIPS {
            MipSelector::All
        } else {
            MipSelector::Level(raw)
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            MipSelector::All => ALL_MIPS,
            MipSelector::Level(level) => level,
        }
    }
}

/// How a texture may be used besides sampling and copying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureUsage {
    pub render_target: bool,
    pub depth: bool,
    pub storage: bool,
}

impl TextureUsage {
    pub const SAMPLED: Self = Self {
        render_target: false,
        depth: false,
        storage: false,
    };

    /// Render targets are also writable as storage
    pub const RENDER_TARGET: Self = Self {
        render_target: true,
        depth: false,
        storage: true,
    };

    pub const DEPTH: Self = Self {
        render_target: false,
        depth: true,
        storage: false,
    };

    pub const STORAGE: Self = Self {
        render_target: false,
        depth: false,
        storage: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub usage: TextureUsage,
    pub levels: u32,
    pub name: String,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: Format) -> Self {
        Self {
            width,
            height,
            format,
            usage: TextureUsage::SAMPLED,
            levels: 1,
            name: "Texture".to_string(),
        }
    }

    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_levels(mut self, levels: u32) -> Self {
        self.levels = levels;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Placement of one mip level inside a staging buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceFootprint {
    pub mip: u32,
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    pub row_pitch: u32,
    /// Number of block rows
    pub rows: u32,
    /// Unpadded bytes per block row
    pub row_size: u64,
}

/// Length of the full mip chain of a `width` x `height` texture
pub fn max_mip_levels(width: u32, height: u32) -> u32 {
    u32::BITS - width.max(height).leading_zeros()
}

/// Lay out `levels` mips of a texture for a buffer to texture copy.
///
/// Rows are padded to 256 bytes and every mip starts on a 512 byte boundary.
/// Returns the footprints and the total staging size.
pub fn copyable_footprints(
    width: u32,
    height: u32,
    format: Format,
    levels: u32,
) -> (Vec<SubresourceFootprint>, u64) {
    let block = format.block_dim();
    let mut footprints = Vec::with_capacity(levels as usize);
    let mut end = 0u64;

    for mip in 0..levels {
        let mip_width = (width >> mip).max(1);
        let mip_height = (height >> mip).max(1);
        let row_size = mip_width.div_ceil(block) as u64 * format.bytes_per_block() as u64;
        let rows = mip_height.div_ceil(block);
        let row_pitch = align_up(row_size, TEXTURE_ROW_PITCH_ALIGNMENT);
        let offset = align_up(end, TEXTURE_PLACEMENT_ALIGNMENT);

        end = offset + row_pitch * (rows as u64 - 1) + row_size;
        footprints.push(SubresourceFootprint {
            mip,
            offset,
            width: mip_width,
            height: mip_height,
            row_pitch: row_pitch as u32,
            rows,
            row_size,
        });
    }

    (footprints, end)
}

/// Copy tightly packed mip data into a pitched staging image
pub fn pack_footprints(mips: &[Vec<u8>], footprints: &[SubresourceFootprint], total: u64) -> Vec<u8> {
    let mut staging = vec![0u8; total as usize];
    for (data, footprint) in mips.iter().zip(footprints) {
        let row_size = footprint.row_size as usize;
        for (row, src) in data.chunks(row_size).take(footprint.rows as usize).enumerate() {
            let dst = footprint.offset as usize + row * footprint.row_pitch as usize;
            staging[dst..dst + src.len()].copy_from_slice(src);
        }
    }
    staging
}

/// A GPU texture.
///
/// The tracked `state` is only changed by barriers recorded through a
/// command buffer.
#[derive(Debug)]
pub struct Texture {
    handle: ResourceHandle,
    uuid: u64,
    name: String,
    width: u32,
    height: u32,
    format: Format,
    usage: TextureUsage,
    levels: u32,
    pub(crate) state: ResourceState,
    /// Swapchain images belong to the presentation engine
    owned: bool,
}

impl Texture {
    pub fn new(ctx: &mut GraphicsContext, desc: TextureDesc) -> GraphicsResult<Self> {
        if desc.width == 0 || desc.height == 0 || desc.levels == 0 {
            return Err(GraphicsError::invalid_state(
                "texture_init",
                format!("'{}' has an empty extent or no mips", desc.name),
            ));
        }
        let max_levels = max_mip_levels(desc.width, desc.height);
        if desc.levels > max_levels {
            return Err(GraphicsError::invalid_state(
                "texture_init",
                format!("'{}' asks for {} mips, at most {} fit", desc.name, desc.levels, max_levels),
            ));
        }

        let handle = ctx.backend.create_texture(&desc)?;
        let uuid = next_uuid();
        let (_, bytes) = copyable_footprints(desc.width, desc.height, desc.format, desc.levels);
        ctx.tracker.track(uuid, &desc.name, ResourceKind::Texture, bytes);

        log::debug!(
            "[Texture::new] '{}' {}x{} {:?} ({} mips)",
            desc.name,
            desc.width,
            desc.height,
            desc.format,
            desc.levels
        );

        Ok(Self {
            handle,
            uuid,
            name: desc.name,
            width: desc.width,
            height: desc.height,
            format: desc.format,
            usage: desc.usage,
            levels: desc.levels,
            state: ResourceState::Common,
            owned: true,
        })
    }

    pub(crate) fn from_backbuffer(
        handle: ResourceHandle,
        index: usize,
        width: u32,
        height: u32,
        format: Format,
    ) -> Self {
        Self {
            handle,
            uuid: next_uuid(),
            name: format!("Backbuffer {}", index),
            width,
            height,
            format,
            usage: TextureUsage::RENDER_TARGET,
            levels: 1,
            state: ResourceState::Present,
            owned: false,
        }
    }

    /// Destroy the texture together with any views still cached for it
    pub fn free(self, ctx: &mut GraphicsContext) {
        ctx.release_texture_views(self.uuid, &self.name);
        if self.owned {
            ctx.backend.destroy_resource(self.handle);
            ctx.tracker.untrack(self.uuid);
        }
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn uuid(&self) -> u64 {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn usage(&self) -> TextureUsage {
        self.usage
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Extent of one mip level
    pub fn size(&self, mip: u32) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }

    pub fn footprints(&self) -> (Vec<SubresourceFootprint>, u64) {
        copyable_footprints(self.width, self.height, self.format, self.levels)
    }

    /// Staging bytes needed to upload every mip
    pub fn upload_size(&self) -> u64 {
        self.footprints().1
    }
}
