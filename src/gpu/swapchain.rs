//! Swapchain: `FRAMES_IN_FLIGHT` presentable backbuffers, each with a
//! texture wrapper and a render target view.

use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::constants::FRAMES_IN_FLIGHT;
use crate::gpu::context::GraphicsContext;
use crate::gpu::error::device_error;
use crate::gpu::resource::ResourceHandle;
use crate::gpu::texture::{Format, MipSelector, Texture};
use crate::gpu::view::{TextureView, ViewKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub buffer_count: usize,
}

impl SwapchainDesc {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: Format::Rgba8Unorm,
            buffer_count: FRAMES_IN_FLIGHT,
        }
    }
}

/// One presentable image
#[derive(Debug)]
pub struct Backbuffer {
    pub texture: Texture,
    pub view: TextureView,
}

#[derive(Debug)]
pub struct Swapchain {
    width: u32,
    height: u32,
    format: Format,
    /// `None` while the backbuffer is lent out to a frame or released
    backbuffers: Vec<Option<Backbuffer>>,
}

impl Swapchain {
    pub fn new(ctx: &mut GraphicsContext, desc: SwapchainDesc) -> GraphicsResult<Self> {
        if desc.buffer_count != FRAMES_IN_FLIGHT {
            return Err(device_error(
                "swapchain",
                format!("{} buffers requested, exactly {} supported", desc.buffer_count, FRAMES_IN_FLIGHT),
            ));
        }

        let handles = ctx.backend.create_swapchain(&desc)?;
        let mut swapchain = Self {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            backbuffers: Vec::new(),
        };
        swapchain.wrap_backbuffers(ctx, &handles)?;
        log::info!(
            "[Swapchain::new] {}x{} {:?} with {} buffers",
            desc.width,
            desc.height,
            desc.format,
            desc.buffer_count
        );
        Ok(swapchain)
    }

    fn wrap_backbuffers(&mut self, ctx: &mut GraphicsContext, handles: &[ResourceHandle]) -> GraphicsResult<()> {
        if handles.len() != FRAMES_IN_FLIGHT {
            return Err(device_error(
                "swapchain",
                format!("backend returned {} backbuffers", handles.len()),
            ));
        }

        self.backbuffers.clear();
        for (index, &handle) in handles.iter().enumerate() {
            let texture = Texture::from_backbuffer(handle, index, self.width, self.height, self.format);
            let view = TextureView::create(
                ctx.backend.as_mut(),
                &mut ctx.heaps,
                &texture,
                ViewKind::RenderTarget,
                MipSelector::All,
            )?;
            self.backbuffers.push(Some(Backbuffer { texture, view }));
        }
        Ok(())
    }

    /// Release every backbuffer and its descriptor. Slots already released
    /// are skipped.
    fn release_backbuffers(&mut self, ctx: &mut GraphicsContext) {
        for backbuffer in self.backbuffers.iter_mut().filter_map(Option::take) {
            backbuffer.view.destroy(ctx.backend.as_mut(), &mut ctx.heaps);
            backbuffer.texture.free(ctx);
        }
        ctx.backend.release_swapchain_buffers();
    }

    /// Release, resize and recreate all backbuffers in lockstep.
    /// The GPU must be idle and no backbuffer may be lent out.
    pub fn resize(&mut self, ctx: &mut GraphicsContext, width: u32, height: u32) -> GraphicsResult<()> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::invalid_state("swapchain_resize", "zero sized swapchain"));
        }
        if self.backbuffers.iter().any(Option::is_none) {
            return Err(GraphicsError::invalid_state(
                "swapchain_resize",
                "a backbuffer is still in use by a frame",
            ));
        }

        self.release_backbuffers(ctx);
        let handles = ctx.backend.resize_swapchain(width, height)?;
        self.width = width;
        self.height = height;
        self.wrap_backbuffers(ctx, &handles)?;
        log::info!("[Swapchain::resize] Resized to {}x{}", width, height);
        Ok(())
    }

    /// Lend out backbuffer `index` to a frame
    pub(crate) fn take(&mut self, index: usize) -> GraphicsResult<Backbuffer> {
        self.backbuffers
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| GraphicsError::invalid_state("swapchain_take", format!("backbuffer {} is not available", index)))
    }

    pub(crate) fn restore(&mut self, index: usize, backbuffer: Backbuffer) {
        if let Some(slot) = self.backbuffers.get_mut(index) {
            *slot = Some(backbuffer);
        }
    }

    pub fn free(mut self, ctx: &mut GraphicsContext) {
        self.release_backbuffers(ctx);
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

    pub fn buffer_count(&self) -> usize {
        self.backbuffers.len()
    }

    pub fn backbuffer(&self, index: usize) -> Option<&Backbuffer> {
        self.backbuffers.get(index).and_then(Option::as_ref)
    }
}
