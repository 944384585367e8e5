//! Presentation surface: swapchain, per-image views, multisampled
//! attachments and framebuffers
//!
//! All chain-dependent objects live in one owning node that is built as a
//! unit and torn down as a unit. Teardown always runs framebuffers, then
//! per-image views, then the color and depth attachments, then the chain.
//! Swapchain images belong to the chain and are never destroyed here.

use std::sync::Arc;

use ash::extensions::khr::{Surface as SurfaceLoader, Swapchain as SwapchainLoader};
use ash::vk;

use crate::config::ResourceConfig;
use crate::vulkan::image::create_image_view;
use crate::vulkan::swapchain::{
    find_depth_format, find_supported_format, SurfaceSupport, SwapchainPlan,
};
use crate::vulkan::{Framebuffer, GpuContext, GpuImage, ImageDesc, VulkanError, VulkanResult};
use crate::window::{wait_for_nonzero_extent, WindowExtentProvider};

/// Objects whose lifetime is tied to one swapchain
struct ChainResources {
    context: Arc<GpuContext>,
    swapchain_loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    color: Option<GpuImage>,
    depth: Option<GpuImage>,
    framebuffers: Vec<Framebuffer>,
    plan: SwapchainPlan,
    samples: vk::SampleCountFlags,
    depth_format: vk::Format,
}

impl ChainResources {
    /// Build the chain, its per-image views and both attachments.
    ///
    /// Each step stores what it created before the next one runs, so an
    /// error part way through releases everything built so far.
    fn build(
        context: &Arc<GpuContext>,
        swapchain_loader: &SwapchainLoader,
        surface: vk::SurfaceKHR,
        plan: SwapchainPlan,
        samples: vk::SampleCountFlags,
        depth_format: vk::Format,
    ) -> VulkanResult<Self> {
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(plan.sharing_mode)
            .queue_family_indices(&plan.queue_family_indices)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe {
            swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|result| VulkanError::ObjectCreation {
                    object: "swapchain",
                    result,
                })?
        };

        let mut resources = Self {
            context: Arc::clone(context),
            swapchain_loader: swapchain_loader.clone(),
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            color: None,
            depth: None,
            framebuffers: Vec::new(),
            plan,
            samples,
            depth_format,
        };

        resources.images = unsafe {
            swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)?
        };

        let format = resources.plan.surface_format.format;
        for &image in &resources.images {
            let view = create_image_view(
                context.device(),
                image,
                format,
                vk::ImageAspectFlags::COLOR,
                1,
            )?;
            resources.image_views.push(view);
        }

        let extent = resources.plan.extent;
        resources.color = Some(create_attachment(
            context,
            extent,
            format,
            samples,
            vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            vk::ImageAspectFlags::COLOR,
        )?);
        resources.depth = Some(create_attachment(
            context,
            extent,
            depth_format,
            samples,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?);

        Ok(resources)
    }

    fn attachment_views(&self) -> VulkanResult<(vk::ImageView, vk::ImageView)> {
        let color = self.color.as_ref().and_then(GpuImage::view);
        let depth = self.depth.as_ref().and_then(GpuImage::view);

        color.zip(depth).ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Swapchain attachments are missing their views".to_string(),
        })
    }
}

impl ChainResources {
    /// Destroy the objects one teardown stage covers. Stages already run are
    /// no-ops.
    fn release(&mut self, step: TeardownStep) {
        match step {
            TeardownStep::Framebuffers => self.framebuffers.clear(),
            TeardownStep::ImageViews => {
                let device = self.context.device();
                for view in self.image_views.drain(..) {
                    unsafe { device.destroy_image_view(view, None) };
                }
            }
            TeardownStep::Attachments => {
                self.color = None;
                self.depth = None;
            }
            TeardownStep::Swapchain => {
                if self.swapchain != vk::SwapchainKHR::null() {
                    unsafe {
                        self.swapchain_loader
                            .destroy_swapchain(self.swapchain, None);
                    }
                    self.swapchain = vk::SwapchainKHR::null();
                    log::debug!("Destroyed swapchain ({} images)", self.images.len());
                }
            }
        }
    }
}

impl Drop for ChainResources {
    fn drop(&mut self) {
        for step in TEARDOWN_ORDER {
            self.release(step);
        }
    }
}

fn create_attachment(
    context: &Arc<GpuContext>,
    extent: vk::Extent2D,
    format: vk::Format,
    samples: vk::SampleCountFlags,
    usage: vk::ImageUsageFlags,
    aspect: vk::ImageAspectFlags,
) -> VulkanResult<GpuImage> {
    let mut image = GpuImage::new(
        context,
        ImageDesc {
            width: extent.width,
            height: extent.height,
            mip_levels: 1,
            samples,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
        },
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    image.create_view(aspect, 1)?;
    Ok(image)
}

/// Whether an acquire or present result means the chain no longer matches
/// the surface and must be recreated
pub fn is_surface_invalidated(result: &Result<bool, vk::Result>) -> bool {
    matches!(result, Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR))
}

/// One stage of tearing down a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeardownStep {
    /// Framebuffers reference every view below them
    Framebuffers,
    /// Views over the swapchain images
    ImageViews,
    /// Color and depth attachments with their views and memory
    Attachments,
    /// The swapchain itself, which owns its images
    Swapchain,
}

/// Stages in the order they must run
pub(crate) const TEARDOWN_ORDER: [TeardownStep; 4] = [
    TeardownStep::Framebuffers,
    TeardownStep::ImageViews,
    TeardownStep::Attachments,
    TeardownStep::Swapchain,
];

/// Device-side steps of the chain lifecycle, driven by [`teardown_chain`]
/// and [`recreate_chain`]
pub(crate) trait ChainLifecycle {
    /// Wait until no submitted work can reference the chain
    fn wait_device_idle(&mut self) -> VulkanResult<()>;

    /// Run one teardown stage on the current chain, if any. The
    /// `Swapchain` stage leaves no chain behind.
    fn release(&mut self, step: TeardownStep);

    /// Negotiate and build a chain with its views and attachments
    fn build(&mut self, window_extent: vk::Extent2D) -> VulkanResult<()>;

    /// Build the framebuffers of the current chain
    fn build_framebuffers(&mut self, render_pass: vk::RenderPass) -> VulkanResult<()>;
}

/// Run every teardown stage in order
pub(crate) fn teardown_chain<L: ChainLifecycle + ?Sized>(target: &mut L) {
    for step in TEARDOWN_ORDER {
        target.release(step);
    }
}

/// Wait for a visible window, wait for the device to go idle, tear the old
/// chain down and build a new one with its framebuffers
pub(crate) fn recreate_chain<L: ChainLifecycle + ?Sized>(
    target: &mut L,
    window: &mut dyn WindowExtentProvider,
    render_pass: vk::RenderPass,
) -> VulkanResult<()> {
    let window_extent = wait_for_nonzero_extent(window);

    target.wait_device_idle()?;
    teardown_chain(target);

    log::info!(
        "Recreating swapchain for {}x{} window",
        window_extent.width,
        window_extent.height
    );

    target.build(window_extent)?;
    target.build_framebuffers(render_pass)
}

/// Swapchain and everything rendered into it, bound to one device and
/// surface pair.
///
/// The surface handle and surface loader belong to the caller and must
/// outlive this object.
pub struct PresentationSurface {
    context: Arc<GpuContext>,
    surface_loader: SurfaceLoader,
    swapchain_loader: SwapchainLoader,
    surface: vk::SurfaceKHR,
    config: ResourceConfig,
    chain: Option<ChainResources>,
}

impl PresentationSurface {
    /// Negotiate and build a swapchain for `surface` with its per-image views
    /// and multisampled color and depth attachments.
    ///
    /// Framebuffers are built separately with
    /// [`create_framebuffers`](Self::create_framebuffers) once a compatible
    /// render pass exists.
    pub fn create(
        context: &Arc<GpuContext>,
        surface_loader: &SurfaceLoader,
        surface: vk::SurfaceKHR,
        window: &dyn WindowExtentProvider,
        config: &ResourceConfig,
    ) -> VulkanResult<Self> {
        let swapchain_loader = SwapchainLoader::new(context.instance(), context.device());

        let mut presentation = Self {
            context: Arc::clone(context),
            surface_loader: surface_loader.clone(),
            swapchain_loader,
            surface,
            config: config.clone(),
            chain: None,
        };
        presentation.build_chain(window.framebuffer_extent())?;

        Ok(presentation)
    }

    fn build_chain(&mut self, window_extent: vk::Extent2D) -> VulkanResult<()> {
        let support = SurfaceSupport::query(
            &self.surface_loader,
            self.context.physical_device(),
            self.surface,
        )?;
        let plan =
            SwapchainPlan::negotiate(&support, window_extent, self.context.queue_families())?;
        let samples = self
            .context
            .max_usable_sample_count(self.config.msaa_sample_cap);
        let depth_format = self.find_depth_format()?;

        let chain = ChainResources::build(
            &self.context,
            &self.swapchain_loader,
            self.surface,
            plan,
            samples,
            depth_format,
        )?;

        log::info!(
            "Created swapchain: {} images, {}x{}, {:?}, {:?}, {:?} samples, depth {:?}",
            chain.images.len(),
            chain.plan.extent.width,
            chain.plan.extent.height,
            chain.plan.surface_format.format,
            chain.plan.present_mode,
            samples,
            depth_format
        );

        self.chain = Some(chain);
        Ok(())
    }

    /// Build one framebuffer per swapchain image with attachments ordered
    /// `[color, depth, swapchain image]`, replacing any existing set
    pub fn create_framebuffers(&mut self, render_pass: vk::RenderPass) -> VulkanResult<()> {
        let chain = self.chain.as_mut().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Cannot create framebuffers without a swapchain".to_string(),
        })?;

        chain.framebuffers.clear();

        let (color_view, depth_view) = chain.attachment_views()?;
        let mut framebuffers = Vec::with_capacity(chain.image_views.len());
        for &image_view in &chain.image_views {
            framebuffers.push(Framebuffer::new(
                &self.context,
                render_pass,
                &[color_view, depth_view, image_view],
                chain.plan.extent,
            )?);
        }
        chain.framebuffers = framebuffers;

        log::debug!("Created {} swapchain framebuffers", chain.framebuffers.len());
        Ok(())
    }

    /// First of `candidates` supporting `features` with `tiling` on this
    /// device
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> VulkanResult<vk::Format> {
        find_supported_format(candidates, tiling, features, |format| {
            self.context.format_properties(format)
        })
    }

    /// Most precise depth format this device can use as an attachment
    pub fn find_depth_format(&self) -> VulkanResult<vk::Format> {
        find_depth_format(|format| self.context.format_properties(format))
    }

    /// Rebuild the chain after the surface has been invalidated.
    ///
    /// Waits for the window to have a non-zero size, waits for the device to
    /// go idle, tears down every chain-dependent object and builds them again
    /// along with the framebuffers for `render_pass`.
    pub fn recreate(
        &mut self,
        window: &mut dyn WindowExtentProvider,
        render_pass: vk::RenderPass,
    ) -> VulkanResult<()> {
        recreate_chain(self, window, render_pass)
    }

    /// Destroy the chain and everything built on it. The surface stays usable
    /// for [`recreate`](Self::recreate).
    pub fn cleanup(&mut self) {
        teardown_chain(self);
    }

    /// Whether a chain currently exists
    pub const fn is_valid(&self) -> bool {
        self.chain.is_some()
    }

    /// Swapchain handle, null while torn down
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.chain
            .as_ref()
            .map_or_else(vk::SwapchainKHR::null, |chain| chain.swapchain)
    }

    /// Loader for acquire and present calls on this chain
    pub const fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Chosen surface format, undefined while torn down
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.chain
            .as_ref()
            .map(|chain| chain.plan.surface_format)
            .unwrap_or_default()
    }

    /// Chosen present mode, FIFO while torn down
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.chain
            .as_ref()
            .map_or(vk::PresentModeKHR::FIFO, |chain| chain.plan.present_mode)
    }

    /// Chosen extent, zero while torn down
    pub fn extent(&self) -> vk::Extent2D {
        self.chain
            .as_ref()
            .map(|chain| chain.plan.extent)
            .unwrap_or_default()
    }

    /// Sample count of the color and depth attachments
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.chain
            .as_ref()
            .map_or(vk::SampleCountFlags::TYPE_1, |chain| chain.samples)
    }

    /// Format of the depth attachment
    pub fn depth_format(&self) -> vk::Format {
        self.chain
            .as_ref()
            .map_or(vk::Format::UNDEFINED, |chain| chain.depth_format)
    }

    /// Number of images the driver returned for the chain
    pub fn image_count(&self) -> usize {
        self.chain.as_ref().map_or(0, |chain| chain.images.len())
    }

    /// Swapchain images, in acquire-index order
    pub fn images(&self) -> &[vk::Image] {
        self.chain.as_ref().map_or(&[][..], |chain| chain.images.as_slice())
    }

    /// One view per swapchain image, in acquire-index order
    pub fn image_views(&self) -> &[vk::ImageView] {
        self.chain.as_ref().map_or(&[][..], |chain| chain.image_views.as_slice())
    }

    /// One framebuffer per swapchain image once
    /// [`create_framebuffers`](Self::create_framebuffers) has run
    pub fn framebuffers(&self) -> &[Framebuffer] {
        self.chain.as_ref().map_or(&[][..], |chain| chain.framebuffers.as_slice())
    }

    /// Framebuffer for an acquired image index
    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers()
            .get(image_index as usize)
            .map(Framebuffer::handle)
    }

    /// Multisampled color attachment
    pub fn color_attachment(&self) -> Option<&GpuImage> {
        self.chain.as_ref().and_then(|chain| chain.color.as_ref())
    }

    /// Multisampled depth attachment
    pub fn depth_attachment(&self) -> Option<&GpuImage> {
        self.chain.as_ref().and_then(|chain| chain.depth.as_ref())
    }
}

impl ChainLifecycle for PresentationSurface {
    fn wait_device_idle(&mut self) -> VulkanResult<()> {
        self.context.wait_idle()
    }

    fn release(&mut self, step: TeardownStep) {
        if let Some(chain) = self.chain.as_mut() {
            chain.release(step);
        }
        if step == TeardownStep::Swapchain {
            self.chain = None;
        }
    }

    fn build(&mut self, window_extent: vk::Extent2D) -> VulkanResult<()> {
        self.build_chain(window_extent)
    }

    fn build_framebuffers(&mut self, render_pass: vk::RenderPass) -> VulkanResult<()> {
        self.create_framebuffers(render_pass)
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        self.cleanup();
    }
}
