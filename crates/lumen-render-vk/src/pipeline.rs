// SPDX-License-Identifier: CEPL-1.0
//! Shader modules, descriptor set layout, render pass, fixed-function
//! pipeline and framebuffers.
//!
//! Viewport and scissor are baked in, so the render pass and pipeline are
//! rebuilt together with the swap chain whenever its format or extent moves.

use std::io::Cursor;
use std::mem::{offset_of, size_of};
use std::rc::Rc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::error::{RenderError, RenderResult, ShaderStage, VkResultExt};
use crate::gpu::GpuDevice;
use crate::owned::Owned;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 4],
    pub tc: [f32; 2],
}

impl Vertex {
    pub fn binding() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attributes() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, tc) as u32,
            },
        ]
    }
}

const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Full clip-space quad.
pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex {
        pos: [-1.0, -1.0, 0.0],
        color: WHITE,
        tc: [0.0, 1.0],
    },
    Vertex {
        pos: [1.0, -1.0, 0.0],
        color: WHITE,
        tc: [1.0, 1.0],
    },
    Vertex {
        pos: [-1.0, 1.0, 0.0],
        color: WHITE,
        tc: [0.0, 0.0],
    },
    Vertex {
        pos: [1.0, 1.0, 0.0],
        color: WHITE,
        tc: [1.0, 0.0],
    },
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 1, 3];

/// Word-aligned SPIR-V, or the reason it can't be used. No fallback shader.
pub fn decode_spirv(stage: ShaderStage, bytes: &[u8]) -> RenderResult<Vec<u32>> {
    if bytes.is_empty() {
        return Err(RenderError::EmptyShader(stage));
    }
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|source| RenderError::InvalidShader { stage, source })
}

fn create_module<D: GpuDevice>(
    device: &Rc<D>,
    stage: ShaderStage,
    bytes: &[u8],
) -> RenderResult<Owned<D, vk::ShaderModule>> {
    let code = decode_spirv(stage, bytes)?;
    let info = vk::ShaderModuleCreateInfo::default().code(&code);
    let module = unsafe { device.create_shader_module(&info) }.op("create_shader_module")?;
    Ok(Owned::new(device, module))
}

/// Vertex and fragment modules. Kept for the device's lifetime so pipeline
/// rebuilds don't need the bytecode again.
pub struct ShaderStages<D: GpuDevice> {
    fragment: Owned<D, vk::ShaderModule>,
    vertex: Owned<D, vk::ShaderModule>,
}

impl<D: GpuDevice> ShaderStages<D> {
    pub fn new(device: &Rc<D>, vertex_spv: &[u8], fragment_spv: &[u8]) -> RenderResult<Self> {
        let vertex = create_module(device, ShaderStage::Vertex, vertex_spv)?;
        let fragment = create_module(device, ShaderStage::Fragment, fragment_spv)?;
        Ok(ShaderStages { fragment, vertex })
    }
}

/// Binding 0: uniform buffer (vertex + fragment). Binding 1: combined image
/// sampler (fragment).
pub fn create_descriptor_set_layout<D: GpuDevice>(
    device: &Rc<D>,
) -> RenderResult<Owned<D, vk::DescriptorSetLayout>> {
    let bindings = [
        vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
        vk::DescriptorSetLayoutBinding::default()
            .binding(1)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
    ];
    let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    let layout = unsafe { device.create_descriptor_set_layout(&info) }
        .op("create_descriptor_set_layout")?;
    Ok(Owned::new(device, layout))
}

fn create_render_pass<D: GpuDevice>(
    device: &Rc<D>,
    format: vk::Format,
) -> RenderResult<Owned<D, vk::RenderPass>> {
    let attachments = [vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }];
    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)];
    // Hold color writes until the acquired image is actually released.
    let dependencies = [vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::empty(),
    }];
    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    let render_pass = unsafe { device.create_render_pass(&info) }.op("create_render_pass")?;
    Ok(Owned::new(device, render_pass))
}

/// Render pass, pipeline layout and pipeline. Torn down pipeline first.
pub struct PipelineState<D: GpuDevice> {
    pipeline: Owned<D, vk::Pipeline>,
    layout: Owned<D, vk::PipelineLayout>,
    render_pass: Owned<D, vk::RenderPass>,
}

impl<D: GpuDevice> PipelineState<D> {
    pub fn new(
        device: &Rc<D>,
        shaders: &ShaderStages<D>,
        set_layout: vk::DescriptorSetLayout,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let render_pass = create_render_pass(device, format)?;

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = unsafe { device.create_pipeline_layout(&layout_info) }
            .op("create_pipeline_layout")?;
        let layout = Owned::new(device, layout);

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(shaders.vertex.raw())
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(shaders.fragment.raw())
                .name(c"main"),
        ];

        let bindings = [Vertex::binding()];
        let attributes = Vertex::attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let raster = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(
                vk::ColorComponentFlags::R
                    | vk::ColorComponentFlags::G
                    | vk::ColorComponentFlags::B
                    | vk::ColorComponentFlags::A,
            )];
        let blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&raster)
            .multisample_state(&multisample)
            .color_blend_state(&blend)
            .layout(layout.raw())
            .render_pass(render_pass.raw())
            .subpass(0);
        let pipeline =
            unsafe { device.create_graphics_pipeline(&info) }.op("create_graphics_pipelines")?;

        Ok(PipelineState {
            pipeline: Owned::new(device, pipeline),
            layout,
            render_pass,
        })
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.raw()
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.raw()
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline.raw()
    }
}

/// One framebuffer per swap image view, bound to `render_pass`.
pub fn create_framebuffers<D: GpuDevice>(
    device: &Rc<D>,
    render_pass: vk::RenderPass,
    views: impl Iterator<Item = vk::ImageView>,
    extent: vk::Extent2D,
) -> RenderResult<Vec<Owned<D, vk::Framebuffer>>> {
    views
        .map(|view| {
            let attachments = [view];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let fb = unsafe { device.create_framebuffer(&info) }.op("create_framebuffer")?;
            Ok(Owned::new(device, fb))
        })
        .collect()
}
