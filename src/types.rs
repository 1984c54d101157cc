// Renderer-neutral vocabulary for the public API
//
// These types describe pipelines, resources, and attachments without
// exposing any Vulkan types to the caller. Each enum knows how to
// translate itself to its Vulkan equivalent, so the translation table
// lives in exactly one place.

use ash::vk;

use crate::image::Texture;
use crate::pipelines::ShaderModule;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

impl PresentMode {
    pub(crate) fn to_vk(&self) -> vk::PresentModeKHR {
        match self {
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrimitiveType {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

impl PrimitiveType {
    /// How many vertices `primitive_count` primitives consume
    pub fn vertex_count(&self, primitive_count: u32) -> u32 {
        match self {
            PrimitiveType::PointList => primitive_count,
            PrimitiveType::LineList => primitive_count * 2,
            PrimitiveType::LineStrip => primitive_count + 1,
            PrimitiveType::TriangleList => primitive_count * 3,
            PrimitiveType::TriangleStrip => primitive_count + 2,
        }
    }

    pub(crate) fn to_vk(&self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveType::PointList => vk::PrimitiveTopology::POINT_LIST,
            PrimitiveType::LineList => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveType::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            PrimitiveType::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveType::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
}

impl LoadOp {
    pub(crate) fn to_vk(&self) -> vk::AttachmentLoadOp {
        match self {
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    DontCare,
}

impl StoreOp {
    pub(crate) fn to_vk(&self) -> vk::AttachmentStoreOp {
        match self {
            StoreOp::Store => vk::AttachmentStoreOp::STORE,
            StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexElementSize {
    Uint16,
    Uint32,
}

impl IndexElementSize {
    pub(crate) fn to_vk(&self) -> vk::IndexType {
        match self {
            IndexElementSize::Uint16 => vk::IndexType::UINT16,
            IndexElementSize::Uint32 => vk::IndexType::UINT32,
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            IndexElementSize::Uint16 => 2,
            IndexElementSize::Uint32 => 4,
        }
    }
}

/// Texture formats supported by the layer
///
/// Color formats come first, depth formats last. The layer picks aspect
/// masks and copy strides from this, so all size queries route through
/// here as well.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8G8B8A8,
    B8G8R8A8,
    R5G6B5,
    A1R5G5B5,
    B4G4R4A4,
    Bc1,
    Bc2,
    Bc3,
    R8G8Snorm,
    R8G8B8A8Snorm,
    A2R10G10B10,
    R16G16,
    R16G16B16A16,
    R8,
    R32Sfloat,
    R32G32Sfloat,
    R32G32B32A32Sfloat,
    R16Sfloat,
    R16G16Sfloat,
    R16G16B16A16Sfloat,
    D16Unorm,
    D32Sfloat,
    D16UnormS8Uint,
    D32SfloatS8Uint,
}

impl TextureFormat {
    pub(crate) fn to_vk(&self) -> vk::Format {
        match self {
            TextureFormat::R8G8B8A8 => vk::Format::R8G8B8A8_UNORM,
            TextureFormat::B8G8R8A8 => vk::Format::B8G8R8A8_UNORM,
            TextureFormat::R5G6B5 => vk::Format::R5G6B5_UNORM_PACK16,
            TextureFormat::A1R5G5B5 => vk::Format::A1R5G5B5_UNORM_PACK16,
            TextureFormat::B4G4R4A4 => vk::Format::B4G4R4A4_UNORM_PACK16,
            TextureFormat::Bc1 => vk::Format::BC1_RGBA_UNORM_BLOCK,
            TextureFormat::Bc2 => vk::Format::BC2_UNORM_BLOCK,
            TextureFormat::Bc3 => vk::Format::BC3_UNORM_BLOCK,
            TextureFormat::R8G8Snorm => vk::Format::R8G8_SNORM,
            TextureFormat::R8G8B8A8Snorm => vk::Format::R8G8B8A8_SNORM,
            TextureFormat::A2R10G10B10 => vk::Format::A2R10G10B10_UNORM_PACK32,
            TextureFormat::R16G16 => vk::Format::R16G16_UNORM,
            TextureFormat::R16G16B16A16 => vk::Format::R16G16B16A16_UNORM,
            TextureFormat::R8 => vk::Format::R8_UNORM,
            TextureFormat::R32Sfloat => vk::Format::R32_SFLOAT,
            TextureFormat::R32G32Sfloat => vk::Format::R32G32_SFLOAT,
            TextureFormat::R32G32B32A32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
            TextureFormat::R16Sfloat => vk::Format::R16_SFLOAT,
            TextureFormat::R16G16Sfloat => vk::Format::R16G16_SFLOAT,
            TextureFormat::R16G16B16A16Sfloat => vk::Format::R16G16B16A16_SFLOAT,
            TextureFormat::D16Unorm => vk::Format::D16_UNORM,
            TextureFormat::D32Sfloat => vk::Format::D32_SFLOAT,
            TextureFormat::D16UnormS8Uint => vk::Format::D16_UNORM_S8_UINT,
            TextureFormat::D32SfloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
        }
    }

    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::D16Unorm
                | TextureFormat::D32Sfloat
                | TextureFormat::D16UnormS8Uint
                | TextureFormat::D32SfloatS8Uint
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(
            self,
            TextureFormat::D16UnormS8Uint | TextureFormat::D32SfloatS8Uint
        )
    }

    pub(crate) fn aspect_mask(&self) -> vk::ImageAspectFlags {
        if self.has_stencil() {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else if self.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }

    fn is_block_compressed(&self) -> bool {
        matches!(
            self,
            TextureFormat::Bc1 | TextureFormat::Bc2 | TextureFormat::Bc3
        )
    }

    /// Size of one texel, or of one 4x4 block for compressed formats
    pub fn texel_size(&self) -> u32 {
        match self {
            TextureFormat::Bc1 => 8,
            TextureFormat::Bc2 | TextureFormat::Bc3 => 16,
            TextureFormat::R8 => 1,
            TextureFormat::R5G6B5
            | TextureFormat::A1R5G5B5
            | TextureFormat::B4G4R4A4
            | TextureFormat::R16Sfloat
            | TextureFormat::R8G8Snorm
            | TextureFormat::D16Unorm => 2,
            TextureFormat::D16UnormS8Uint => 3,
            TextureFormat::R8G8B8A8
            | TextureFormat::B8G8R8A8
            | TextureFormat::R32Sfloat
            | TextureFormat::R16G16
            | TextureFormat::R16G16Sfloat
            | TextureFormat::R8G8B8A8Snorm
            | TextureFormat::A2R10G10B10
            | TextureFormat::D32Sfloat
            | TextureFormat::D32SfloatS8Uint => 4,
            TextureFormat::R16G16B16A16Sfloat
            | TextureFormat::R16G16B16A16
            | TextureFormat::R32G32Sfloat => 8,
            TextureFormat::R32G32B32A32Sfloat => 16,
        }
    }

    /// Bytes in one row of an image of width `width` in this format
    pub fn bytes_per_row(&self, width: u32) -> u32 {
        let blocks_per_row = if self.is_block_compressed() {
            (width + 3) / 4
        } else {
            width
        };

        blocks_per_row * self.texel_size()
    }

    /// Bytes in one `width`x`height` subresource in this format
    pub fn bytes_per_image(&self, width: u32, height: u32) -> u32 {
        let blocks_per_column = if self.is_block_compressed() {
            (height + 3) / 4
        } else {
            height
        };

        self.bytes_per_row(width) * blocks_per_column
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SampleCount {
    One,
    Two,
    Four,
    Eight,
    Sixteen,
    ThirtyTwo,
    SixtyFour,
}

impl SampleCount {
    pub(crate) fn to_vk(&self) -> vk::SampleCountFlags {
        match self {
            SampleCount::One => vk::SampleCountFlags::TYPE_1,
            SampleCount::Two => vk::SampleCountFlags::TYPE_2,
            SampleCount::Four => vk::SampleCountFlags::TYPE_4,
            SampleCount::Eight => vk::SampleCountFlags::TYPE_8,
            SampleCount::Sixteen => vk::SampleCountFlags::TYPE_16,
            SampleCount::ThirtyTwo => vk::SampleCountFlags::TYPE_32,
            SampleCount::SixtyFour => vk::SampleCountFlags::TYPE_64,
        }
    }

    /// Clamp to the strongest count the device can actually do
    pub(crate) fn to_vk_clamped(&self, supported: vk::SampleCountFlags) -> vk::SampleCountFlags {
        let mut raw = self.to_vk().as_raw();
        while raw > 1 && supported.as_raw() & raw == 0 {
            raw >>= 1;
        }

        vk::SampleCountFlags::from_raw(raw)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CubeMapFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VertexElementFormat {
    Single,
    Vector2,
    Vector3,
    Vector4,
    Color,
    Byte4,
    Short2,
    Short4,
    NormalizedShort2,
    NormalizedShort4,
    HalfVector2,
    HalfVector4,
}

impl VertexElementFormat {
    pub(crate) fn to_vk(&self) -> vk::Format {
        match self {
            VertexElementFormat::Single => vk::Format::R32_SFLOAT,
            VertexElementFormat::Vector2 => vk::Format::R32G32_SFLOAT,
            VertexElementFormat::Vector3 => vk::Format::R32G32B32_SFLOAT,
            VertexElementFormat::Vector4 => vk::Format::R32G32B32A32_SFLOAT,
            VertexElementFormat::Color => vk::Format::R8G8B8A8_UNORM,
            VertexElementFormat::Byte4 => vk::Format::R8G8B8A8_UINT,
            VertexElementFormat::Short2 => vk::Format::R16G16_SINT,
            VertexElementFormat::Short4 => vk::Format::R16G16B16A16_SINT,
            VertexElementFormat::NormalizedShort2 => vk::Format::R16G16_SNORM,
            VertexElementFormat::NormalizedShort4 => vk::Format::R16G16B16A16_SNORM,
            VertexElementFormat::HalfVector2 => vk::Format::R16G16_SFLOAT,
            VertexElementFormat::HalfVector4 => vk::Format::R16G16B16A16_SFLOAT,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

impl VertexInputRate {
    pub(crate) fn to_vk(&self) -> vk::VertexInputRate {
        match self {
            VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
            VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FillMode {
    Fill,
    Line,
}

impl FillMode {
    pub(crate) fn to_vk(&self) -> vk::PolygonMode {
        match self {
            FillMode::Fill => vk::PolygonMode::FILL,
            FillMode::Line => vk::PolygonMode::LINE,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

impl CullMode {
    pub(crate) fn to_vk(&self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrontFace {
    CounterClockwise,
    Clockwise,
}

impl FrontFace {
    pub(crate) fn to_vk(&self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

impl CompareOp {
    pub(crate) fn to_vk(&self) -> vk::CompareOp {
        match self {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
            CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementAndClamp,
    DecrementAndClamp,
    Invert,
    IncrementAndWrap,
    DecrementAndWrap,
}

impl StencilOp {
    pub(crate) fn to_vk(&self) -> vk::StencilOp {
        match self {
            StencilOp::Keep => vk::StencilOp::KEEP,
            StencilOp::Zero => vk::StencilOp::ZERO,
            StencilOp::Replace => vk::StencilOp::REPLACE,
            StencilOp::IncrementAndClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
            StencilOp::DecrementAndClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
            StencilOp::Invert => vk::StencilOp::INVERT,
            StencilOp::IncrementAndWrap => vk::StencilOp::INCREMENT_AND_WRAP,
            StencilOp::DecrementAndWrap => vk::StencilOp::DECREMENT_AND_WRAP,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

impl BlendOp {
    pub(crate) fn to_vk(&self) -> vk::BlendOp {
        match self {
            BlendOp::Add => vk::BlendOp::ADD,
            BlendOp::Subtract => vk::BlendOp::SUBTRACT,
            BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
            BlendOp::Min => vk::BlendOp::MIN,
            BlendOp::Max => vk::BlendOp::MAX,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    SrcAlphaSaturate,
    Src1Color,
    OneMinusSrc1Color,
    Src1Alpha,
    OneMinusSrc1Alpha,
}

impl BlendFactor {
    pub(crate) fn to_vk(&self) -> vk::BlendFactor {
        match self {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
            BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
            BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
            BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
            BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
            BlendFactor::ConstantColor => vk::BlendFactor::CONSTANT_COLOR,
            BlendFactor::OneMinusConstantColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
            BlendFactor::SrcAlphaSaturate => vk::BlendFactor::SRC_ALPHA_SATURATE,
            BlendFactor::Src1Color => vk::BlendFactor::SRC1_COLOR,
            BlendFactor::OneMinusSrc1Color => vk::BlendFactor::ONE_MINUS_SRC1_COLOR,
            BlendFactor::Src1Alpha => vk::BlendFactor::SRC1_ALPHA,
            BlendFactor::OneMinusSrc1Alpha => vk::BlendFactor::ONE_MINUS_SRC1_ALPHA,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

impl Filter {
    pub(crate) fn to_vk(&self) -> vk::Filter {
        match self {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SamplerMipmapMode {
    Nearest,
    Linear,
}

impl SamplerMipmapMode {
    pub(crate) fn to_vk(&self) -> vk::SamplerMipmapMode {
        match self {
            SamplerMipmapMode::Nearest => vk::SamplerMipmapMode::NEAREST,
            SamplerMipmapMode::Linear => vk::SamplerMipmapMode::LINEAR,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SamplerAddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

impl SamplerAddressMode {
    pub(crate) fn to_vk(&self) -> vk::SamplerAddressMode {
        match self {
            SamplerAddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
            SamplerAddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
            SamplerAddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            SamplerAddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BorderColor {
    FloatTransparentBlack,
    IntTransparentBlack,
    FloatOpaqueBlack,
    IntOpaqueBlack,
    FloatOpaqueWhite,
    IntOpaqueWhite,
}

impl BorderColor {
    pub(crate) fn to_vk(&self) -> vk::BorderColor {
        match self {
            BorderColor::FloatTransparentBlack => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
            BorderColor::IntTransparentBlack => vk::BorderColor::INT_TRANSPARENT_BLACK,
            BorderColor::FloatOpaqueBlack => vk::BorderColor::FLOAT_OPAQUE_BLACK,
            BorderColor::IntOpaqueBlack => vk::BorderColor::INT_OPAQUE_BLACK,
            BorderColor::FloatOpaqueWhite => vk::BorderColor::FLOAT_OPAQUE_WHITE,
            BorderColor::IntOpaqueWhite => vk::BorderColor::INT_OPAQUE_WHITE,
        }
    }
}

bitflags::bitflags! {
    /// Roles a buffer can serve in the pipeline. The flags also pick
    /// the buffer's resting access kind between passes.
    pub struct BufferUsage: u32 {
        const VERTEX   = 0x0000_0001;
        const INDEX    = 0x0000_0002;
        const COMPUTE  = 0x0000_0004;
        const INDIRECT = 0x0000_0008;
    }
}

impl BufferUsage {
    pub(crate) fn to_vk(&self) -> vk::BufferUsageFlags {
        // every buffer can be a staging target so Set/GetBufferData work
        let mut flags = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;

        if self.contains(BufferUsage::VERTEX) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(BufferUsage::INDEX) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(BufferUsage::COMPUTE) {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if self.contains(BufferUsage::INDIRECT) {
            flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
        }

        flags
    }
}

bitflags::bitflags! {
    pub struct TextureUsage: u32 {
        const SAMPLER              = 0x0000_0001;
        const COLOR_TARGET         = 0x0000_0002;
        const DEPTH_STENCIL_TARGET = 0x0000_0004;
        const COMPUTE              = 0x0000_0008;
    }
}

impl TextureUsage {
    pub(crate) fn to_vk(&self) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;

        if self.contains(TextureUsage::SAMPLER) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(TextureUsage::COLOR_TARGET) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(TextureUsage::DEPTH_STENCIL_TARGET) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if self.contains(TextureUsage::COMPUTE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }

        flags
    }
}

bitflags::bitflags! {
    pub struct ColorComponentFlags: u32 {
        const R = 0x0000_0001;
        const G = 0x0000_0002;
        const B = 0x0000_0004;
        const A = 0x0000_0008;
    }
}

impl ColorComponentFlags {
    pub(crate) fn to_vk(&self) -> vk::ColorComponentFlags {
        let mut flags = vk::ColorComponentFlags::empty();

        if self.contains(ColorComponentFlags::R) {
            flags |= vk::ColorComponentFlags::R;
        }
        if self.contains(ColorComponentFlags::G) {
            flags |= vk::ColorComponentFlags::G;
        }
        if self.contains(ColorComponentFlags::B) {
            flags |= vk::ColorComponentFlags::B;
        }
        if self.contains(ColorComponentFlags::A) {
            flags |= vk::ColorComponentFlags::A;
        }

        flags
    }
}

bitflags::bitflags! {
    /// Selects which aspects a mid-pass clear touches
    pub struct ClearOptions: u32 {
        const COLOR   = 0x0000_0001;
        const DEPTH   = 0x0000_0002;
        const STENCIL = 0x0000_0004;
    }
}

/// An integer rectangle in pixels
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct Vec4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Vec4 {
    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub(crate) fn to_array(&self) -> [f32; 4] {
        [self.x, self.y, self.z, self.w]
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct DepthStencilValue {
    pub depth: f32,
    pub stencil: u32,
}

/// One subresource rectangle of a texture
///
/// `depth` is nonzero only for 3D textures, `layer` only for cubes.
#[derive(Clone)]
pub struct TextureSlice {
    pub texture: Texture,
    pub rectangle: Rect,
    pub depth: u32,
    pub layer: u32,
    pub level: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct SamplerCreateInfo {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub mipmap_mode: SamplerMipmapMode,
    pub address_mode_u: SamplerAddressMode,
    pub address_mode_v: SamplerAddressMode,
    pub address_mode_w: SamplerAddressMode,
    pub mip_lod_bias: f32,
    pub anisotropy_enable: bool,
    pub max_anisotropy: f32,
    pub compare_enable: bool,
    pub compare_op: CompareOp,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: BorderColor,
}

#[derive(Copy, Clone, Debug)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

#[derive(Copy, Clone, Debug)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: VertexElementFormat,
    pub offset: u32,
}

#[derive(Clone, Debug, Default)]
pub struct VertexInputState {
    pub bindings: Vec<VertexBinding>,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Copy, Clone, Debug)]
pub struct StencilOpState {
    pub fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub compare_op: CompareOp,
    pub compare_mask: u32,
    pub write_mask: u32,
    pub reference: u32,
}

impl StencilOpState {
    pub(crate) fn to_vk(&self) -> vk::StencilOpState {
        vk::StencilOpState {
            fail_op: self.fail_op.to_vk(),
            pass_op: self.pass_op.to_vk(),
            depth_fail_op: self.depth_fail_op.to_vk(),
            compare_op: self.compare_op.to_vk(),
            compare_mask: self.compare_mask,
            write_mask: self.write_mask,
            reference: self.reference,
        }
    }
}

impl Default for StencilOpState {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            compare_op: CompareOp::Always,
            compare_mask: 0,
            write_mask: 0,
            reference: 0,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ColorAttachmentBlendState {
    pub blend_enable: bool,
    pub src_color_blend_factor: BlendFactor,
    pub dst_color_blend_factor: BlendFactor,
    pub color_blend_op: BlendOp,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
    pub alpha_blend_op: BlendOp,
    pub color_write_mask: ColorComponentFlags,
}

impl Default for ColorAttachmentBlendState {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_blend_factor: BlendFactor::One,
            dst_color_blend_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
            color_write_mask: ColorComponentFlags::all(),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct TextureCreateInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub is_cube: bool,
    pub sample_count: SampleCount,
    pub level_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

/// Per-stage shader info for a graphics pipeline
///
/// `uniform_buffer_size` is the size of the stage's uniform block as
/// written in the shader; the layer rounds it up to the device's
/// minimum dynamic-offset alignment.
#[derive(Clone)]
pub struct GraphicsShaderInfo {
    pub shader_module: ShaderModule,
    pub entry_point: String,
    pub uniform_buffer_size: u64,
    pub sampler_binding_count: u32,
}

#[derive(Clone)]
pub struct ComputeShaderInfo {
    pub shader_module: ShaderModule,
    pub entry_point: String,
    pub uniform_buffer_size: u64,
    pub buffer_binding_count: u32,
    pub image_binding_count: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct RasterizerState {
    pub depth_clamp_enable: bool,
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_bias_enable: bool,
    pub depth_bias_constant_factor: f32,
    pub depth_bias_clamp: f32,
    pub depth_bias_slope_factor: f32,
    pub line_width: f32,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            depth_clamp_enable: false,
            fill_mode: FillMode::Fill,
            cull_mode: CullMode::None,
            front_face: FrontFace::CounterClockwise,
            depth_bias_enable: false,
            depth_bias_constant_factor: 0.0,
            depth_bias_clamp: 0.0,
            depth_bias_slope_factor: 0.0,
            line_width: 1.0,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct MultisampleState {
    pub sample_count: SampleCount,
    pub sample_mask: u32,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self {
            sample_count: SampleCount::One,
            sample_mask: !0,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DepthStencilState {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub compare_op: CompareOp,
    pub depth_bounds_test_enable: bool,
    pub stencil_test_enable: bool,
    pub front_stencil_state: StencilOpState,
    pub back_stencil_state: StencilOpState,
    pub min_depth_bounds: f32,
    pub max_depth_bounds: f32,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test_enable: false,
            depth_write_enable: false,
            compare_op: CompareOp::Always,
            depth_bounds_test_enable: false,
            stencil_test_enable: false,
            front_stencil_state: StencilOpState::default(),
            back_stencil_state: StencilOpState::default(),
            min_depth_bounds: 0.0,
            max_depth_bounds: 1.0,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ColorAttachmentDescription {
    pub format: TextureFormat,
    pub sample_count: SampleCount,
    pub blend_state: ColorAttachmentBlendState,
}

#[derive(Clone, Debug, Default)]
pub struct GraphicsPipelineAttachmentInfo {
    pub color_attachment_descriptions: Vec<ColorAttachmentDescription>,
    pub has_depth_stencil_attachment: bool,
    pub depth_stencil_format: Option<TextureFormat>,
}

#[derive(Clone)]
pub struct GraphicsPipelineCreateInfo {
    pub vertex_shader_info: GraphicsShaderInfo,
    pub fragment_shader_info: GraphicsShaderInfo,
    pub vertex_input_state: VertexInputState,
    pub primitive_type: PrimitiveType,
    pub rasterizer_state: RasterizerState,
    pub multisample_state: MultisampleState,
    pub depth_stencil_state: DepthStencilState,
    pub attachment_info: GraphicsPipelineAttachmentInfo,
    pub blend_constants: [f32; 4],
}

/// One color attachment for begin_render_pass
#[derive(Clone)]
pub struct ColorAttachmentInfo {
    pub texture: Texture,
    pub depth: u32,
    pub layer: u32,
    pub level: u32,
    pub sample_count: SampleCount,
    pub clear_color: Vec4,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

#[derive(Clone)]
pub struct DepthStencilAttachmentInfo {
    pub texture: Texture,
    pub depth: u32,
    pub layer: u32,
    pub level: u32,
    pub depth_stencil_clear_value: DepthStencilValue,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_counts_expand_to_vertex_counts() {
        assert_eq!(PrimitiveType::TriangleList.vertex_count(4), 12);
        assert_eq!(PrimitiveType::TriangleStrip.vertex_count(4), 6);
        assert_eq!(PrimitiveType::LineList.vertex_count(4), 8);
        assert_eq!(PrimitiveType::LineStrip.vertex_count(4), 5);
        assert_eq!(PrimitiveType::PointList.vertex_count(4), 4);
    }

    #[test]
    fn row_sizes_follow_texel_sizes() {
        assert_eq!(TextureFormat::R8G8B8A8.bytes_per_row(100), 400);
        assert_eq!(TextureFormat::R8.bytes_per_row(100), 100);
        assert_eq!(TextureFormat::R16G16B16A16Sfloat.bytes_per_row(2), 16);
    }

    #[test]
    fn compressed_formats_count_blocks_not_texels() {
        // BC1 is 8 bytes per 4x4 block, partial blocks round up
        assert_eq!(TextureFormat::Bc1.bytes_per_row(8), 16);
        assert_eq!(TextureFormat::Bc1.bytes_per_row(9), 24);
        assert_eq!(TextureFormat::Bc1.bytes_per_image(8, 8), 32);
        assert_eq!(TextureFormat::Bc3.bytes_per_image(4, 4), 16);
    }

    #[test]
    fn depth_formats_know_their_aspects() {
        assert!(TextureFormat::D32Sfloat.is_depth());
        assert!(!TextureFormat::D32Sfloat.has_stencil());
        assert!(TextureFormat::D16UnormS8Uint.has_stencil());
        assert!(!TextureFormat::R8G8B8A8.is_depth());
    }

    #[test]
    fn sample_counts_clamp_to_device_support() {
        let supported = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4;

        assert_eq!(
            SampleCount::Eight.to_vk_clamped(supported),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(
            SampleCount::Four.to_vk_clamped(supported),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(
            SampleCount::One.to_vk_clamped(supported),
            vk::SampleCountFlags::TYPE_1
        );
    }
}
