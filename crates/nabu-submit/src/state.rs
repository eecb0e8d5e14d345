//! Packed render-state bits and their decoded pipeline state.
//!
//! Layout of [`RenderState`]:
//! - bits 0..3: blend mode
//! - bits 3..6: stencil mode
//! - bit 6: wireframe
//! - bit 7: color writes disabled
//! - bit 8: scissor test (dynamic; not part of the pipeline signature)

const BLEND_SHIFT: u32 = 0;
const STENCIL_SHIFT: u32 = 3;
const MODE_MASK: u32 = 0b111;
const WIREFRAME: u32 = 1 << 6;
const COLOR_WRITE_DISABLE: u32 = 1 << 7;
const SCISSOR: u32 = 1 << 8;
const PIPELINE_BITS: u32 = SCISSOR - 1;

/// Blend equation family. All colors are premultiplied.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum BlendMode {
    /// Source replaces destination.
    Replace = 0,
    #[default]
    SrcOver = 1,
    Multiply = 2,
    Screen = 3,
    Additive = 4,
}

impl BlendMode {
    fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits {
            0 => Self::Replace,
            1 => Self::SrcOver,
            2 => Self::Multiply,
            3 => Self::Screen,
            4 => Self::Additive,
            _ => return None,
        })
    }

    /// Blend factors, or `None` when blending is disabled.
    pub fn factors(self) -> Option<BlendFactors> {
        let over_alpha = BlendComponent::new(BlendFactor::One, BlendFactor::OneMinusSrcAlpha);
        let color = match self {
            Self::Replace => return None,
            Self::SrcOver => over_alpha,
            Self::Multiply => BlendComponent::new(BlendFactor::DstColor, BlendFactor::OneMinusSrcAlpha),
            Self::Screen => BlendComponent::new(BlendFactor::One, BlendFactor::OneMinusSrcColor),
            Self::Additive => BlendComponent::new(BlendFactor::One, BlendFactor::One),
        };
        Some(BlendFactors {
            color,
            alpha: over_alpha,
        })
    }
}

/// Stencil usage for a draw. Reference values come from the batch.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum StencilMode {
    #[default]
    Disabled = 0,
    /// Pass where stencil equals the reference.
    EqualKeep = 1,
    /// Increment where stencil equals the reference (push a clip level).
    EqualIncrement = 2,
    /// Decrement where stencil equals the reference (pop a clip level).
    EqualDecrement = 3,
    /// Unconditionally zero the stencil.
    Clear = 4,
}

impl StencilMode {
    fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits {
            0 => Self::Disabled,
            1 => Self::EqualKeep,
            2 => Self::EqualIncrement,
            3 => Self::EqualDecrement,
            4 => Self::Clear,
            _ => return None,
        })
    }

    #[inline]
    pub fn is_enabled(self) -> bool {
        self != Self::Disabled
    }

    pub fn ops(self) -> Option<StencilOps> {
        let (compare, pass) = match self {
            Self::Disabled => return None,
            Self::EqualKeep => (CompareOp::Equal, StencilOp::Keep),
            Self::EqualIncrement => (CompareOp::Equal, StencilOp::IncrementClamp),
            Self::EqualDecrement => (CompareOp::Equal, StencilOp::DecrementClamp),
            Self::Clear => (CompareOp::Always, StencilOp::Zero),
        };
        Some(StencilOps {
            compare,
            pass,
            fail: StencilOp::Keep,
            depth_fail: StencilOp::Keep,
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusSrcColor,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BlendComponent {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendComponent {
    #[inline]
    const fn new(src: BlendFactor, dst: BlendFactor) -> Self {
        Self { src, dst }
    }
}

/// Additive blend equation per channel group.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BlendFactors {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CompareOp {
    Always,
    Equal,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    IncrementClamp,
    DecrementClamp,
}

/// Same ops for front and back faces.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct StencilOps {
    pub compare: CompareOp,
    pub pass: StencilOp,
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FillMode {
    Solid,
    Wireframe,
}

/// Compact per-batch render state.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct RenderState(u32);

impl Default for RenderState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderState")
            .field("blend", &self.blend())
            .field("stencil", &self.stencil())
            .field("wireframe", &self.wireframe())
            .field("color_write", &self.color_write())
            .field("scissor", &self.scissor())
            .finish()
    }
}

impl RenderState {
    /// Source-over blending, no stencil, color writes on.
    #[inline]
    pub const fn new() -> Self {
        Self((BlendMode::SrcOver as u32) << BLEND_SHIFT)
    }

    /// Validates externally packed bits.
    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits & !(PIPELINE_BITS | SCISSOR) != 0 {
            return None;
        }
        BlendMode::from_bits((bits >> BLEND_SHIFT) & MODE_MASK)?;
        StencilMode::from_bits((bits >> STENCIL_SHIFT) & MODE_MASK)?;
        Some(Self(bits))
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Bits that select a pipeline. Scissor is dynamic state and is masked out.
    #[inline]
    pub fn pipeline_bits(self) -> u32 {
        self.0 & PIPELINE_BITS
    }

    #[inline]
    pub fn with_blend(self, mode: BlendMode) -> Self {
        Self((self.0 & !(MODE_MASK << BLEND_SHIFT)) | ((mode as u32) << BLEND_SHIFT))
    }

    #[inline]
    pub fn with_stencil(self, mode: StencilMode) -> Self {
        Self((self.0 & !(MODE_MASK << STENCIL_SHIFT)) | ((mode as u32) << STENCIL_SHIFT))
    }

    #[inline]
    pub fn with_wireframe(self, on: bool) -> Self {
        self.with_flag(WIREFRAME, on)
    }

    #[inline]
    pub fn with_color_write(self, on: bool) -> Self {
        self.with_flag(COLOR_WRITE_DISABLE, !on)
    }

    #[inline]
    pub fn with_scissor(self, on: bool) -> Self {
        self.with_flag(SCISSOR, on)
    }

    #[inline]
    fn with_flag(self, flag: u32, on: bool) -> Self {
        if on { Self(self.0 | flag) } else { Self(self.0 & !flag) }
    }

    #[inline]
    pub fn blend(self) -> BlendMode {
        BlendMode::from_bits((self.0 >> BLEND_SHIFT) & MODE_MASK).unwrap_or_default()
    }

    #[inline]
    pub fn stencil(self) -> StencilMode {
        StencilMode::from_bits((self.0 >> STENCIL_SHIFT) & MODE_MASK).unwrap_or_default()
    }

    #[inline]
    pub fn wireframe(self) -> bool {
        self.0 & WIREFRAME != 0
    }

    #[inline]
    pub fn color_write(self) -> bool {
        self.0 & COLOR_WRITE_DISABLE == 0
    }

    #[inline]
    pub fn scissor(self) -> bool {
        self.0 & SCISSOR != 0
    }

    #[inline]
    pub fn fill_mode(self) -> FillMode {
        if self.wireframe() { FillMode::Wireframe } else { FillMode::Solid }
    }
}
