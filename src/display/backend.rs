use std::fmt;

/// Opaque identifier of a GPU-resident image, stable for the life of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(u64);

impl TextureHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    ClampToEdge,
}

/// Sampling state attached to a texture when it is allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerPolicy {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub wrap_u: Wrap,
    pub wrap_v: Wrap,
}

impl SamplerPolicy {
    /// Nearest minification, linear magnification, clamped on both axes.
    /// Every slot texture uses it.
    pub const FRAME: Self = Self {
        min_filter: Filter::Nearest,
        mag_filter: Filter::Linear,
        wrap_u: Wrap::ClampToEdge,
        wrap_v: Wrap::ClampToEdge,
    };
}

/// The GPU seam the presenter drives.
///
/// Implementations own the actual resources. A handle returned by
/// `allocate` stays valid until `release`, across any number of uploads,
/// including uploads that change the texture dimensions.
pub trait TextureBackend {
    type Error: std::error::Error + Send + Sync + 'static;

    fn allocate(&mut self, label: &str, sampler: SamplerPolicy)
        -> Result<TextureHandle, Self::Error>;

    /// Replace the full contents of `handle` with tightly packed RGB8 rows.
    fn upload(
        &mut self,
        handle: TextureHandle,
        width: u32,
        height: u32,
        rgb: &[u8],
    ) -> Result<(), Self::Error>;

    fn release(&mut self, handle: TextureHandle);
}
