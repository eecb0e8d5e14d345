/// Sizing and policy knobs for a [`RenderDevice`](crate::RenderDevice).
///
/// Page sizes bound the largest single request of each kind; a request above
/// them is a fatal configuration error.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Vertex ring page size in bytes.
    pub vertex_page_size: u64,

    /// Index ring page size in bytes.
    pub index_page_size: u64,

    /// Uniform ring page size in bytes.
    ///
    /// Every uniform upload takes a whole page, so this should be close to
    /// the largest uniform block.
    pub uniform_page_size: u64,

    /// Texture upload staging page size in bytes.
    ///
    /// Larger uploads are split into row bands; a single padded row must fit.
    pub staging_page_size: u64,

    /// Descriptor sets per pool before the cache rotates pools.
    pub descriptor_pool_capacity: u32,

    /// Poll iterations allowed while waiting for the GPU at shutdown.
    pub shutdown_spin_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vertex_page_size: 512 * 1024,
            index_page_size: 128 * 1024,
            uniform_page_size: 1024,
            staging_page_size: 1024 * 1024,
            descriptor_pool_capacity: 256,
            shutdown_spin_limit: 100_000,
        }
    }
}
