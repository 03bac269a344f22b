//! GPU plumbing: buffers, shader IR, program setups and the renderer cache.

pub mod buffer;
pub mod camera;
pub mod layer_renderer;
pub mod program_variables;
pub mod render_target;
pub mod renderer_cache;
pub mod shader;
pub mod techniques;
