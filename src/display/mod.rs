pub mod app;
pub mod backend;
pub mod convert;
pub mod gpu;
pub mod headless;
pub mod presenter;

pub use app::FrameDeckApp;
pub use backend::{SamplerPolicy, TextureBackend, TextureHandle};
pub use headless::MemoryBackend;
pub use presenter::{PresentError, Presented, SlotState, TexturePresenter};
