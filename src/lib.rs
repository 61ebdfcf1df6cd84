pub mod app;

pub use app::binaries::manager::BinaryManager;
pub use app::devtools::DevToolDownloader;
pub use app::error::AppError;
pub use app::events::ProgressBus;
pub use app::platform::PlatformTarget;
pub use app::state::AppState;
