pub mod init;
pub mod mountpoint;
pub mod registry;
pub mod service;
pub mod supervisor;
pub mod unmount;

pub use registry::{MountEntry, MountRegistry, MountState};
pub use service::MountService;
