//! Application services shared by every entry point (CLI, desktop, protocol
//! servers): the stateless [`ops`] and the stateful [`SkillHost`] that exposes
//! loaded skills as tools and keeps them fresh while they are edited.

mod error;
pub mod host;
pub mod ops;
pub mod schema;
pub mod watch;

pub use error::ServiceError;
pub use host::{ReloadStatus, SkillDirGuard, SkillHost, ToolDescriptor};
pub use schema::InputValidator;
pub use watch::SkillWatcher;
