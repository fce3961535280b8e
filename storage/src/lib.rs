//! Native filesystem layer: entry snapshots, the POSIX ACL codec, principal
//! resolution, permission backends and the tree walker.

pub mod acl;
pub mod backend;
pub mod directory;
pub mod entry;
pub mod error;
#[cfg(unix)]
pub mod posix;
pub mod walk;

pub use backend::{default_backend, PermissionBackend, RemediationPolicy, UnsupportedBackend};
pub use directory::{PrincipalDirectory, StaticDirectory};
#[cfg(unix)]
pub use directory::SystemDirectory;
pub use entry::*;
pub use error::{BackendError, InspectionError, WalkError};
#[cfg(unix)]
pub use posix::PosixBackend;
pub use walk::{NoFilter, PathFilter, TreeWalker, Walk, WalkEntry, WalkEvent};
