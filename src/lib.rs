//! Workspace umbrella crate.
//!
//! Host applications depend on `lexdesk-client` and enable features instead
//! of wiring `core-auth`, `core-runtime` and the desktop bridges one by one.

#[cfg(feature = "desktop-shims")]
pub use core_auth as auth;

#[cfg(feature = "desktop-shims")]
pub use core_runtime as runtime;

#[cfg(any(feature = "desktop-shims", feature = "secure-store"))]
pub use bridge_desktop as desktop;
