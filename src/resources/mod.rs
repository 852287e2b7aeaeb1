//! Resource Manager (§4.4): owns per-issue workspaces and per-(issue,phase)
//! multiplexer windows.

pub mod window;
pub mod workspace;

pub use window::{parse_window_name, WindowManager, WindowRecord};
pub use workspace::WorkspaceManager;
