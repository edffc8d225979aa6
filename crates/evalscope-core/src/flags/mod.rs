//! Flag Scope: declared flag schemas, run-scoped overrides and the
//! application-facing [`AppScope`].

pub mod app;
pub mod schema;
pub mod scope;

pub use app::{create_app_scope, AppScope, AppScopeConfig};
pub use schema::{pick_flags, validate_path, FlagSchema};
pub use scope::{bind_current, current_frame, enter_frame, FlagOverrides, FlagScope, ScopeFrame};
