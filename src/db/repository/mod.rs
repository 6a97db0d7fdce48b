//! Repository layer: user-scoped database operations.
//!
//! Every query takes an explicit `user_id`; nothing here reads ambient state.

mod alert;
mod invalidation;
mod symptom;
mod treatment;
mod user;

// Re-export all public items from sub-modules
pub use alert::*;
pub use invalidation::*;
pub use symptom::*;
pub use treatment::*;
pub use user::*;
