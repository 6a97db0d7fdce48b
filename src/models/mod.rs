pub mod alert;
pub mod enums;
pub mod filters;
pub mod symptom;
pub mod treatment;

pub use alert::*;
pub use filters::*;
pub use symptom::*;
pub use treatment::*;
