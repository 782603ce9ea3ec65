pub mod guard;
pub mod identity;
pub mod retrieval;
pub mod text;

pub use guard::*;
pub use identity::*;
pub use retrieval::*;
pub use text::*;
