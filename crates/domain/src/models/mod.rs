//! Domain models.

mod audit;
mod evaluation;
mod flag;
mod overrides;
mod protection;
mod rule;

pub use audit::*;
pub use evaluation::*;
pub use flag::*;
pub use overrides::*;
pub use protection::*;
pub use rule::*;
