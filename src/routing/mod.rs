mod decision;
mod router;

pub use decision::*;
pub use router::*;
