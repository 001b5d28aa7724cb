mod score;
mod scorer;

pub use score::*;
pub use scorer::*;
