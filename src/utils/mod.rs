mod helper;
mod json;

pub use helper::*;
pub use json::*;
