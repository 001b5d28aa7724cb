mod chunker;
mod memory;
#[allow(clippy::module_inception)]
mod vectorstore;

pub use chunker::*;
pub use memory::*;
pub use vectorstore::*;
