mod code_exec;
mod database;
mod definition;
mod error;
mod filesystem;
mod http_api;
mod rag;
mod registry;
mod result;
mod tool;
mod web_search;

pub use code_exec::*;
pub use database::*;
pub use definition::*;
pub use error::*;
pub use filesystem::*;
pub use http_api::*;
pub use rag::*;
pub use registry::*;
pub use result::*;
pub use tool::*;
pub use web_search::*;
