pub mod engine;
pub mod server;

pub use server::{Server, router, start};
