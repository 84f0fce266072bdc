pub mod engine;
pub mod resolver;
pub mod validate;
