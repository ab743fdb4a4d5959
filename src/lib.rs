pub mod accessor;
pub mod archive;
pub mod builder;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod package;
pub mod resolver;
pub mod runtime;
pub mod sync;
pub mod transport;
