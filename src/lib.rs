pub mod app;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod extract;
pub mod h5;
pub mod h5range;
pub mod inspect;
pub mod mapping;
pub mod meta;
pub mod normalize;
pub mod output;
pub mod query;
pub mod range;
pub mod schema;
pub mod source;
pub mod table;
