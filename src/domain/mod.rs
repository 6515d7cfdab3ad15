pub mod adapters;
pub mod cached_feed;
pub mod feed;
pub mod merger;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod search;
