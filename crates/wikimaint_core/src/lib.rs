pub mod autosource;
pub mod batch;
pub mod cleanup;
pub mod config;
pub mod diff;
pub mod download;
pub mod episodes;
pub mod lists;
pub mod mediawiki;
pub mod normalize;
pub mod pagegen;
pub mod rules;
pub mod runtime;
pub mod sections;
pub mod templates;

#[cfg(test)]
mod testing;
