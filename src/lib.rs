//! VEX Hub crawler
//!
//! Collects OpenVEX documents published by upstream projects into a curated
//! hub directory. For every configured package the crawler finds the source
//! repository through the package's registry, takes a shallow snapshot of
//! it, keeps the VEX files under `.vex/` that talk about the package, and
//! records where each file came from. A top-level index lists every
//! harvested package.

pub mod config;
pub mod crawler;
pub mod error;
pub mod fetch;
pub mod git;
pub mod harvest;
pub mod index;
pub mod locators;
pub mod manifest;
pub mod purl;
pub mod source;
pub mod vex;

pub use error::{Context, Error, ErrorKind, Result};
