//! Core data models for the package index.
//!
//! A package is a directory of distribution files on disk. These types carry
//! what the index needs to describe them.

pub mod distribution;
pub mod package;
