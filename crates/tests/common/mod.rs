//! Shared fixtures for the integration tests: in-memory ISO 9660 and WIM
//! image builders.

#![allow(dead_code)]

pub mod iso;
pub mod wim;
