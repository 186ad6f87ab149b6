//! wheelsmith-lib: Core types and logic for wheelsmith
//!
//! This crate provides the build-orchestration machinery used by the
//! `wheelsmith` binary:
//! - `container`: lifecycle of isolated Docker build environments
//! - `pipeline`: target enumeration and the build/repair/test sequence
//! - `cross`: the cross-compilation toolchain bootstrap protocol
//! - `report`: failure diagnostics and process exit codes

pub mod consts;
pub mod container;
pub mod cross;
pub mod environment;
pub mod ident;
pub mod log;
pub mod manifest;
pub mod options;
pub mod pipeline;
pub mod platform;
pub mod report;
pub mod select;
pub mod template;
