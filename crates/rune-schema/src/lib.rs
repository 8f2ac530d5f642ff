//! Enclave init configuration for Rune.
//!
//! This crate defines the configuration layer consumed by the enclave runtime:
//! TOML config files (`EnclaveConfig`), the OCI bundle annotations a container
//! runtime receives for enclave workloads, and the small closed enums
//! (`EnclaveType`, `LogLevel`) shared with the runtime crate.

pub mod config;
pub mod types;

pub use config::{
    parse_config_file, parse_config_str, ConfigError, EnclaveConfig, EnclaveSection,
    NativeSection, PalSection, ANNOTATION_ARGS, ANNOTATION_LOG_LEVEL, ANNOTATION_PATH,
    ANNOTATION_TYPE, DEFAULT_SGX_DEVICES,
};
pub use types::{EnclaveType, LogLevel};
