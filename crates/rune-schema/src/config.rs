use crate::types::{EnclaveType, LogLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const ANNOTATION_TYPE: &str = "enclave.type";
pub const ANNOTATION_PATH: &str = "enclave.runtime.path";
pub const ANNOTATION_ARGS: &str = "enclave.runtime.args";
pub const ANNOTATION_LOG_LEVEL: &str = "enclave.runtime.loglevel";

pub const DEFAULT_SGX_DEVICES: &[&str] = &["/dev/sgx_enclave", "/dev/sgx/enclave", "/dev/isgx"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read enclave config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse enclave config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("enclave.path must not be empty")]
    EmptyPath,
    #[error("unsupported enclave type: '{0}'")]
    UnknownType(String),
    #[error("invalid log level: '{0}' (expected off|error|warn|info|debug|trace)")]
    InvalidLogLevel(String),
    #[error("missing annotation '{0}'")]
    MissingAnnotation(&'static str),
    #[error("native.devices must list at least one device node")]
    NoDevices,
    #[error("native.measurement is not a 64-character hex digest: '{0}'")]
    InvalidMeasurement(String),
}

/// Init configuration for one enclave runtime instance.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnclaveConfig {
    pub enclave: EnclaveSection,
    #[serde(default)]
    pub native: NativeSection,
    #[serde(default)]
    pub pal: PalSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnclaveSection {
    #[serde(rename = "type", default)]
    pub kind: EnclaveType,
    /// Enclave image for the native manager, or the PAL shim executable.
    pub path: String,
    /// Opaque, backend-interpreted argument string.
    #[serde(default)]
    pub args: String,
    #[serde(default)]
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NativeSection {
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,
    /// Expected BLAKE3 digest of the enclave image, checked by `attest`.
    #[serde(default)]
    pub measurement: Option<String>,
}

impl Default for NativeSection {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            measurement: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PalSection {
    /// Highest PAL API version this runtime will talk to. `None` accepts any.
    #[serde(default)]
    pub max_api_version: Option<u32>,
}

fn default_devices() -> Vec<String> {
    DEFAULT_SGX_DEVICES.iter().map(|d| (*d).to_owned()).collect()
}

impl EnclaveConfig {
    /// Config with defaults for everything except the image path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            enclave: EnclaveSection {
                kind: EnclaveType::default(),
                path: path.into(),
                args: String::new(),
                log_level: LogLevel::default(),
            },
            native: NativeSection::default(),
            pal: PalSection::default(),
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.enclave.args = args.into();
        self
    }

    pub fn path(&self) -> &str {
        &self.enclave.path
    }

    pub fn args(&self) -> &str {
        &self.enclave.args
    }

    pub fn log_level(&self) -> LogLevel {
        self.enclave.log_level
    }

    /// Build a config from the annotations of an OCI bundle.
    ///
    /// Only `enclave.runtime.path` is required. Backend sections keep their
    /// defaults since annotations carry no per-backend settings.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let path = annotations
            .get(ANNOTATION_PATH)
            .ok_or(ConfigError::MissingAnnotation(ANNOTATION_PATH))?;

        let mut config = Self::new(path.clone());

        if let Some(kind) = annotations.get(ANNOTATION_TYPE) {
            config.enclave.kind = kind.parse().map_err(ConfigError::UnknownType)?;
        }
        if let Some(args) = annotations.get(ANNOTATION_ARGS) {
            config.enclave.args.clone_from(args);
        }
        if let Some(level) = annotations.get(ANNOTATION_LOG_LEVEL) {
            config.enclave.log_level = level.parse().map_err(ConfigError::InvalidLogLevel)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enclave.path.trim().is_empty() {
            return Err(ConfigError::EmptyPath);
        }
        if self.native.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        if let Some(m) = &self.native.measurement {
            if m.len() != 64 || !m.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ConfigError::InvalidMeasurement(m.clone()));
            }
        }
        Ok(())
    }
}

pub fn parse_config_str(input: &str) -> Result<EnclaveConfig, ConfigError> {
    let config: EnclaveConfig = toml::from_str(input)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<EnclaveConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}
