//! sppilot-core - Core library for the sppilot CLI
//!
//! This library provides app-only access to SharePoint sites: configuration
//! management, client-credentials authentication, recursive folder listing,
//! and downloading or copying files to a local directory.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod site;
pub mod transport;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use auth::{AccessToken, DEFAULT_TOKEN_ENDPOINT};
pub use client::{ClientOptions, SharePointClient};
pub use config::{
    config_exists, get_config_path, load_config, load_config_from, save_config, save_config_to,
    validate_config,
};
pub use config::{AdvancedConfig, Config, ConfigFile, LoggingConfig, SiteConfig};
pub use error::{Error, Result};
pub use models::{
    CopiedFile, CopyFailure, CopyReport, CopySpec, ListOptions, RemoteFileEntry, SkipReason,
    SkippedFile,
};
pub use site::SiteCredentials;
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
