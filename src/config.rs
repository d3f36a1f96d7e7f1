// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Configuration surface recognized by the IPC endpoint (§6.5). Deserialized
// from YAML; defaults match the sizes and policies stated in §3/§5.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpcEndpointConfig {
    pub database_name: String,
    pub threads: usize,
    pub admin_sessions: u8,
    pub datachannel_buffer_size: usize,
    pub max_datachannel_buffers: usize,
    pub allow_blob_privileged: bool,
    pub request_buffer_size: usize,
    pub response_buffer_size: usize,
}

impl Default for IpcEndpointConfig {
    fn default() -> Self {
        Self {
            database_name: "tateyama".to_owned(),
            threads: 104,
            admin_sessions: 1,
            datachannel_buffer_size: 64 * 1024,
            max_datachannel_buffers: 16,
            allow_blob_privileged: false,
            request_buffer_size: 4 * 1024,
            response_buffer_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub enable_timeout: bool,
    pub refresh_timeout_ms: u64,
    pub max_refresh_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enable_timeout: true,
            refresh_timeout_ms: 5 * 60 * 1000,
            max_refresh_timeout_ms: 24 * 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthenticationConfig {
    pub enabled: bool,
    pub administrators: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    pub ipc_endpoint: IpcEndpointConfig,
    pub session: SessionConfig,
    pub authentication: AuthenticationConfig,
}

impl IpcConfig {
    /// Parse the recognized configuration surface from a YAML document.
    pub fn from_yaml(doc: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(doc)
    }
}
