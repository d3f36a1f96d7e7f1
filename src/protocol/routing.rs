// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Core routing commands (§6.4): session shutdown and expiration-timeout
// management. Ride as the service body of a request whose
// `framework_header.service_id == ROUTING_SERVICE_ID`.

use crate::error::{IpcError, Result};
use crate::protocol::envelope::{read_varint, write_varint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    NotSet,
    Graceful,
    Forceful,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateExpirationTime {
    /// Disable the session's idle expiration entirely.
    None,
    /// Refresh the expiration deadline `ms` milliseconds out.
    Some(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingCommand {
    Shutdown(ShutdownKind),
    UpdateExpirationTime(UpdateExpirationTime),
}

const TAG_SHUTDOWN: u8 = 0;
const TAG_UPDATE_EXPIRATION: u8 = 1;

const SHUTDOWN_NOT_SET: u8 = 0;
const SHUTDOWN_GRACEFUL: u8 = 1;
const SHUTDOWN_FORCEFUL: u8 = 2;

impl RoutingCommand {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            RoutingCommand::Shutdown(kind) => {
                buf.push(TAG_SHUTDOWN);
                buf.push(match kind {
                    ShutdownKind::NotSet => SHUTDOWN_NOT_SET,
                    ShutdownKind::Graceful => SHUTDOWN_GRACEFUL,
                    ShutdownKind::Forceful => SHUTDOWN_FORCEFUL,
                });
            }
            RoutingCommand::UpdateExpirationTime(UpdateExpirationTime::None) => {
                buf.push(TAG_UPDATE_EXPIRATION);
                buf.push(0);
            }
            RoutingCommand::UpdateExpirationTime(UpdateExpirationTime::Some(ms)) => {
                buf.push(TAG_UPDATE_EXPIRATION);
                buf.push(1);
                write_varint(&mut buf, *ms);
            }
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let tag = *buf
            .get(pos)
            .ok_or_else(|| IpcError::UnsupportedCommand("empty routing command".to_owned()))?;
        pos += 1;
        match tag {
            TAG_SHUTDOWN => {
                let kind = match buf.get(pos) {
                    Some(&SHUTDOWN_NOT_SET) => ShutdownKind::NotSet,
                    Some(&SHUTDOWN_GRACEFUL) => ShutdownKind::Graceful,
                    Some(&SHUTDOWN_FORCEFUL) => ShutdownKind::Forceful,
                    _ => {
                        return Err(IpcError::MalformedRequest(
                            "unknown shutdown kind".to_owned(),
                        ))
                    }
                };
                Ok(RoutingCommand::Shutdown(kind))
            }
            TAG_UPDATE_EXPIRATION => {
                let has_value = *buf.get(pos).ok_or_else(|| {
                    IpcError::MalformedRequest("truncated update_expiration_time".to_owned())
                })?;
                pos += 1;
                if has_value == 0 {
                    Ok(RoutingCommand::UpdateExpirationTime(
                        UpdateExpirationTime::None,
                    ))
                } else {
                    let ms = read_varint(buf, &mut pos)?;
                    Ok(RoutingCommand::UpdateExpirationTime(
                        UpdateExpirationTime::Some(ms),
                    ))
                }
            }
            other => Err(IpcError::UnsupportedCommand(format!(
                "unknown routing command tag {other}"
            ))),
        }
    }
}
