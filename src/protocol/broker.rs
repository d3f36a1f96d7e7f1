// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Endpoint-broker request commands (§6.3): handshake, encryption-key
// exchange, and cancel. These ride as the service body of a request whose
// `framework_header.service_id == BROKER_SERVICE_ID`.

use crate::error::{IpcError, Result};
use crate::protocol::envelope::{read_varint, write_varint};

/// Reserved `service_id` the worker treats as "talk to me, not a service"
/// during handshake and for in-band cancel/admin commands (§4.F).
pub const BROKER_SERVICE_ID: u64 = 0;

/// Reserved `service_id` for the core routing commands (§6.4): shutdown
/// and expiration-time management.
pub const ROUTING_SERVICE_ID: u64 = 1;

#[derive(Debug, Clone)]
pub enum BrokerCommand {
    Handshake {
        connection_label: String,
        application_name: String,
        credential: Option<Vec<u8>>,
    },
    EncryptionKey,
    Cancel { slot: u16 },
}

const TAG_HANDSHAKE: u8 = 0;
const TAG_ENCRYPTION_KEY: u8 = 1;
const TAG_CANCEL: u8 = 2;

impl BrokerCommand {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            BrokerCommand::Handshake {
                connection_label,
                application_name,
                credential,
            } => {
                buf.push(TAG_HANDSHAKE);
                write_len_prefixed(&mut buf, connection_label.as_bytes());
                write_len_prefixed(&mut buf, application_name.as_bytes());
                match credential {
                    Some(bytes) => {
                        buf.push(1);
                        write_len_prefixed(&mut buf, bytes);
                    }
                    None => buf.push(0),
                }
            }
            BrokerCommand::EncryptionKey => buf.push(TAG_ENCRYPTION_KEY),
            BrokerCommand::Cancel { slot } => {
                buf.push(TAG_CANCEL);
                write_varint(&mut buf, *slot as u64);
            }
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let tag = *buf
            .get(pos)
            .ok_or_else(|| IpcError::UnsupportedCommand("empty broker command".to_owned()))?;
        pos += 1;
        match tag {
            TAG_HANDSHAKE => {
                let connection_label =
                    String::from_utf8_lossy(read_len_prefixed(buf, &mut pos)?).into_owned();
                let application_name =
                    String::from_utf8_lossy(read_len_prefixed(buf, &mut pos)?).into_owned();
                let has_credential = *buf
                    .get(pos)
                    .ok_or_else(|| IpcError::MalformedRequest("truncated handshake".to_owned()))?;
                pos += 1;
                let credential = if has_credential != 0 {
                    Some(read_len_prefixed(buf, &mut pos)?.to_vec())
                } else {
                    None
                };
                Ok(BrokerCommand::Handshake {
                    connection_label,
                    application_name,
                    credential,
                })
            }
            TAG_ENCRYPTION_KEY => Ok(BrokerCommand::EncryptionKey),
            TAG_CANCEL => {
                let slot = read_varint(buf, &mut pos)? as u16;
                Ok(BrokerCommand::Cancel { slot })
            }
            other => Err(IpcError::UnsupportedCommand(format!(
                "unknown broker command tag {other}"
            ))),
        }
    }
}

fn write_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn read_len_prefixed<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let len = read_varint(buf, pos)? as usize;
    let end = pos
        .checked_add(len)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| IpcError::MalformedRequest("truncated broker field".to_owned()))?;
    let slice = &buf[*pos..end];
    *pos = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trips() {
        let cmd = BrokerCommand::Handshake {
            connection_label: "session-1".into(),
            application_name: "psql".into(),
            credential: Some(vec![1, 2, 3]),
        };
        let decoded = BrokerCommand::decode(&cmd.encode()).unwrap();
        match decoded {
            BrokerCommand::Handshake {
                connection_label,
                application_name,
                credential,
            } => {
                assert_eq!(connection_label, "session-1");
                assert_eq!(application_name, "psql");
                assert_eq!(credential, Some(vec![1, 2, 3]));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn cancel_round_trips() {
        let cmd = BrokerCommand::Cancel { slot: 7 };
        assert!(matches!(
            BrokerCommand::decode(&cmd.encode()).unwrap(),
            BrokerCommand::Cancel { slot: 7 }
        ));
    }
}
