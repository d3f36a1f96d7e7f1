// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory wire layer (§4.A, §4.B): the ring-buffer primitive and its
// three specializations (request, response, result-set).

pub mod headers;
pub mod request_wire;
pub mod resultset_wire;
pub mod ring;
pub mod response_wire;

pub use headers::{LengthHeader, MessageHeader, ResponseHeader, ResponseType};
pub use request_wire::RequestWire;
pub use resultset_wire::ResultsetArena;
pub use ring::ByteRing;
pub use response_wire::ResponseWire;
