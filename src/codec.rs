//! Length-prefixed binary wire codec.
//!
//! Every frame starts with a one-byte type code. Byte-string fields are
//! encoded as one length byte `L` followed by `L` payload bytes, so the
//! maximum field length is 255. Built on `bytes` rather than hand-rolled
//! slice indexing, the same crate the rest of this codebase already reaches
//! for buffer work.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::GatewayError;

pub const MAX_FIELD_LEN: usize = 255;

pub mod type_codes {
    pub const LIST_USERS: u8 = 1;
    pub const GET_USER: u8 = 2;
    pub const CHANGE_STATUS: u8 = 3;
    pub const SEND_MESSAGE: u8 = 4;
    pub const GET_MESSAGES: u8 = 5;

    pub const ERROR: u8 = 50;
    pub const LISTED_USERS: u8 = 51;
    pub const GOT_USER: u8 = 52;
    pub const REGISTERED_USER: u8 = 53;
    pub const CHANGED_STATUS: u8 = 54;
    pub const GOT_MESSAGE: u8 = 55;
    pub const GOT_MESSAGES: u8 = 56;
}

/// Wire error codes. `UserAlreadyDisconnected` is part of the wire
/// vocabulary but no dispatcher path currently produces it — no request
/// names a transition that would trigger it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UserNotFound = 0,
    InvalidStatus = 1,
    EmptyMessage = 2,
    UserAlreadyDisconnected = 3,
}

impl TryFrom<u8> for ErrorCode {
    type Error = GatewayError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ErrorCode::UserNotFound),
            1 => Ok(ErrorCode::InvalidStatus),
            2 => Ok(ErrorCode::EmptyMessage),
            3 => Ok(ErrorCode::UserAlreadyDisconnected),
            _ => Err(GatewayError::MalformedFrame),
        }
    }
}

/// Presence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected = 0,
    Active = 1,
    Busy = 2,
    Inactive = 3,
}

impl TryFrom<u8> for Status {
    type Error = GatewayError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Status::Disconnected),
            1 => Ok(Status::Active),
            2 => Ok(Status::Busy),
            3 => Ok(Status::Inactive),
            _ => Err(GatewayError::MalformedFrame),
        }
    }
}

/// A decoded inbound (client → server) request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ListUsers,
    GetUser { user: Bytes },
    ChangeStatus { user: Bytes, status: Status },
    SendMessage { peer: Bytes, content: Bytes },
    GetMessages { peer: Bytes },
}

/// An outbound (server → client) response or published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Error(ErrorCode),
    ListedUsers(Vec<(Bytes, Status)>),
    GotUser(Bytes, Status),
    RegisteredUser(Bytes, Status),
    ChangedStatus(Bytes, Status),
    GotMessage { peer: Bytes, content: Bytes },
    GotMessages(Vec<(Bytes, Bytes)>),
}

fn read_u8(buf: &mut &[u8]) -> Result<u8, GatewayError> {
    if !buf.has_remaining() {
        return Err(GatewayError::MalformedFrame);
    }
    Ok(buf.get_u8())
}

fn read_bytestring(buf: &mut &[u8]) -> Result<Bytes, GatewayError> {
    let len = read_u8(buf)? as usize;
    if buf.remaining() < len {
        return Err(GatewayError::MalformedFrame);
    }
    Ok(buf.copy_to_bytes(len))
}

fn write_bytestring(out: &mut BytesMut, s: &[u8]) {
    debug_assert!(s.len() <= MAX_FIELD_LEN, "byte-string field exceeds the single-byte length prefix");
    out.put_u8(s.len() as u8);
    out.put_slice(s);
}

/// Decode a single inbound frame. Fails with `MalformedFrame` if a length
/// prefix would read past the end of `bytes`, or the type code is unknown.
pub fn decode_request(bytes: &[u8]) -> Result<Request, GatewayError> {
    let mut buf = bytes;
    let type_code = read_u8(&mut buf)?;
    match type_code {
        type_codes::LIST_USERS => Ok(Request::ListUsers),
        type_codes::GET_USER => {
            let user = read_bytestring(&mut buf)?;
            Ok(Request::GetUser { user })
        },
        type_codes::CHANGE_STATUS => {
            let user = read_bytestring(&mut buf)?;
            let status = Status::try_from(read_u8(&mut buf)?)?;
            Ok(Request::ChangeStatus { user, status })
        },
        type_codes::SEND_MESSAGE => {
            let peer = read_bytestring(&mut buf)?;
            let content = read_bytestring(&mut buf)?;
            Ok(Request::SendMessage { peer, content })
        },
        type_codes::GET_MESSAGES => {
            let peer = read_bytestring(&mut buf)?;
            Ok(Request::GetMessages { peer })
        },
        _ => Err(GatewayError::MalformedFrame),
    }
}

/// Encode an outbound response/event frame.
pub fn encode_response(resp: &Response) -> BytesMut {
    let mut out = BytesMut::new();
    match resp {
        Response::Error(code) => {
            out.put_u8(type_codes::ERROR);
            out.put_u8(*code as u8);
        },
        Response::ListedUsers(users) => {
            out.put_u8(type_codes::LISTED_USERS);
            out.put_u8(users.len() as u8);
            for (name, status) in users {
                write_bytestring(&mut out, name);
                out.put_u8(*status as u8);
            }
        },
        Response::GotUser(name, status) => {
            out.put_u8(type_codes::GOT_USER);
            write_bytestring(&mut out, name);
            out.put_u8(*status as u8);
        },
        Response::RegisteredUser(name, status) => {
            out.put_u8(type_codes::REGISTERED_USER);
            write_bytestring(&mut out, name);
            out.put_u8(*status as u8);
        },
        Response::ChangedStatus(name, status) => {
            out.put_u8(type_codes::CHANGED_STATUS);
            write_bytestring(&mut out, name);
            out.put_u8(*status as u8);
        },
        Response::GotMessage { peer, content } => {
            out.put_u8(type_codes::GOT_MESSAGE);
            write_bytestring(&mut out, peer);
            write_bytestring(&mut out, content);
        },
        Response::GotMessages(entries) => {
            out.put_u8(type_codes::GOT_MESSAGES);
            out.put_u8(entries.len() as u8);
            for (origin, content) in entries {
                write_bytestring(&mut out, origin);
                write_bytestring(&mut out, content);
            }
        },
    }
    out
}

/// Encode an inbound request. Only used by tests driving the server as a
/// client would; the server itself never needs to produce these.
pub fn encode_request(req: &Request) -> BytesMut {
    let mut out = BytesMut::new();
    match req {
        Request::ListUsers => out.put_u8(type_codes::LIST_USERS),
        Request::GetUser { user } => {
            out.put_u8(type_codes::GET_USER);
            write_bytestring(&mut out, user);
        },
        Request::ChangeStatus { user, status } => {
            out.put_u8(type_codes::CHANGE_STATUS);
            write_bytestring(&mut out, user);
            out.put_u8(*status as u8);
        },
        Request::SendMessage { peer, content } => {
            out.put_u8(type_codes::SEND_MESSAGE);
            write_bytestring(&mut out, peer);
            write_bytestring(&mut out, content);
        },
        Request::GetMessages { peer } => {
            out.put_u8(type_codes::GET_MESSAGES);
            write_bytestring(&mut out, peer);
        },
    }
    out
}

/// Decode a single outbound frame. Only used by tests acting as a client.
pub fn decode_response(bytes: &[u8]) -> Result<Response, GatewayError> {
    let mut buf = bytes;
    let type_code = read_u8(&mut buf)?;
    match type_code {
        type_codes::ERROR => {
            let code = ErrorCode::try_from(read_u8(&mut buf)?)?;
            Ok(Response::Error(code))
        },
        type_codes::LISTED_USERS => {
            let n = read_u8(&mut buf)? as usize;
            let mut users = Vec::with_capacity(n);
            for _ in 0..n {
                let name = read_bytestring(&mut buf)?;
                let status = Status::try_from(read_u8(&mut buf)?)?;
                users.push((name, status));
            }
            Ok(Response::ListedUsers(users))
        },
        type_codes::GOT_USER => {
            let name = read_bytestring(&mut buf)?;
            let status = Status::try_from(read_u8(&mut buf)?)?;
            Ok(Response::GotUser(name, status))
        },
        type_codes::REGISTERED_USER => {
            let name = read_bytestring(&mut buf)?;
            let status = Status::try_from(read_u8(&mut buf)?)?;
            Ok(Response::RegisteredUser(name, status))
        },
        type_codes::CHANGED_STATUS => {
            let name = read_bytestring(&mut buf)?;
            let status = Status::try_from(read_u8(&mut buf)?)?;
            Ok(Response::ChangedStatus(name, status))
        },
        type_codes::GOT_MESSAGE => {
            let peer = read_bytestring(&mut buf)?;
            let content = read_bytestring(&mut buf)?;
            Ok(Response::GotMessage { peer, content })
        },
        type_codes::GOT_MESSAGES => {
            let n = read_u8(&mut buf)? as usize;
            let mut entries = Vec::with_capacity(n);
            for _ in 0..n {
                let origin = read_bytestring(&mut buf)?;
                let content = read_bytestring(&mut buf)?;
                entries.push((origin, content));
            }
            Ok(Response::GotMessages(entries))
        },
        _ => Err(GatewayError::MalformedFrame),
    }
}
