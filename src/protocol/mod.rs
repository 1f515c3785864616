//! Wire protocol: opcodes, permission levels, result codes, and the framed
//! request/response types that ride over them.

pub mod request;
pub mod response;

pub use request::{Payload, RequestFrame, StdPayload, UserPayload, UserSubflag};
pub use response::ResponseFrame;

use num_derive::{FromPrimitive, ToPrimitive};

/// Maximum size in bytes of a single header+message write chunk.
pub const MAX_MSG_SIZE: usize = 2048;
/// Maximum size in bytes of a single file-content write chunk.
pub const MAX_FILE_SIZE: usize = 1016;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Opcode {
    UserOperation = 1,
    DeleteRemoteFile = 2,
    ListRemoteDirectory = 3,
    GetRemoteFile = 4,
    MakeRemoteDirectory = 5,
    PutRemoteFile = 6,
    LocalOperation = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Permission {
    Read = 1,
    ReadWrite = 2,
    Admin = 3,
}

impl Permission {
    pub fn from_digit(digit: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(digit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum ResultCode {
    Success = 1,
    SessionError = 2,
    PermissionError = 3,
    UserExists = 4,
    FileExists = 5,
    CredRuleError = 6,
    UserAuth = 7,
    DirNotEmpty = 8,
    ResolveError = 9,
    PathNotDir = 10,
    PathNotFile = 11,
    DirExists = 12,
    SockClosed = 13,
    UserNoExist = 14,
    IoError = 254,
    Failure = 255,
}

impl ResultCode {
    pub fn message(self) -> &'static str {
        match self {
            ResultCode::Success => "Server action was successful",
            ResultCode::SessionError => "Provided Session ID was invalid or expired",
            ResultCode::PermissionError => "User has insufficient permissions for this action",
            ResultCode::UserExists => "User could not be created because it already exists",
            ResultCode::FileExists => "File could not be created because it already exists",
            ResultCode::CredRuleError => {
                "Username must be 3-20 chars and password 6-32 chars"
            }
            ResultCode::UserAuth => "Either username or password is incorrect",
            ResultCode::DirNotEmpty => "Directory is not empty, cannot remove",
            ResultCode::ResolveError => "Path could not be resolved against the home directory",
            ResultCode::PathNotDir => "Path provided is not of type directory.",
            ResultCode::PathNotFile => "Path provided is not of type regular file.",
            ResultCode::DirExists => "Directory could not be created because it already exists",
            ResultCode::SockClosed => "Network socket is closed by peer",
            ResultCode::UserNoExist => "User could not be removed because they do not exist",
            ResultCode::IoError => "I/O error occurred during the action.",
            ResultCode::Failure => "Server action failed",
        }
    }
}
