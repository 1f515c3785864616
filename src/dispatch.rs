//! Request dispatcher: authenticates every request, enforces the
//! permission table, routes to the sandboxed filesystem or credential-store
//! operation, and assembles the response.

use tracing::info;

use crate::credentials::{CredentialStore, StoreError};
use crate::protocol::request::{Payload, RequestFrame, UserSubflag};
use crate::protocol::response::{ResponseContent, ResponseFrame};
use crate::protocol::{Opcode, Permission, ResultCode};
use crate::sandbox::{self, Home, SandboxError};

pub async fn dispatch(
    store: &CredentialStore,
    home: &Home,
    request: RequestFrame,
) -> ResponseFrame {
    let session_id = request.session_id;
    let opcode = request.opcode;

    let caller = match store.lookup(&request.username, &request.password).await {
        Some(account) => account,
        None => {
            let resp = ResponseFrame::error(ResultCode::UserAuth, session_id);
            info!(?opcode, code = ?resp.result_code, "dispatched");
            return resp;
        }
    };

    let resp = dispatch_authenticated(store, home, caller, opcode, request, session_id).await;
    info!(?opcode, code = ?resp.result_code, "dispatched");
    resp
}

async fn dispatch_authenticated(
    store: &CredentialStore,
    home: &Home,
    caller: crate::credentials::UserAccount,
    opcode: Opcode,
    request: RequestFrame,
    session_id: u32,
) -> ResponseFrame {
    match opcode {
        Opcode::LocalOperation => ResponseFrame::success(session_id, None),

        Opcode::UserOperation => {
            let user_payload = match request.payload {
                Payload::User(p) => p,
                _ => return ResponseFrame::error(ResultCode::Failure, session_id),
            };
            match user_payload.subflag {
                UserSubflag::Create => {
                    if caller.permission < user_payload.permission {
                        return ResponseFrame::error(ResultCode::PermissionError, session_id);
                    }
                    let Some(password) = user_payload.password else {
                        return ResponseFrame::error(ResultCode::Failure, session_id);
                    };
                    match store
                        .create_user(&user_payload.username, &password, user_payload.permission)
                        .await
                    {
                        Ok(()) => ResponseFrame::success(session_id, None),
                        Err(e) => ResponseFrame::error(store_error_code(e), session_id),
                    }
                }
                UserSubflag::Delete => {
                    if caller.permission != Permission::Admin {
                        return ResponseFrame::error(ResultCode::PermissionError, session_id);
                    }
                    match store.remove_user(&user_payload.username).await {
                        Ok(()) => ResponseFrame::success(session_id, None),
                        Err(e) => ResponseFrame::error(store_error_code(e), session_id),
                    }
                }
            }
        }

        Opcode::DeleteRemoteFile => {
            if caller.permission < Permission::ReadWrite {
                return ResponseFrame::error(ResultCode::PermissionError, session_id);
            }
            let Some(path) = std_path(&request.payload) else {
                return ResponseFrame::error(ResultCode::Failure, session_id);
            };
            let vp = match home.resolve_existing(path).await {
                Ok(vp) => vp,
                Err(e) => return ResponseFrame::error(sandbox_error_code(e), session_id),
            };
            match sandbox::delete(&vp).await {
                Ok(()) => ResponseFrame::success(session_id, None),
                Err(e) => ResponseFrame::error(sandbox_error_code(e), session_id),
            }
        }

        Opcode::MakeRemoteDirectory => {
            if caller.permission < Permission::ReadWrite {
                return ResponseFrame::error(ResultCode::PermissionError, session_id);
            }
            let Some(path) = std_path(&request.payload) else {
                return ResponseFrame::error(ResultCode::Failure, session_id);
            };
            let vp = match home.resolve_potential(path).await {
                Ok(vp) => vp,
                Err(e) => return ResponseFrame::error(sandbox_error_code(e), session_id),
            };
            match sandbox::mkdir(&vp).await {
                Ok(()) => ResponseFrame::success(session_id, None),
                Err(SandboxError::AlreadyExists) => {
                    ResponseFrame::error(ResultCode::DirExists, session_id)
                }
                Err(e) => ResponseFrame::error(sandbox_error_code(e), session_id),
            }
        }

        Opcode::PutRemoteFile => {
            if caller.permission < Permission::ReadWrite {
                return ResponseFrame::error(ResultCode::PermissionError, session_id);
            }
            let (path, body) = match request.payload {
                Payload::Std(std) => match std.content {
                    Some((_, bytes)) => (std.path, bytes),
                    None => return ResponseFrame::error(ResultCode::Failure, session_id),
                },
                _ => return ResponseFrame::error(ResultCode::Failure, session_id),
            };
            let vp = match home.resolve_potential(&path).await {
                Ok(vp) => vp,
                Err(e) => return ResponseFrame::error(sandbox_error_code(e), session_id),
            };
            match sandbox::write_all(&vp, &body, true).await {
                Ok(()) => ResponseFrame::success(session_id, None),
                Err(SandboxError::AlreadyExists) => {
                    ResponseFrame::error(ResultCode::FileExists, session_id)
                }
                Err(e) => ResponseFrame::error(sandbox_error_code(e), session_id),
            }
        }

        Opcode::ListRemoteDirectory => {
            let Some(path) = std_path(&request.payload) else {
                return ResponseFrame::error(ResultCode::Failure, session_id);
            };
            let vp = match home.resolve_existing(path).await {
                Ok(vp) => vp,
                Err(e) => return ResponseFrame::error(sandbox_error_code(e), session_id),
            };
            match sandbox::list_dir(&vp).await {
                Ok(content) => ResponseFrame::success(
                    session_id,
                    Some(ResponseContent {
                        digest: content.digest,
                        bytes: content.bytes,
                    }),
                ),
                Err(e) => ResponseFrame::error(sandbox_error_code(e), session_id),
            }
        }

        Opcode::GetRemoteFile => {
            let Some(path) = std_path(&request.payload) else {
                return ResponseFrame::error(ResultCode::Failure, session_id);
            };
            let vp = match home.resolve_existing(path).await {
                Ok(vp) => vp,
                Err(e) => return ResponseFrame::error(sandbox_error_code(e), session_id),
            };
            match sandbox::read_all(&vp).await {
                Ok(content) => ResponseFrame::success(
                    session_id,
                    Some(ResponseContent {
                        digest: content.digest,
                        bytes: content.bytes,
                    }),
                ),
                Err(e) => ResponseFrame::error(sandbox_error_code(e), session_id),
            }
        }
    }
}

fn std_path(payload: &Payload) -> Option<&str> {
    match payload {
        Payload::Std(std) => Some(std.path.as_str()),
        _ => None,
    }
}

fn sandbox_error_code(e: SandboxError) -> ResultCode {
    match e {
        SandboxError::Escape => ResultCode::ResolveError,
        SandboxError::NotDir => ResultCode::PathNotDir,
        SandboxError::NotFile => ResultCode::PathNotFile,
        SandboxError::DirNotEmpty => ResultCode::DirNotEmpty,
        SandboxError::AlreadyExists => ResultCode::FileExists,
        SandboxError::Io(_) => ResultCode::IoError,
    }
}

fn store_error_code(e: StoreError) -> ResultCode {
    match e {
        StoreError::UserExists => ResultCode::UserExists,
        StoreError::UserNoExist => ResultCode::UserNoExist,
        StoreError::CredRuleError => ResultCode::CredRuleError,
        StoreError::Corrupt(_) | StoreError::Io(_) => ResultCode::IoError,
    }
}
