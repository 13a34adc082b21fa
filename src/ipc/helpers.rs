use rusqlite::Connection;

use crate::auth::{self, Caller};
use crate::ipc::error::err;
use crate::ipc::types::Request;
use crate::policy::{self, Action, Decision};

/// Resolves `params.accessToken` to a verified caller, or produces the
/// `unauthorized` response. The verified identity is the only one used for
/// authorization; ids in the request body never are.
pub fn require_caller(conn: &Connection, req: &Request) -> Result<Caller, serde_json::Value> {
    let Some(token) = req.params.get("accessToken").and_then(|v| v.as_str()) else {
        return Err(err(&req.id, "unauthorized", "missing accessToken", None));
    };
    match auth::verify_session(conn, token) {
        Ok(Some(caller)) => Ok(caller),
        Ok(None) => Err(err(&req.id, "unauthorized", "invalid or expired session", None)),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

/// Runs the policy evaluator and turns anything but `Allowed` into a ready
/// error response (`forbidden` for denials, a store error otherwise).
pub fn require_allowed(
    conn: &Connection,
    req: &Request,
    caller: &Caller,
    action: &Action,
) -> Result<(), serde_json::Value> {
    match policy::authorize(conn, caller, action) {
        Ok(Decision::Allowed) => Ok(()),
        Ok(Decision::Forbidden(reason)) => Err(err(&req.id, "forbidden", reason, None)),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

pub fn str_param(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
