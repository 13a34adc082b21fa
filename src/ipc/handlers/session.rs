use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_caller, str_param};
use crate::ipc::types::{AppState, Request};
use crate::roles;
use rusqlite::OptionalExtension;
use serde_json::json;

const MIN_PASSWORD_LEN: usize = 6;

fn handle_sign_up(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let email = match str_param(req, "email").map(|e| e.trim().to_string()) {
        Some(e) if !e.is_empty() => e,
        _ => return err(&req.id, "bad_params", "missing email", None),
    };
    let password = match str_param(req, "password") {
        Some(p) => p,
        None => return err(&req.id, "bad_params", "missing password", None),
    };
    if password.len() < MIN_PASSWORD_LEN {
        return err(
            &req.id,
            "bad_params",
            format!("password must be at least {} characters", MIN_PASSWORD_LEN),
            None,
        );
    }
    let full_name = str_param(req, "fullName");

    match auth::email_exists(conn, &email) {
        Ok(true) => return err(&req.id, "email_taken", "email is already registered", None),
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match auth::create_account(conn, &email, &password, full_name.as_deref()) {
        Ok(user_id) => ok(&req.id, json!({ "userId": user_id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_sign_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (Some(email), Some(password)) = (str_param(req, "email"), str_param(req, "password"))
    else {
        return err(&req.id, "bad_params", "missing email or password", None);
    };

    let account_id = match auth::verify_password(conn, email.trim(), &password) {
        Ok(Some(id)) => id,
        Ok(None) => return err(&req.id, "unauthorized", "invalid email or password", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match auth::create_session(conn, &account_id) {
        Ok(token) => ok(
            &req.id,
            json!({ "accessToken": token, "userId": account_id }),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(token) = str_param(req, "accessToken") else {
        return err(&req.id, "bad_params", "missing accessToken", None);
    };

    match auth::revoke_session(conn, &token) {
        Ok(revoked) => ok(&req.id, json!({ "revoked": revoked })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_get_user(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let profile: Option<(Option<String>, Option<String>)> = match conn
        .query_row(
            "SELECT full_name, managed_by FROM accounts WHERE id = ?",
            [&caller.id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((full_name, managed_by)) = profile else {
        return err(&req.id, "not_found", "account not found", None);
    };

    let labels = match roles::roles_of(conn, &caller.id) {
        Ok(held) => held.iter().map(|r| r.label()).collect::<Vec<_>>(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "user": {
                "id": caller.id,
                "email": caller.email,
                "fullName": full_name,
                "managedBy": managed_by,
                "roles": labels
            }
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.signUp" => Some(handle_sign_up(state, req)),
        "auth.signIn" => Some(handle_sign_in(state, req)),
        "auth.signOut" => Some(handle_sign_out(state, req)),
        "auth.getUser" => Some(handle_get_user(state, req)),
        _ => None,
    }
}
