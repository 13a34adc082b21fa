use std::collections::{BTreeSet, HashMap};

use rusqlite::{params_from_iter, Connection};
use serde_json::json;

use crate::auth;
use crate::hierarchy;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_allowed, require_caller, str_param};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;
use crate::roles::{self, Role, DEFAULT_SIGNUP_ROLE};

/// Account rows with their role labels, ordered by email. `ids` restricts the
/// listing; an empty set short-circuits to no rows.
fn user_rows(
    conn: &Connection,
    ids: Option<&BTreeSet<String>>,
) -> anyhow::Result<Vec<serde_json::Value>> {
    let mut sql = String::from("SELECT id, email, full_name, managed_by FROM accounts");
    let bound: Vec<&String> = match ids {
        Some(set) if set.is_empty() => return Ok(Vec::new()),
        Some(set) => {
            let marks = set.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            sql.push_str(&format!(" WHERE id IN ({marks})"));
            set.iter().collect()
        }
        None => Vec::new(),
    };
    sql.push_str(" ORDER BY email");

    let mut stmt = conn.prepare(&sql)?;
    let accounts = stmt
        .query_map(params_from_iter(bound), |row| {
            let id: String = row.get(0)?;
            let email: String = row.get(1)?;
            let full_name: Option<String> = row.get(2)?;
            let managed_by: Option<String> = row.get(3)?;
            Ok((id, email, full_name, managed_by))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare("SELECT account_id, role FROM account_roles")?;
    let mut roles_by_account: HashMap<String, Vec<String>> = HashMap::new();
    let pairs = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (account_id, role) in pairs {
        roles_by_account.entry(account_id).or_default().push(role);
    }

    Ok(accounts
        .into_iter()
        .map(|(id, email, full_name, managed_by)| {
            let labels = roles_by_account.get(&id).cloned().unwrap_or_default();
            json!({
                "id": id,
                "email": email,
                "fullName": full_name,
                "managedBy": managed_by,
                "roles": labels
            })
        })
        .collect())
}

/// First-run escape hatch: creates the initial admin account. Refused as soon
/// as any account exists, so it cannot be used to sidestep the policy table.
fn handle_bootstrap(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (Some(email), Some(password)) = (str_param(req, "email"), str_param(req, "password"))
    else {
        return err(&req.id, "bad_params", "email and password required", None);
    };

    match auth::account_count(conn) {
        Ok(0) => {}
        Ok(_) => return err(&req.id, "forbidden", "workspace already has accounts", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let full_name = str_param(req, "fullName");
    let user_id = match auth::create_account(conn, email.trim(), &password, full_name.as_deref()) {
        Ok(id) => id,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };
    if let Err(e) = roles::replace_roles(conn, &user_id, &[Role::Admin]) {
        return err(
            &req.id,
            "role_assign_failed",
            e.to_string(),
            Some(json!({ "userId": user_id })),
        );
    }

    ok(&req.id, json!({ "userId": user_id }))
}

fn handle_manage_users(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let Some(action) = str_param(req, "action") else {
        return err(&req.id, "bad_params", "missing action", None);
    };

    match action.as_str() {
        "create" => {
            if let Err(resp) = require_allowed(conn, req, &caller, &Action::CreateAccount) {
                return resp;
            }

            let (Some(email), Some(password)) =
                (str_param(req, "email"), str_param(req, "password"))
            else {
                return err(&req.id, "bad_params", "email and password required", None);
            };
            let email = email.trim().to_string();

            let initial_role = match str_param(req, "role") {
                Some(label) => match label.parse::<Role>() {
                    Ok(role) => Some(role),
                    Err(e) => return err(&req.id, "bad_params", e, None),
                },
                None => None,
            };

            match auth::email_exists(conn, &email) {
                Ok(true) => {
                    return err(&req.id, "email_taken", "email is already registered", None)
                }
                Ok(false) => {}
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }

            let full_name = str_param(req, "full_name").unwrap_or_else(|| email.clone());
            let user_id = match auth::create_account(conn, &email, &password, Some(&full_name)) {
                Ok(id) => id,
                Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
            };

            // The account now exists with the signup default. Replacing the
            // role set is a second step; if it fails the caller must learn
            // that the account was still created.
            if let Some(role) = initial_role {
                if role != DEFAULT_SIGNUP_ROLE {
                    if let Err(e) = roles::replace_roles(conn, &user_id, &[role]) {
                        return err(
                            &req.id,
                            "role_assign_failed",
                            e.to_string(),
                            Some(json!({ "userId": user_id })),
                        );
                    }
                }
            }

            ok(&req.id, json!({ "success": true, "userId": user_id }))
        }

        "delete" => {
            let Some(user_id) = str_param(req, "user_id") else {
                return err(&req.id, "bad_params", "user ID required", None);
            };
            let action = Action::DeleteAccount {
                target: user_id.clone(),
            };
            if let Err(resp) = require_allowed(conn, req, &caller, &action) {
                return resp;
            }

            match auth::delete_account(conn, &user_id) {
                Ok(true) => ok(&req.id, json!({ "success": true })),
                Ok(false) => err(&req.id, "not_found", "account not found", None),
                Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
            }
        }

        "update_roles" => {
            let Some(user_id) = str_param(req, "user_id") else {
                return err(&req.id, "bad_params", "user ID and roles required", None);
            };
            let Some(labels) = req.params.get("roles").and_then(|v| v.as_array()) else {
                return err(&req.id, "bad_params", "user ID and roles required", None);
            };

            let mut parsed: Vec<Role> = Vec::with_capacity(labels.len());
            for label in labels {
                let Some(label) = label.as_str() else {
                    return err(&req.id, "bad_params", "roles must be strings", None);
                };
                match label.parse::<Role>() {
                    Ok(role) => parsed.push(role),
                    Err(e) => return err(&req.id, "bad_params", e, None),
                }
            }

            if let Err(resp) = require_allowed(conn, req, &caller, &Action::UpdateRoles) {
                return resp;
            }

            match auth::account_exists(conn, &user_id) {
                Ok(true) => {}
                Ok(false) => return err(&req.id, "not_found", "account not found", None),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }

            match roles::replace_roles(conn, &user_id, &parsed) {
                Ok(()) => ok(&req.id, json!({ "success": true })),
                Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
            }
        }

        other => err(
            &req.id,
            "bad_params",
            format!("invalid action: {}", other),
            None,
        ),
    }
}

/// Points an account at its supervisor (or clears the link with a null
/// managerId). Account mutations stay behind the admin gate like the rest of
/// the operator surface.
fn handle_set_manager(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match roles::has_role(conn, &caller.id, Role::Admin) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "forbidden", "admin access required", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let Some(user_id) = str_param(req, "userId") else {
        return err(&req.id, "bad_params", "missing userId", None);
    };
    let manager_id = str_param(req, "managerId");

    if let Some(manager_id) = manager_id.as_deref() {
        match auth::account_exists(conn, manager_id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "manager account not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    match conn.execute(
        "UPDATE accounts SET managed_by = ? WHERE id = ?",
        (&manager_id, &user_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "account not found", None),
        Ok(_) => ok(&req.id, json!({ "success": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_console(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_allowed(conn, req, &caller, &Action::ViewAdminConsole) {
        return resp;
    }

    match user_rows(conn, None) {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let visible = match hierarchy::visible_accounts(conn, &caller.id) {
        Ok(ids) => ids,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match user_rows(conn, Some(&visible)) {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_hierarchy_view(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_allowed(conn, req, &caller, &Action::ViewHierarchy) {
        return resp;
    }

    let tree = match hierarchy::hierarchy_tree(conn) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let coordinators: Vec<serde_json::Value> = tree
        .into_iter()
        .map(|coordinator| {
            let teachers: Vec<serde_json::Value> = coordinator
                .teachers
                .into_iter()
                .map(|teacher| {
                    let classes: Vec<serde_json::Value> = teacher
                        .classes
                        .into_iter()
                        .map(|class| {
                            json!({
                                "id": class.id,
                                "name": class.name,
                                "studentCount": class.student_count
                            })
                        })
                        .collect();
                    json!({
                        "id": teacher.person.id,
                        "email": teacher.person.email,
                        "fullName": teacher.person.full_name,
                        "classes": classes
                    })
                })
                .collect();
            json!({
                "id": coordinator.person.id,
                "email": coordinator.person.email,
                "fullName": coordinator.person.full_name,
                "teachers": teachers
            })
        })
        .collect();

    ok(&req.id, json!({ "coordinators": coordinators }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.bootstrap" => Some(handle_bootstrap(state, req)),
        "admin.manageUsers" => Some(handle_manage_users(state, req)),
        "admin.setManager" => Some(handle_set_manager(state, req)),
        "admin.console" => Some(handle_console(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "hierarchy.view" => Some(handle_hierarchy_view(state, req)),
        _ => None,
    }
}
