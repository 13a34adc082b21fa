use rusqlite::Connection;

use crate::auth::Caller;
use crate::roles::{self, Role};

/// Privileged actions gated by the policy table. The target of a deletion is
/// part of the action so the self-deletion guard can be evaluated here and
/// nowhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CreateAccount,
    DeleteAccount { target: String },
    UpdateRoles,
    ViewHierarchy,
    ViewAdminConsole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Forbidden(&'static str),
}

/// Decides whether `caller` may perform `action`. Roles are re-read from the
/// role store on every call; a role carried in the request body or cached from
/// an earlier decision is never consulted. A store failure propagates as an
/// error so it cannot be mistaken for a denial.
pub fn authorize(conn: &Connection, caller: &Caller, action: &Action) -> anyhow::Result<Decision> {
    let held = roles::roles_of(conn, &caller.id)?;
    let is_admin = held.contains(&Role::Admin);

    let decision = match action {
        Action::CreateAccount | Action::UpdateRoles | Action::ViewAdminConsole => {
            if is_admin {
                Decision::Allowed
            } else {
                Decision::Forbidden("admin access required")
            }
        }
        Action::DeleteAccount { target } => {
            if !is_admin {
                Decision::Forbidden("admin access required")
            } else if *target == caller.id {
                Decision::Forbidden("accounts cannot delete themselves")
            } else {
                Decision::Allowed
            }
        }
        Action::ViewHierarchy => {
            if is_admin || held.contains(&Role::Director) {
                Decision::Allowed
            } else {
                Decision::Forbidden("admin or director access required")
            }
        }
    };

    Ok(decision)
}
