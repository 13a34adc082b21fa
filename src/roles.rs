use std::collections::BTreeSet;

use rusqlite::Connection;

/// Application roles, declared in ascending privilege order so that `Ord`
/// directly yields the "highest role wins" precedence used by visibility
/// and dashboard gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Student,
    Parent,
    Teacher,
    Coordinator,
    Director,
    Admin,
}

/// Role granted to self-registered accounts, mirroring the signup trigger of
/// the hosted deployment this service replaced.
pub const DEFAULT_SIGNUP_ROLE: Role = Role::Parent;

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Parent => "parent",
            Role::Teacher => "teacher",
            Role::Coordinator => "coordinator",
            Role::Director => "director",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "parent" => Ok(Role::Parent),
            "teacher" => Ok(Role::Teacher),
            "coordinator" => Ok(Role::Coordinator),
            "director" => Ok(Role::Director),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("{:?} is not a valid role", s)),
        }
    }
}

/// The caller's role set, read from the store. The store is the only source
/// of truth for roles: nothing caches this between authorization decisions.
pub fn roles_of(conn: &Connection, account_id: &str) -> anyhow::Result<BTreeSet<Role>> {
    let mut stmt = conn.prepare("SELECT role FROM account_roles WHERE account_id = ?")?;
    let labels = stmt
        .query_map([account_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = BTreeSet::new();
    for label in labels {
        // A label outside the known set can only come from hand-edited rows;
        // it grants nothing.
        if let Ok(role) = label.parse::<Role>() {
            out.insert(role);
        }
    }
    Ok(out)
}

pub fn has_role(conn: &Connection, account_id: &str, role: Role) -> anyhow::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM account_roles WHERE account_id = ? AND role = ?",
        (account_id, role.label()),
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

pub fn holds_any(conn: &Connection, account_id: &str, roles: &[Role]) -> anyhow::Result<bool> {
    let held = roles_of(conn, account_id)?;
    Ok(roles.iter().any(|r| held.contains(r)))
}

pub fn highest_role(roles: &BTreeSet<Role>) -> Option<Role> {
    roles.iter().copied().max()
}

/// Wholesale replacement of an account's role set: delete-all, insert-new,
/// inside one transaction so concurrent readers never observe a partial set
/// and a failure cannot strand the account roleless.
pub fn replace_roles(conn: &Connection, account_id: &str, roles: &[Role]) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM account_roles WHERE account_id = ?", [account_id])?;
    for role in roles {
        tx.execute(
            "INSERT OR IGNORE INTO account_roles(account_id, role) VALUES(?, ?)",
            (account_id, role.label()),
        )?;
    }
    tx.commit()?;
    Ok(())
}
