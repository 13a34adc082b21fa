use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::roles::DEFAULT_SIGNUP_ROLE;

const SESSION_TTL_DAYS: i64 = 7;

/// Identity established from a session token. Handlers never accept a caller
/// id from the request body for authorization purposes.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: String,
    pub email: String,
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex_string(&hasher.finalize())
}

fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex_string(&hasher.finalize())
}

pub fn email_exists(conn: &Connection, email: &str) -> anyhow::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM accounts WHERE email = ?",
        [email],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

pub fn account_exists(conn: &Connection, account_id: &str) -> anyhow::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM accounts WHERE id = ?",
        [account_id],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

pub fn account_count(conn: &Connection) -> anyhow::Result<i64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
    Ok(n)
}

/// Creates an account and grants the signup default role in one transaction,
/// standing in for the hosted platform's on-signup trigger.
pub fn create_account(
    conn: &Connection,
    email: &str,
    password: &str,
    full_name: Option<&str>,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    let salt = Uuid::new_v4().simple().to_string();
    let hash = hash_password(&salt, password);
    let now = Utc::now().to_rfc3339();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO accounts(id, email, full_name, managed_by, password_hash, password_salt, created_at)
         VALUES(?, ?, ?, NULL, ?, ?, ?)",
        (&id, email, full_name, &hash, &salt, &now),
    )?;
    tx.execute(
        "INSERT INTO account_roles(account_id, role) VALUES(?, ?)",
        (&id, DEFAULT_SIGNUP_ROLE.label()),
    )?;
    tx.commit()?;
    Ok(id)
}

/// Removes the account plus its sessions and role rows. Classes, students,
/// parent links and evaluations that reference the account keep their dangling
/// ids; cleaning those up is the caller's responsibility.
pub fn delete_account(conn: &Connection, account_id: &str) -> anyhow::Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let removed = tx.execute("DELETE FROM accounts WHERE id = ?", [account_id])?;
    if removed == 0 {
        return Ok(false);
    }
    tx.execute("DELETE FROM sessions WHERE account_id = ?", [account_id])?;
    tx.execute("DELETE FROM account_roles WHERE account_id = ?", [account_id])?;
    tx.commit()?;
    Ok(true)
}

/// Account id on success, None on unknown email or wrong password. The two
/// failure cases are indistinguishable on the wire.
pub fn verify_password(
    conn: &Connection,
    email: &str,
    password: &str,
) -> anyhow::Result<Option<String>> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, password_hash, password_salt FROM accounts WHERE email = ?",
            [email],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((id, stored_hash, salt)) = row else {
        return Ok(None);
    };
    if hash_password(&salt, password) == stored_hash {
        Ok(Some(id))
    } else {
        Ok(None)
    }
}

/// Issues a bearer token for the account. Only the SHA-256 digest of the
/// token is persisted.
pub fn create_session(conn: &Connection, account_id: &str) -> anyhow::Result<String> {
    let token = Uuid::new_v4().simple().to_string();
    let expires_at = (Utc::now() + Duration::days(SESSION_TTL_DAYS)).to_rfc3339();
    conn.execute(
        "INSERT INTO sessions(token_hash, account_id, expires_at) VALUES(?, ?, ?)",
        (token_digest(&token), account_id, &expires_at),
    )?;
    Ok(token)
}

/// Resolves a bearer token to a verified caller. Expired sessions are removed
/// on sight and resolve to None.
pub fn verify_session(conn: &Connection, token: &str) -> anyhow::Result<Option<Caller>> {
    let digest = token_digest(token);
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT s.account_id, s.expires_at, a.email
             FROM sessions s
             JOIN accounts a ON a.id = s.account_id
             WHERE s.token_hash = ?",
            [&digest],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((account_id, expires_at, email)) = row else {
        return Ok(None);
    };

    let expiry = DateTime::parse_from_rfc3339(&expires_at)
        .map_err(|e| anyhow!("malformed session expiry {:?}: {}", expires_at, e))?;
    if expiry < Utc::now() {
        conn.execute("DELETE FROM sessions WHERE token_hash = ?", [&digest])?;
        return Ok(None);
    }

    Ok(Some(Caller {
        id: account_id,
        email,
    }))
}

pub fn revoke_session(conn: &Connection, token: &str) -> anyhow::Result<bool> {
    let removed = conn.execute(
        "DELETE FROM sessions WHERE token_hash = ?",
        [token_digest(token)],
    )?;
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::roles::{self, Role};

    fn mem_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        conn
    }

    #[test]
    fn signup_grants_default_role_and_password_round_trips() {
        let conn = mem_db();
        let id = create_account(&conn, "pat@x.com", "secret1", Some("Pat")).expect("create");

        let held = roles::roles_of(&conn, &id).expect("roles");
        assert_eq!(held.into_iter().collect::<Vec<_>>(), vec![Role::Parent]);

        assert_eq!(
            verify_password(&conn, "pat@x.com", "secret1").expect("verify"),
            Some(id.clone())
        );
        assert_eq!(
            verify_password(&conn, "pat@x.com", "wrong").expect("verify"),
            None
        );
        assert_eq!(
            verify_password(&conn, "nobody@x.com", "secret1").expect("verify"),
            None
        );
    }

    #[test]
    fn session_round_trip_and_revocation() {
        let conn = mem_db();
        let id = create_account(&conn, "pat@x.com", "secret1", None).expect("create");
        let token = create_session(&conn, &id).expect("session");

        let caller = verify_session(&conn, &token)
            .expect("verify")
            .expect("live session");
        assert_eq!(caller.id, id);
        assert_eq!(caller.email, "pat@x.com");

        assert!(verify_session(&conn, "bogus").expect("verify").is_none());
        assert!(revoke_session(&conn, &token).expect("revoke"));
        assert!(verify_session(&conn, &token).expect("verify").is_none());
    }

    #[test]
    fn delete_account_leaves_domain_rows_dangling() {
        let conn = mem_db();
        let id = create_account(&conn, "t@x.com", "secret1", None).expect("create");
        let token = create_session(&conn, &id).expect("session");
        conn.execute(
            "INSERT INTO students(id, name, class_name, class_id, created_by)
             VALUES('s1', 'Kid', 'Turma A', NULL, ?)",
            [&id],
        )
        .expect("insert student");

        assert!(delete_account(&conn, &id).expect("delete"));
        assert!(!delete_account(&conn, &id).expect("repeat delete"));
        assert!(verify_session(&conn, &token).expect("verify").is_none());
        assert!(roles::roles_of(&conn, &id).expect("roles").is_empty());

        // The student row survives with its dangling created_by.
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM students WHERE created_by = ?", [&id], |r| {
                r.get(0)
            })
            .expect("count");
        assert_eq!(n, 1);
    }
}
