use rusqlite::Connection;
use serde_json::json;

use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_caller, str_param};
use crate::ipc::types::{AppState, Request};
use crate::roles::{self, Role};

const RECENT_EVALUATIONS: i64 = 5;

pub fn evaluation_rows(
    conn: &Connection,
    student_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, evaluation_date, behavior_rating, eating_rating, sleep_rating,
                social_rating, daily_notes, created_by, updated_at
         FROM daily_evaluations
         WHERE student_id = ?
         ORDER BY evaluation_date DESC
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map((student_id, limit), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "evaluationDate": row.get::<_, String>(1)?,
                "behaviorRating": row.get::<_, Option<String>>(2)?,
                "eatingRating": row.get::<_, Option<String>>(3)?,
                "sleepRating": row.get::<_, Option<String>>(4)?,
                "socialRating": row.get::<_, Option<String>>(5)?,
                "dailyNotes": row.get::<_, Option<String>>(6)?,
                "createdBy": row.get::<_, String>(7)?,
                "updatedAt": row.get::<_, Option<String>>(8)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn require_admin(
    conn: &Connection,
    req: &Request,
    caller_id: &str,
) -> Result<(), serde_json::Value> {
    match roles::has_role(conn, caller_id, Role::Admin) {
        Ok(true) => Ok(()),
        Ok(false) => Err(err(&req.id, "forbidden", "admin access required", None)),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

fn handle_link(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_admin(conn, req, &caller.id) {
        return resp;
    }

    let (Some(parent_id), Some(student_id)) =
        (str_param(req, "parentId"), str_param(req, "studentId"))
    else {
        return err(&req.id, "bad_params", "missing parentId or studentId", None);
    };

    match auth::account_exists(conn, &parent_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "parent account not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let student_known: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM students WHERE id = ?",
        [&student_id],
        |row| row.get(0),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_known == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    // Repeating an existing link is a no-op, not an error.
    if let Err(e) = conn.execute(
        "INSERT OR IGNORE INTO parent_student_links(parent_id, student_id) VALUES(?, ?)",
        (&parent_id, &student_id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_unlink(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_admin(conn, req, &caller.id) {
        return resp;
    }

    let (Some(parent_id), Some(student_id)) =
        (str_param(req, "parentId"), str_param(req, "studentId"))
    else {
        return err(&req.id, "bad_params", "missing parentId or studentId", None);
    };

    match conn.execute(
        "DELETE FROM parent_student_links WHERE parent_id = ? AND student_id = ?",
        (&parent_id, &student_id),
    ) {
        Ok(n) => ok(&req.id, json!({ "ok": true, "removed": n > 0 })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_children(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let children = conn
        .prepare(
            "SELECT s.id, s.name, s.class_name
             FROM students s
             JOIN parent_student_links l ON l.student_id = s.id
             WHERE l.parent_id = ?
             ORDER BY s.name",
        )
        .and_then(|mut stmt| {
            stmt.query_map([&caller.id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()
        });

    let children = match children {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut out = Vec::with_capacity(children.len());
    for (id, name, class_name) in children {
        let evaluations = match evaluation_rows(conn, &id, RECENT_EVALUATIONS) {
            Ok(rows) => rows,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        out.push(json!({
            "id": id,
            "name": name,
            "className": class_name,
            "evaluations": evaluations
        }));
    }

    ok(&req.id, json!({ "children": out }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "parents.link" => Some(handle_link(state, req)),
        "parents.unlink" => Some(handle_unlink(state, req)),
        "parents.children" => Some(handle_children(state, req)),
        _ => None,
    }
}
