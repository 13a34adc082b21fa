use rusqlite::params_from_iter;
use serde_json::json;
use uuid::Uuid;

use crate::hierarchy;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_caller, str_param};
use crate::ipc::types::{AppState, Request};
use crate::roles::{self, Role};

const STAFF_ROLES: [Role; 4] = [Role::Teacher, Role::Coordinator, Role::Director, Role::Admin];

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let held = match roles::roles_of(conn, &caller.id) {
        Ok(h) => h,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Parents without a staff role see their linked children; everyone else
    // sees the students registered by accounts visible to them.
    let parent_only =
        held.contains(&Role::Parent) && !STAFF_ROLES.iter().any(|r| held.contains(r));

    let rows = if parent_only {
        conn.prepare(
            "SELECT s.id, s.name, s.class_name, s.class_id
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
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()
        })
    } else {
        let visible = match hierarchy::visible_accounts(conn, &caller.id) {
            Ok(ids) => ids,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let marks = visible.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, name, class_name, class_id
             FROM students
             WHERE created_by IN ({marks})
             ORDER BY name",
        );
        conn.prepare(&sql).and_then(|mut stmt| {
            stmt.query_map(params_from_iter(visible.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()
        })
    };

    match rows {
        Ok(rows) => {
            let students: Vec<serde_json::Value> = rows
                .into_iter()
                .map(|(id, name, class_name, class_id)| {
                    json!({
                        "id": id,
                        "name": name,
                        "className": class_name,
                        "classId": class_id
                    })
                })
                .collect();
            ok(&req.id, json!({ "students": students }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match roles::holds_any(conn, &caller.id, &STAFF_ROLES) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "forbidden", "staff access required", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let name = match str_param(req, "name").map(|n| n.trim().to_string()) {
        Some(n) if !n.is_empty() => n,
        _ => return err(&req.id, "bad_params", "name must not be empty", None),
    };
    let class_name = str_param(req, "className").filter(|s| !s.trim().is_empty());
    let class_id = str_param(req, "classId");

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, name, class_name, class_id, created_by)
         VALUES(?, ?, ?, ?, ?)",
        (&student_id, &name, &class_name, &class_id, &caller.id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id, "name": name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        _ => None,
    }
}
