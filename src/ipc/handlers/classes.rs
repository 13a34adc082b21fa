use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::hierarchy;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_caller, str_param};
use crate::ipc::types::{AppState, Request};
use crate::roles::{self, Role};

const STAFF_ROLES: [Role; 4] = [Role::Teacher, Role::Coordinator, Role::Director, Role::Admin];

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // Scope follows account visibility: a teacher gets their own classes, a
    // coordinator or director the ones of their reports, an admin all.
    let visible = match hierarchy::visible_accounts(conn, &caller.id) {
        Ok(ids) => ids,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = match hierarchy::classes_created_or_taught_by(conn, &visible) {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let classes: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.name,
                "description": c.description,
                "schoolYear": c.school_year,
                "teacherId": c.teacher_id,
                "teacherName": c.teacher_name,
                "createdBy": c.created_by,
                "studentCount": c.student_count
            })
        })
        .collect();

    ok(&req.id, json!({ "classes": classes }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let description = str_param(req, "description").filter(|s| !s.trim().is_empty());
    let school_year = str_param(req, "schoolYear").filter(|s| !s.trim().is_empty());
    let teacher_id = str_param(req, "teacherId");
    let coordinator_id = str_param(req, "coordinatorId");

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, description, school_year, teacher_id, coordinator_id, created_by)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &class_id,
            &name,
            &description,
            &school_year,
            &teacher_id,
            &coordinator_id,
            &caller.id,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let Some(class_id) = str_param(req, "classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };

    let created_by: Option<String> = match conn
        .query_row(
            "SELECT created_by FROM classes WHERE id = ?",
            [&class_id],
            |row| row.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(created_by) = created_by else {
        return err(&req.id, "not_found", "class not found", None);
    };

    let is_admin = match roles::has_role(conn, &caller.id, Role::Admin) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !is_admin && created_by != caller.id {
        return err(&req.id, "forbidden", "only the creator or an admin may delete a class", None);
    }

    // Students keep their class_id; re-homing them is the caller's concern.
    if let Err(e) = conn.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
