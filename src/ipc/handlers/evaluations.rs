use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::hierarchy;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::parents::evaluation_rows;
use crate::ipc::helpers::{require_caller, str_param};
use crate::ipc::types::{AppState, Request};
use crate::roles::{self, Role};

const DEFAULT_HISTORY_LIMIT: i64 = 30;

// Rating vocabularies carried over from the evaluation form.
const BEHAVIOR_RATINGS: [&str; 4] = ["excelente", "bom", "regular", "precisa_melhorar"];
const EATING_RATINGS: [&str; 4] = ["comeu_tudo", "comeu_bem", "comeu_pouco", "nao_comeu"];
const SLEEP_RATINGS: [&str; 4] = ["dormiu_bem", "dormiu_pouco", "nao_dormiu", "agitado"];
const SOCIAL_RATINGS: [&str; 4] = ["muito_participativo", "participativo", "timido", "isolado"];

fn rating_param(
    req: &Request,
    key: &str,
    allowed: &[&str],
) -> Result<Option<String>, serde_json::Value> {
    let Some(value) = str_param(req, key) else {
        return Ok(None);
    };
    if allowed.contains(&value.as_str()) {
        Ok(Some(value))
    } else {
        Err(err(
            &req.id,
            "bad_params",
            format!("invalid {}: {:?}", key, value),
            None,
        ))
    }
}

fn student_creator(conn: &Connection, student_id: &str) -> anyhow::Result<Option<String>> {
    let row = conn
        .query_row(
            "SELECT created_by FROM students WHERE id = ?",
            [student_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(row)
}

fn parent_linked(conn: &Connection, parent_id: &str, student_id: &str) -> anyhow::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM parent_student_links WHERE parent_id = ? AND student_id = ?",
        (parent_id, student_id),
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let is_admin = held.contains(&Role::Admin);
    if !is_admin && !held.contains(&Role::Teacher) {
        return err(&req.id, "forbidden", "teacher access required", None);
    }

    let Some(student_id) = str_param(req, "studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let creator = match student_creator(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(creator) = creator else {
        return err(&req.id, "not_found", "student not found", None);
    };
    if !is_admin && creator != caller.id {
        return err(&req.id, "forbidden", "student outside your scope", None);
    }

    let evaluation_date = match str_param(req, "date") {
        Some(raw) => match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(d) => d.to_string(),
            Err(_) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("invalid date: {:?}, expected YYYY-MM-DD", raw),
                    None,
                )
            }
        },
        None => Utc::now().date_naive().to_string(),
    };

    let behavior = match rating_param(req, "behavior", &BEHAVIOR_RATINGS) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let eating = match rating_param(req, "eating", &EATING_RATINGS) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let sleep = match rating_param(req, "sleep", &SLEEP_RATINGS) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let social = match rating_param(req, "social", &SOCIAL_RATINGS) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let notes = str_param(req, "notes").filter(|s| !s.trim().is_empty());

    // One evaluation per student per day: saving again overwrites the row.
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO daily_evaluations(
            id, student_id, evaluation_date, behavior_rating, eating_rating,
            sleep_rating, social_rating, daily_notes, created_by, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, evaluation_date) DO UPDATE SET
            behavior_rating = excluded.behavior_rating,
            eating_rating = excluded.eating_rating,
            sleep_rating = excluded.sleep_rating,
            social_rating = excluded.social_rating,
            daily_notes = excluded.daily_notes,
            created_by = excluded.created_by,
            updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            &student_id,
            &evaluation_date,
            &behavior,
            &eating,
            &sleep,
            &social,
            &notes,
            &caller.id,
            &now,
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "evaluationDate": evaluation_date }),
    )
}

fn handle_list_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let Some(student_id) = str_param(req, "studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let creator = match student_creator(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(creator) = creator else {
        return err(&req.id, "not_found", "student not found", None);
    };

    // Parents reach linked children; staff reach students registered by
    // accounts they can see.
    let allowed = match parent_linked(conn, &caller.id, &student_id) {
        Ok(true) => true,
        Ok(false) => match hierarchy::visible_accounts(conn, &caller.id) {
            Ok(visible) => visible.contains(&creator),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !allowed {
        return err(&req.id, "forbidden", "student outside your scope", None);
    }

    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_HISTORY_LIMIT);

    match evaluation_rows(conn, &student_id, limit) {
        Ok(rows) => ok(&req.id, json!({ "evaluations": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evaluations.save" => Some(handle_save(state, req)),
        "evaluations.listForStudent" => Some(handle_list_for_student(state, req)),
        _ => None,
    }
}
