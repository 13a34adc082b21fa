use chrono::{Datelike, Months, Utc};
use rusqlite::Connection;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::require_caller;
use crate::ipc::types::{AppState, Request};
use crate::roles::{self, Role};

const TREND_MONTHS: u32 = 6;

fn count(conn: &Connection, sql: &str) -> anyhow::Result<i64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n)
}

fn handle_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match roles::holds_any(
        conn,
        &caller.id,
        &[Role::Admin, Role::Director, Role::Coordinator],
    ) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "forbidden", "management access required", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let totals = (|| -> anyhow::Result<serde_json::Value> {
        let students = count(conn, "SELECT COUNT(*) FROM students")?;
        let teachers = count(
            conn,
            "SELECT COUNT(DISTINCT account_id) FROM account_roles WHERE role = 'teacher'",
        )?;
        let classes = count(conn, "SELECT COUNT(*) FROM classes")?;
        let evaluations = count(conn, "SELECT COUNT(*) FROM daily_evaluations")?;

        // Six month buckets, oldest first, keyed on the YYYY-MM prefix of the
        // evaluation date.
        let first_of_month = Utc::now()
            .date_naive()
            .with_day(1)
            .unwrap_or_else(|| Utc::now().date_naive());
        let mut trends = Vec::with_capacity(TREND_MONTHS as usize);
        for back in (0..TREND_MONTHS).rev() {
            let month = first_of_month
                .checked_sub_months(Months::new(back))
                .unwrap_or(first_of_month);
            let label = format!("{:04}-{:02}", month.year(), month.month());
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM daily_evaluations WHERE substr(evaluation_date, 1, 7) = ?",
                [&label],
                |row| row.get(0),
            )?;
            trends.push(json!({ "month": label, "evaluations": n }));
        }

        Ok(json!({
            "totalStudents": students,
            "totalTeachers": teachers,
            "totalClasses": classes,
            "totalEvaluations": evaluations,
            "monthlyTrends": trends
        }))
    })();

    match totals {
        Ok(result) => ok(&req.id, result),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let caller = match require_caller(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match roles::has_role(conn, &caller.id, Role::Teacher) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "forbidden", "teacher access required", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let today = Utc::now().date_naive().to_string();
    let result = (|| -> anyhow::Result<serde_json::Value> {
        let students: i64 = conn.query_row(
            "SELECT COUNT(*) FROM students WHERE created_by = ?",
            [&caller.id],
            |row| row.get(0),
        )?;
        let classes: i64 = conn.query_row(
            "SELECT COUNT(*) FROM classes WHERE created_by = ?",
            [&caller.id],
            |row| row.get(0),
        )?;
        let evaluated_today: i64 = conn.query_row(
            "SELECT COUNT(*) FROM daily_evaluations e
             JOIN students s ON s.id = e.student_id
             WHERE s.created_by = ? AND e.evaluation_date = ?",
            (&caller.id, &today),
            |row| row.get(0),
        )?;
        let pending_today: i64 = conn.query_row(
            "SELECT COUNT(*) FROM students s
             WHERE s.created_by = ?
               AND NOT EXISTS (
                 SELECT 1 FROM daily_evaluations e
                 WHERE e.student_id = s.id AND e.evaluation_date = ?
               )",
            (&caller.id, &today),
            |row| row.get(0),
        )?;

        Ok(json!({
            "totalStudents": students,
            "totalClasses": classes,
            "evaluatedToday": evaluated_today,
            "pendingToday": pending_today
        }))
    })();

    match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.overview" => Some(handle_overview(state, req)),
        "stats.teacher" => Some(handle_teacher(state, req)),
        _ => None,
    }
}
