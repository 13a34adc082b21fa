use std::collections::BTreeSet;

use rusqlite::{params_from_iter, Connection};

use crate::roles::{self, Role};

/// One class row as surfaced by listings and the hierarchy tree.
#[derive(Debug, Clone)]
pub struct ClassRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub school_year: Option<String>,
    pub teacher_id: Option<String>,
    pub teacher_name: Option<String>,
    pub created_by: String,
    pub student_count: i64,
}

#[derive(Debug, Clone)]
pub struct PersonNode {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TeacherNode {
    pub person: PersonNode,
    pub classes: Vec<ClassRow>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorNode {
    pub person: PersonNode,
    pub teachers: Vec<TeacherNode>,
}

/// The accounts a caller may see, decided by the highest role they hold:
/// admin sees everyone, directors and coordinators see their direct reports
/// plus themselves, everyone else sees only themselves.
///
/// Supervision depth is one level by design; a director does not see the
/// teachers under their coordinators here. `managed_by` chains are not
/// validated for cycles, so results are a set and never recurse — a
/// self-managed row degrades to plain self-visibility.
pub fn visible_accounts(conn: &Connection, caller_id: &str) -> anyhow::Result<BTreeSet<String>> {
    let held = roles::roles_of(conn, caller_id)?;
    let mut out = BTreeSet::new();

    match roles::highest_role(&held) {
        Some(Role::Admin) => {
            let mut stmt = conn.prepare("SELECT id FROM accounts")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            out.extend(ids);
        }
        Some(Role::Director) | Some(Role::Coordinator) => {
            let mut stmt = conn.prepare("SELECT id FROM accounts WHERE managed_by = ?")?;
            let ids = stmt
                .query_map([caller_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            out.extend(ids);
            out.insert(caller_id.to_string());
        }
        _ => {
            out.insert(caller_id.to_string());
        }
    }

    Ok(out)
}

fn in_placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

/// Classes created by or assigned to any of the given accounts. An empty id
/// set yields an empty result; it must never turn into an unconstrained scan.
pub fn classes_created_or_taught_by(
    conn: &Connection,
    account_ids: &BTreeSet<String>,
) -> anyhow::Result<Vec<ClassRow>> {
    if account_ids.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<&String> = account_ids.iter().collect();
    let marks = in_placeholders(ids.len());
    let sql = format!(
        "SELECT
           c.id,
           c.name,
           c.description,
           c.school_year,
           c.teacher_id,
           COALESCE(t.full_name, t.email),
           c.created_by,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         LEFT JOIN accounts t ON t.id = c.teacher_id
         WHERE c.created_by IN ({marks}) OR c.teacher_id IN ({marks})
         ORDER BY c.name",
    );

    let mut stmt = conn.prepare(&sql)?;
    let bound: Vec<&String> = ids.iter().chain(ids.iter()).copied().collect();
    let rows = stmt
        .query_map(params_from_iter(bound), |row| {
            Ok(ClassRow {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                school_year: row.get(3)?,
                teacher_id: row.get(4)?,
                teacher_name: row.get(5)?,
                created_by: row.get(6)?,
                student_count: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The coordinator -> teacher -> class tree shown on the hierarchy page.
/// Coordinators are every account holding the coordinator role; their
/// teachers are the accounts they directly manage.
pub fn hierarchy_tree(conn: &Connection) -> anyhow::Result<Vec<CoordinatorNode>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.email, a.full_name
         FROM accounts a
         JOIN account_roles r ON r.account_id = a.id
         WHERE r.role = 'coordinator'
         ORDER BY a.email",
    )?;
    let coordinators = stmt
        .query_map([], |row| {
            Ok(PersonNode {
                id: row.get(0)?,
                email: row.get(1)?,
                full_name: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if coordinators.is_empty() {
        return Ok(Vec::new());
    }

    let coordinator_ids: Vec<&String> = coordinators.iter().map(|c| &c.id).collect();
    let marks = in_placeholders(coordinator_ids.len());
    let sql = format!(
        "SELECT id, email, full_name, managed_by
         FROM accounts
         WHERE managed_by IN ({marks})
         ORDER BY email",
    );
    let mut stmt = conn.prepare(&sql)?;
    let teachers = stmt
        .query_map(params_from_iter(coordinator_ids), |row| {
            let person = PersonNode {
                id: row.get(0)?,
                email: row.get(1)?,
                full_name: row.get(2)?,
            };
            let managed_by: String = row.get(3)?;
            Ok((person, managed_by))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let teacher_ids: BTreeSet<String> = teachers.iter().map(|(p, _)| p.id.clone()).collect();
    let classes = classes_created_or_taught_by(conn, &teacher_ids)?;

    let tree = coordinators
        .into_iter()
        .map(|coordinator| {
            let own_teachers = teachers
                .iter()
                .filter(|(_, managed_by)| *managed_by == coordinator.id)
                .map(|(person, _)| TeacherNode {
                    person: person.clone(),
                    classes: classes
                        .iter()
                        .filter(|c| {
                            c.created_by == person.id
                                || c.teacher_id.as_deref() == Some(person.id.as_str())
                        })
                        .cloned()
                        .collect(),
                })
                .collect();
            CoordinatorNode {
                person: coordinator,
                teachers: own_teachers,
            }
        })
        .collect();

    Ok(tree)
}
