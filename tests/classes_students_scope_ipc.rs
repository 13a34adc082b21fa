mod test_support;

use serde_json::json;
use test_support::{
    create_and_sign_in, request_err, request_ok, setup_admin, spawn_sidecar, temp_dir,
};

#[test]
fn class_listings_follow_supervision_scope() {
    let workspace = temp_dir("daybook-scope-classes");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (admin_token, _) = setup_admin(&mut stdin, &mut reader, &workspace);

    let (c1, c1_token) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "c1",
        "c1@school.test",
        "coordinator",
    );
    let (t1, t1_token) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "t1",
        "t1@school.test",
        "teacher",
    );
    let (_t2, t2_token) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "t2",
        "t2@school.test",
        "teacher",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "admin.setManager",
        json!({ "accessToken": admin_token, "userId": t1, "managerId": c1 }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "k1",
        "classes.create",
        json!({ "accessToken": t1_token, "name": "Turma A" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "k2",
        "classes.create",
        json!({ "accessToken": t2_token, "name": "Turma B" }),
    );

    let names = |result: &serde_json::Value| -> Vec<String> {
        result
            .get("classes")
            .and_then(|v| v.as_array())
            .expect("classes")
            .iter()
            .map(|c| c.get("name").and_then(|v| v.as_str()).expect("name").to_string())
            .collect()
    };

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "classes.list",
        json!({ "accessToken": t1_token }),
    );
    assert_eq!(names(&listed), vec!["Turma A".to_string()]);

    // The coordinator reaches their teacher's class but not the stranger's.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l2",
        "classes.list",
        json!({ "accessToken": c1_token }),
    );
    assert_eq!(names(&listed), vec!["Turma A".to_string()]);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l3",
        "classes.list",
        json!({ "accessToken": admin_token }),
    );
    assert_eq!(
        names(&listed),
        vec!["Turma A".to_string(), "Turma B".to_string()]
    );
}

#[test]
fn class_deletion_is_for_the_creator_or_an_admin() {
    let workspace = temp_dir("daybook-scope-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (admin_token, _) = setup_admin(&mut stdin, &mut reader, &workspace);

    let (_, t1_token) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "t1",
        "t1@school.test",
        "teacher",
    );
    let (_, t2_token) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "t2",
        "t2@school.test",
        "teacher",
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "k1",
        "classes.create",
        json!({ "accessToken": t1_token, "name": "Turma A" }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let code = request_err(
        &mut stdin,
        &mut reader,
        "d1",
        "classes.delete",
        json!({ "accessToken": t2_token, "classId": class_id }),
    );
    assert_eq!(code, "forbidden");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d2",
        "classes.delete",
        json!({ "accessToken": t1_token, "classId": class_id }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "d3",
        "classes.delete",
        json!({ "accessToken": admin_token, "classId": class_id }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn parents_only_see_their_linked_children() {
    let workspace = temp_dir("daybook-scope-students");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (admin_token, _) = setup_admin(&mut stdin, &mut reader, &workspace);

    let (_, t1_token) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "t1",
        "t1@school.test",
        "teacher",
    );
    let (p1, p1_token) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "p1",
        "p1@familia.test",
        "parent",
    );

    let mut student_ids = Vec::new();
    for (i, name) in ["Ana Souza", "Bia Lima"].iter().enumerate() {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s-{i}"),
            "students.create",
            json!({ "accessToken": t1_token, "name": name, "className": "Turma A" }),
        );
        student_ids.push(
            created
                .get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "link",
        "parents.link",
        json!({ "accessToken": admin_token, "parentId": p1, "studentId": student_ids[0] }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "students.list",
        json!({ "accessToken": p1_token }),
    );
    let students = listed
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(
        students[0].get("name").and_then(|v| v.as_str()),
        Some("Ana Souza")
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l2",
        "students.list",
        json!({ "accessToken": t1_token }),
    );
    assert_eq!(
        listed
            .get("students")
            .and_then(|v| v.as_array())
            .map(Vec::len),
        Some(2)
    );

    // Parents do not get to register students.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "s-forbidden",
        "students.create",
        json!({ "accessToken": p1_token, "name": "Novo Aluno" }),
    );
    assert_eq!(code, "forbidden");

    // Link maintenance is an admin affair.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "link-forbidden",
        "parents.link",
        json!({ "accessToken": t1_token, "parentId": p1, "studentId": student_ids[1] }),
    );
    assert_eq!(code, "forbidden");

    let unlinked = request_ok(
        &mut stdin,
        &mut reader,
        "unlink",
        "parents.unlink",
        json!({ "accessToken": admin_token, "parentId": p1, "studentId": student_ids[0] }),
    );
    assert_eq!(unlinked.get("removed").and_then(|v| v.as_bool()), Some(true));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l3",
        "students.list",
        json!({ "accessToken": p1_token }),
    );
    assert_eq!(
        listed
            .get("students")
            .and_then(|v| v.as_array())
            .map(Vec::len),
        Some(0)
    );
}
