mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{create_and_sign_in, request_ok, setup_admin, spawn_sidecar, temp_dir};

fn listed_ids(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    token: &str,
) -> Vec<String> {
    let listed = request_ok(
        stdin,
        reader,
        id,
        "users.list",
        json!({ "accessToken": token }),
    );
    listed
        .get("users")
        .and_then(|v| v.as_array())
        .expect("users")
        .iter()
        .map(|u| u.get("id").and_then(|v| v.as_str()).expect("id").to_string())
        .collect()
}

#[test]
fn admin_sees_every_account() {
    let workspace = temp_dir("daybook-vis-admin");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (admin_token, admin_id) = setup_admin(&mut stdin, &mut reader, &workspace);

    let (t1, _) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "t1",
        "t1@school.test",
        "teacher",
    );
    let (p1, _) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "p1",
        "p1@school.test",
        "parent",
    );

    let ids = listed_ids(&mut stdin, &mut reader, "list", &admin_token);
    for expected in [&admin_id, &t1, &p1] {
        assert!(ids.contains(expected), "admin listing misses {expected}");
    }
}

#[test]
fn director_without_reports_sees_only_self() {
    let workspace = temp_dir("daybook-vis-director-alone");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (admin_token, _) = setup_admin(&mut stdin, &mut reader, &workspace);

    let (d1, d1_token) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "d1",
        "d1@school.test",
        "director",
    );
    // Other accounts exist but point at nobody.
    let _ = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "t1",
        "t1@school.test",
        "teacher",
    );

    let ids = listed_ids(&mut stdin, &mut reader, "list", &d1_token);
    assert_eq!(ids, vec![d1]);
}

#[test]
fn supervision_visibility_stops_at_direct_reports() {
    let workspace = temp_dir("daybook-vis-one-level");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (admin_token, _) = setup_admin(&mut stdin, &mut reader, &workspace);

    let (d1, d1_token) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "d1",
        "d1@school.test",
        "director",
    );
    let (c1, c1_token) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "c1",
        "c1@school.test",
        "coordinator",
    );
    let (t1, _) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "t1",
        "t1@school.test",
        "teacher",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "admin.setManager",
        json!({ "accessToken": admin_token, "userId": c1, "managerId": d1 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m2",
        "admin.setManager",
        json!({ "accessToken": admin_token, "userId": t1, "managerId": c1 }),
    );

    let ids = listed_ids(&mut stdin, &mut reader, "list-d1", &d1_token);
    assert!(ids.contains(&d1));
    assert!(ids.contains(&c1));
    assert!(
        !ids.contains(&t1),
        "director visibility is one level, not transitive"
    );

    let ids = listed_ids(&mut stdin, &mut reader, "list-c1", &c1_token);
    assert!(ids.contains(&c1));
    assert!(ids.contains(&t1));
    assert!(!ids.contains(&d1));
}

#[test]
fn highest_role_wins_for_mixed_role_accounts() {
    let workspace = temp_dir("daybook-vis-precedence");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (admin_token, admin_id) = setup_admin(&mut stdin, &mut reader, &workspace);

    let (mix, mix_token) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "mix",
        "mix@school.test",
        "coordinator",
    );
    let (loner, _) = create_and_sign_in(
        &mut stdin,
        &mut reader,
        &admin_token,
        "loner",
        "loner@school.test",
        "parent",
    );

    // A coordinator with no reports sees only themself...
    let ids = listed_ids(&mut stdin, &mut reader, "before", &mix_token);
    assert_eq!(ids, vec![mix.clone()]);

    // ...until they also hold admin, at which point admin wins outright.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "promote",
        "admin.manageUsers",
        json!({
            "accessToken": admin_token,
            "action": "update_roles",
            "user_id": mix,
            "roles": ["coordinator", "admin"]
        }),
    );
    let ids = listed_ids(&mut stdin, &mut reader, "after", &mix_token);
    for expected in [&admin_id, &mix, &loner] {
        assert!(ids.contains(expected), "admin grant misses {expected}");
    }
}
