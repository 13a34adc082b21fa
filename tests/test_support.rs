#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_daybookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn daybookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

/// Sends a request and unwraps its `result`, failing the test on any error.
pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok for {}: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result object")
}

/// Sends a request expected to fail and returns its error code.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected error for {}: {}",
        method,
        value
    );
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

/// Opens a fresh workspace and signs in a bootstrap admin. Returns the admin's
/// access token and user id.
pub fn setup_admin(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> (String, String) {
    let _ = request_ok(
        stdin,
        reader,
        "setup-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let boot = request_ok(
        stdin,
        reader,
        "setup-2",
        "admin.bootstrap",
        json!({ "email": "root@school.test", "password": "rootpw1", "fullName": "Root" }),
    );
    let admin_id = boot
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("admin userId")
        .to_string();
    let signin = request_ok(
        stdin,
        reader,
        "setup-3",
        "auth.signIn",
        json!({ "email": "root@school.test", "password": "rootpw1" }),
    );
    let token = signin
        .get("accessToken")
        .and_then(|v| v.as_str())
        .expect("admin token")
        .to_string();
    (token, admin_id)
}

/// Creates an account through the privileged endpoint and signs it in.
/// Returns (user_id, access_token).
pub fn create_and_sign_in(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    admin_token: &str,
    id_prefix: &str,
    email: &str,
    role: &str,
) -> (String, String) {
    let created = request_ok(
        stdin,
        reader,
        &format!("{id_prefix}-create"),
        "admin.manageUsers",
        json!({
            "accessToken": admin_token,
            "action": "create",
            "email": email,
            "password": "secret1",
            "role": role
        }),
    );
    let user_id = created
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();
    let signin = request_ok(
        stdin,
        reader,
        &format!("{id_prefix}-signin"),
        "auth.signIn",
        json!({ "email": email, "password": "secret1" }),
    );
    let token = signin
        .get("accessToken")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string();
    (user_id, token)
}

/// Reads the role labels the daemon reports for a signed-in account.
pub fn roles_of_user(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    token: &str,
) -> Vec<String> {
    let user = request_ok(
        stdin,
        reader,
        id,
        "auth.getUser",
        json!({ "accessToken": token }),
    );
    user.pointer("/user/roles")
        .and_then(|v| v.as_array())
        .expect("roles array")
        .iter()
        .map(|v| v.as_str().expect("role label").to_string())
        .collect()
}
