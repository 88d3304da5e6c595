mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn settled_search_runs_the_scoped_list_from_page_one() {
    let workspace = temp_dir("conductd-search-settle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for (i, name) in ["Alpha", "Alder", "Birch", "Cedar"].into_iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "classes.create",
            json!({ "name": name, "gradeLevel": 5 }),
        );
    }

    let idle = request_ok(
        &mut stdin,
        &mut reader,
        "idle",
        "search.settle",
        json!({ "scope": "classes" }),
    );
    assert_eq!(idle.get("settled").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(idle.get("pending").and_then(|v| v.as_bool()), Some(false));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "i1",
        "search.input",
        json!({ "scope": "classes", "term": "a" }),
    );
    let typed = request_ok(
        &mut stdin,
        &mut reader,
        "i2",
        "search.input",
        json!({ "scope": "classes", "term": " al " }),
    );
    assert_eq!(typed.get("quietMs").and_then(|v| v.as_u64()), Some(0));

    let settled = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "search.settle",
        json!({ "scope": "classes", "page": 4, "perPage": 1 }),
    );
    assert_eq!(settled.get("settled").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(settled.get("term").and_then(|v| v.as_str()), Some("al"));
    let result = settled.get("result").expect("result");
    assert_eq!(
        result
            .get("pagination")
            .and_then(|p| p.get("page"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        result
            .get("pagination")
            .and_then(|p| p.get("totalItems"))
            .and_then(|v| v.as_u64()),
        Some(2)
    );

    let drained = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "search.settle",
        json!({ "scope": "classes" }),
    );
    assert_eq!(drained.get("pending").and_then(|v| v.as_bool()), Some(false));

    let bad = request(
        &mut stdin,
        &mut reader,
        "bad",
        "search.input",
        json!({ "scope": "grades", "term": "x" }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn long_quiet_window_holds_then_cancels() {
    let workspace = temp_dir("conductd-search-window");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "cfg",
        "setup.update",
        json!({ "section": "listing", "patch": { "searchQuietMs": 5000 } }),
    );

    let input = request_ok(
        &mut stdin,
        &mut reader,
        "i1",
        "search.input",
        json!({ "scope": "students", "term": "tran" }),
    );
    assert_eq!(input.get("quietMs").and_then(|v| v.as_u64()), Some(5000));

    let early = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "search.settle",
        json!({ "scope": "students" }),
    );
    assert_eq!(early.get("settled").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(early.get("pending").and_then(|v| v.as_bool()), Some(true));
    let remaining = early
        .get("remainingMs")
        .and_then(|v| v.as_u64())
        .expect("remainingMs");
    assert!(remaining > 0 && remaining <= 5000);

    let cancelled = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "search.cancel",
        json!({ "scope": "students" }),
    );
    assert_eq!(cancelled.get("cancelled").and_then(|v| v.as_bool()), Some(true));
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "search.cancel",
        json!({ "scope": "students" }),
    );
    assert_eq!(again.get("cancelled").and_then(|v| v.as_bool()), Some(false));

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "search.settle",
        json!({ "scope": "students" }),
    );
    assert_eq!(after.get("pending").and_then(|v| v.as_bool()), Some(false));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn rejected_list_params_keep_the_term_pending() {
    let workspace = temp_dir("conductd-search-retry");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "i1",
        "search.input",
        json!({ "scope": "violations", "term": "late" }),
    );
    let rejected = request(
        &mut stdin,
        &mut reader,
        "s1",
        "search.settle",
        json!({ "scope": "violations", "from": "2024-05-01", "to": "2024-01-01" }),
    );
    assert_eq!(error_code(&rejected), "bad_params");

    let retried = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "search.settle",
        json!({ "scope": "violations", "from": "2024-01-01", "to": "2024-05-01" }),
    );
    assert_eq!(retried.get("settled").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(retried.get("term").and_then(|v| v.as_str()), Some("late"));
    assert!(retried
        .get("result")
        .and_then(|r| r.get("violations"))
        .map(|v| v.is_array())
        .unwrap_or(false));

    let drained = request_ok(
        &mut stdin,
        &mut reader,
        "s3",
        "search.settle",
        json!({ "scope": "violations" }),
    );
    assert_eq!(drained.get("pending").and_then(|v| v.as_bool()), Some(false));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn search_methods_require_a_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    for (i, method) in ["search.input", "search.settle", "search.cancel"]
        .into_iter()
        .enumerate()
    {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("n{}", i),
            method,
            json!({ "scope": "classes", "term": "x" }),
        );
        assert_eq!(error_code(&resp), "no_workspace", "{} without workspace", method);
    }
    drop(stdin);
    let _ = child.wait();
}
