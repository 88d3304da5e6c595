mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{create_id, error_code, request, request_ok, spawn_sidecar, temp_dir};

struct Seed {
    class_id: String,
    student_a: String,
    student_b: String,
    late: String,
    fight: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Seed {
    let class_id = create_id(
        stdin,
        reader,
        "seed-c",
        "classes.create",
        json!({ "name": "11A", "gradeLevel": 11 }),
        "classId",
    );
    let student_a = create_id(
        stdin,
        reader,
        "seed-sa",
        "students.create",
        json!({ "classId": class_id, "studentCode": "A-1", "fullName": "An Nguyen" }),
        "studentId",
    );
    let student_b = create_id(
        stdin,
        reader,
        "seed-sb",
        "students.create",
        json!({ "classId": class_id, "studentCode": "B-2", "fullName": "Binh Le" }),
        "studentId",
    );
    let category = create_id(
        stdin,
        reader,
        "seed-vc",
        "violationCategories.create",
        json!({ "name": "Behaviour" }),
        "categoryId",
    );
    let late = create_id(
        stdin,
        reader,
        "seed-t1",
        "violationTypes.create",
        json!({ "categoryId": category, "name": "Late", "points": 2 }),
        "typeId",
    );
    let fight = create_id(
        stdin,
        reader,
        "seed-t2",
        "violationTypes.create",
        json!({ "categoryId": category, "name": "Fighting", "points": 10 }),
        "typeId",
    );
    Seed {
        class_id,
        student_a,
        student_b,
        late,
        fight,
    }
}

#[test]
fn recorded_points_are_copied_from_the_type() {
    let workspace = temp_dir("conductd-violations-points");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let s = seed(&mut stdin, &mut reader);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "v1",
        "violations.create",
        json!({
            "studentId": s.student_a,
            "typeId": s.late,
            "occurredOn": "2025-10-01",
            "note": "Missed first bell"
        }),
    );
    assert_eq!(created.get("points").and_then(|v| v.as_i64()), Some(2));
    let violation_id = created
        .get("violationId")
        .and_then(|v| v.as_str())
        .expect("violationId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "tp",
        "violationTypes.update",
        json!({ "typeId": s.late, "points": 4 }),
    );
    let kept = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "violations.get",
        json!({ "violationId": violation_id }),
    );
    assert_eq!(
        kept.get("violation")
            .and_then(|v| v.get("points"))
            .and_then(|v| v.as_i64()),
        Some(2)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "violations.update",
        json!({ "violationId": violation_id, "typeId": s.fight }),
    );
    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "violations.get",
        json!({ "violationId": violation_id }),
    );
    let v = moved.get("violation").expect("violation");
    assert_eq!(v.get("points").and_then(|v| v.as_i64()), Some(10));
    assert_eq!(v.get("typeName").and_then(|v| v.as_str()), Some("Fighting"));
    assert_eq!(v.get("note").and_then(|v| v.as_str()), Some("Missed first bell"));

    let busy = request(
        &mut stdin,
        &mut reader,
        "dt",
        "violationTypes.delete",
        json!({ "typeId": s.fight }),
    );
    assert_eq!(error_code(&busy), "in_use");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "dv",
        "violations.delete",
        json!({ "violationId": violation_id }),
    );
    let again = request(
        &mut stdin,
        &mut reader,
        "dv2",
        "violations.delete",
        json!({ "violationId": violation_id }),
    );
    assert_eq!(error_code(&again), "not_found");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn violation_list_filters_and_totals() {
    let workspace = temp_dir("conductd-violations-filters");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let s = seed(&mut stdin, &mut reader);

    let records = [
        (&s.student_a, &s.late, "2025-09-01"),
        (&s.student_a, &s.late, "2025-09-15"),
        (&s.student_a, &s.fight, "2025-10-03"),
        (&s.student_b, &s.late, "2025-10-04"),
    ];
    for (i, (student, type_id, day)) in records.into_iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("v{}", i),
            "violations.create",
            json!({ "studentId": student, "typeId": type_id, "occurredOn": day }),
        );
    }

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "all",
        "violations.list",
        json!({ "classId": s.class_id }),
    );
    assert_eq!(all.get("totalPoints").and_then(|v| v.as_i64()), Some(16));
    let dates: Vec<&str> = all
        .get("violations")
        .and_then(|v| v.as_array())
        .expect("violations")
        .iter()
        .filter_map(|v| v.get("occurredOn").and_then(|d| d.as_str()))
        .collect();
    assert_eq!(
        dates,
        vec!["2025-10-04", "2025-10-03", "2025-09-15", "2025-09-01"]
    );

    let september = request_ok(
        &mut stdin,
        &mut reader,
        "sep",
        "violations.list",
        json!({ "studentId": s.student_a, "from": "2025-09-01", "to": "2025-09-30" }),
    );
    assert_eq!(september.get("totalPoints").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(
        september
            .get("pagination")
            .and_then(|p| p.get("totalItems"))
            .and_then(|v| v.as_u64()),
        Some(2)
    );

    let searched = request_ok(
        &mut stdin,
        &mut reader,
        "q",
        "violations.list",
        json!({ "search": "binh" }),
    );
    assert_eq!(searched.get("totalPoints").and_then(|v| v.as_i64()), Some(2));

    let paged = request_ok(
        &mut stdin,
        &mut reader,
        "pg",
        "violations.list",
        json!({ "perPage": 3, "page": 2 }),
    );
    // Totals cover the whole filter, not just the page.
    assert_eq!(paged.get("totalPoints").and_then(|v| v.as_i64()), Some(16));
    assert_eq!(
        paged
            .get("violations")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let backwards = request(
        &mut stdin,
        &mut reader,
        "bw",
        "violations.list",
        json!({ "from": "2025-10-01", "to": "2025-09-01" }),
    );
    assert_eq!(error_code(&backwards), "bad_params");

    let future = request(
        &mut stdin,
        &mut reader,
        "fut",
        "violations.create",
        json!({ "studentId": s.student_b, "typeId": s.late, "occurredOn": "2999-12-31" }),
    );
    assert_eq!(error_code(&future), "bad_params");

    drop(stdin);
    let _ = child.wait();
}
