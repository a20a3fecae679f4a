mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_err, request_ok, spawn_daemon};

#[test]
fn sections_return_defaults_and_persist_patches() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _workspace = open_workspace(&mut stdin, &mut reader, "academy-setup");

    let billing = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.get",
        json!({ "section": "billing" }),
    );
    assert_eq!(billing["settings"]["currency"].as_str(), Some("MXN"));
    assert_eq!(billing["settings"]["graceDays"].as_i64(), Some(5));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({
            "section": "billing",
            "patch": { "currency": "usd", "defaultMonthlyFee": 550.0 }
        }),
    );
    assert_eq!(updated["settings"]["currency"].as_str(), Some("USD"));
    assert_eq!(
        updated["settings"]["defaultMonthlyFee"].as_f64(),
        Some(550.0)
    );
    // Untouched fields keep their defaults.
    assert_eq!(updated["settings"]["graceDays"].as_i64(), Some(5));

    let reread = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.get",
        json!({ "section": "billing" }),
    );
    assert_eq!(reread["settings"]["currency"].as_str(), Some("USD"));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "billing", "patch": { "mystery": 1 } }),
    );
    assert_eq!(e["code"].as_str(), Some("bad_params"));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "billing", "patch": { "graceDays": 99 } }),
    );
    assert_eq!(e["code"].as_str(), Some("bad_params"));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "setup.get",
        json!({ "section": "printing" }),
    );
    assert_eq!(e["code"].as_str(), Some("bad_params"));
}

#[test]
fn notification_prefix_feeds_outgoing_subjects() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _workspace = open_workspace(&mut stdin, &mut reader, "academy-setup-prefix");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.update",
        json!({
            "section": "notifications",
            "patch": { "subjectPrefix": "Club de Ajedrez" }
        }),
    );

    let template = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "emails.templates.upsert",
        json!({
            "name": "plain",
            "subject": "Hello",
            "body": "Hi there"
        }),
    );
    let template_id = template["templateId"].as_str().expect("templateId").to_string();

    let sent = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "emails.sendTest",
        json!({ "templateId": template_id, "recipient": "t@example.com" }),
    );
    assert_eq!(sent["subject"].as_str(), Some("[Club de Ajedrez] Hello"));
}
