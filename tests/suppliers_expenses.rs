mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_err, request_ok, spawn_daemon};

#[test]
fn supplier_and_expense_lifecycle() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _workspace = open_workspace(&mut stdin, &mut reader, "academy-suppliers");

    let supplier = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "suppliers.create",
        json!({
            "name": "Papeleria Central",
            "contactName": "Marta Gil",
            "phone": "555-0200"
        }),
    );
    let supplier_id = supplier["supplierId"].as_str().expect("supplierId").to_string();

    // Duplicate supplier names are rejected.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "suppliers.create",
        json!({ "name": "Papeleria Central" }),
    );
    assert_eq!(e["code"].as_str(), Some("conflict"));

    let expense = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "expenses.create",
        json!({
            "supplierId": supplier_id.clone(),
            "concept": "Score sheets",
            "amount": 350.0,
            "spentAt": "2026-07-14",
            "receiptRef": "F-1093"
        }),
    );
    let expense_id = expense["expenseId"].as_str().expect("expenseId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "expenses.create",
        json!({
            "supplierId": supplier_id.clone(),
            "concept": "Chess clocks",
            "amount": 1200.0,
            "spentAt": "2026-06-02"
        }),
    );

    // Month filter matches on the spent_at prefix.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "expenses.list",
        json!({ "supplierId": supplier_id.clone(), "month": "2026-07" }),
    );
    let rows = listed["expenses"].as_array().expect("expenses");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["concept"].as_str(), Some("Score sheets"));
    assert_eq!(rows[0]["supplierName"].as_str(), Some("Papeleria Central"));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "expenses.create",
        json!({
            "supplierId": supplier_id.clone(),
            "concept": "Free stuff",
            "amount": 0.0,
            "spentAt": "2026-07-01"
        }),
    );
    assert_eq!(e["code"].as_str(), Some("bad_params"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "expenses.update",
        json!({
            "expenseId": expense_id,
            "concept": "Score sheets (bulk)",
            "amount": 420.0,
            "spentAt": "2026-07-14"
        }),
    );

    // Deleting the supplier takes its expenses with it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "suppliers.delete",
        json!({ "supplierId": supplier_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "9", "expenses.list", json!({}));
    assert!(listed["expenses"].as_array().expect("expenses").is_empty());
    let suppliers = request_ok(&mut stdin, &mut reader, "10", "suppliers.list", json!({}));
    assert!(suppliers["suppliers"].as_array().expect("suppliers").is_empty());
}
