mod test_support;

use serde_json::{json, Value};
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir, write_extract};

fn items(result: &Value) -> Vec<String> {
    result["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .map(|r| r["rowIndex"].as_u64().expect("rowIndex").to_string())
        .collect()
}

#[test]
fn load_applies_filter_order_limit_and_projection() {
    let workspace = temp_dir("stagingd-rows-query");
    write_extract(
        &workspace,
        "SLItems",
        json!([
            { "Item": "P10", "Stat": "A", "Qty": 10, "Extra": "x" },
            { "Item": "P2", "Stat": "A", "Qty": 2, "Extra": "x" },
            { "Item": "Q1", "Stat": "A", "Qty": 7, "Extra": "x" },
            { "Item": "P3", "Stat": "O", "Qty": 3, "Extra": "x" },
            { "Item": "P5", "Stat": "a", "Qty": 5, "Extra": "x" }
        ]),
    );
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let loaded = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "rows.load",
        json!({
            "idoName": "SLItems",
            "properties": ["Item", "Qty", "Missing"],
            "filter": "Stat = 'A' AND Item LIKE 'P%'",
            "orderBy": "Qty DESC",
            "limit": 2
        }),
    );
    assert_eq!(loaded["rowCount"], json!(2));

    // an ad hoc profile to read the loaded rows back through staging
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "profiles.upsert",
        json!({ "profile": {
            "name": "echo",
            "ido": "SLItems",
            "fields": [
                { "source": "Item", "target": "item" },
                { "source": "Missing", "target": "missing" }
            ]
        }}),
    );
    let staged = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "staging.run",
        json!({ "profile": "echo" }),
    );
    let rows = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "staging.rows",
        json!({ "runId": staged["runId"], "start": 0, "count": 10 }),
    );
    assert_eq!(items(&rows), vec!["0", "1"]);
    assert_eq!(rows["rows"][0]["raw"], json!({ "Item": "P10", "Qty": 10, "Missing": null }));
    assert_eq!(rows["rows"][1]["raw"]["Item"], json!("P5"));
}

#[test]
fn load_reports_bad_queries_and_missing_extracts() {
    let workspace = temp_dir("stagingd-rows-errors");
    std::fs::create_dir_all(workspace.join("sources")).expect("sources dir");
    std::fs::write(
        workspace.join("sources").join("SLVendors.csv"),
        "Vendor,Name\nV1,\"Acme, Inc.\"\nV2,Globex\n",
    )
    .expect("write csv");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let loaded = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "rows.load",
        json!({ "idoName": "SLVendors", "filter": "Name <> 'Globex'" }),
    );
    assert_eq!(loaded["rowCount"], json!(1));

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "rows.load",
        json!({ "idoName": "SLVendors", "filter": "Name ~ 'x'" }),
        "bad_params",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "rows.load",
        json!({ "idoName": "SLVendors", "limit": -2 }),
        "bad_params",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "rows.load",
        json!({ "idoName": "../secrets" }),
        "bad_params",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "rows.load",
        json!({ "idoName": "SLCustomers" }),
        "source_failed",
    );
    let _ = request_err(&mut stdin, &mut reader, "7", "rows.load", json!({}), "bad_params");

    // a failed load leaves the earlier rows in place
    let health = request_ok(&mut stdin, &mut reader, "8", "health", json!({}));
    assert_eq!(health["session"]["loadedRows"], json!(1));
    assert_eq!(health["session"]["idoName"], json!("SLVendors"));
}
