mod test_support;

use serde_json::json;
use std::fs::File;
use std::io::Read;
use test_support::{open_workspace, request_err, request_ok, spawn_daemon, temp_dir};

#[test]
fn bundle_export_reimport_preserves_rows() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let workspace = open_workspace(&mut stdin, &mut reader, "academy-backup-src");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schools.create",
        json!({ "name": "Centro Respaldo" }),
    );

    let out_dir = temp_dir("academy-backup-out");
    let bundle_path = out_dir.join("workspace.academybackup.zip");
    let export = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "backup.export",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        export["bundleFormat"].as_str(),
        Some("academy-workspace-v1")
    );
    assert_eq!(export["entryCount"].as_i64(), Some(3));

    // The bundle is a plain zip with a manifest.
    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(
        manifest["format"].as_str(),
        Some("academy-workspace-v1")
    );
    drop(archive);

    // Import into a fresh workspace and read the data back.
    let workspace2 = temp_dir("academy-backup-dst");
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.import",
        json!({
            "inPath": bundle_path.to_string_lossy(),
            "workspacePath": workspace2.to_string_lossy()
        }),
    );
    assert_eq!(
        imported["bundleFormatDetected"].as_str(),
        Some("academy-workspace-v1")
    );

    let listed = request_ok(&mut stdin, &mut reader, "4", "schools.list", json!({}));
    assert_eq!(
        listed["schools"][0]["name"].as_str(),
        Some("Centro Respaldo")
    );

    let _ = workspace;
}

#[test]
fn import_rejects_foreign_bundles() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _workspace = open_workspace(&mut stdin, &mut reader, "academy-backup-reject");

    let out_dir = temp_dir("academy-backup-bogus");
    let bogus = out_dir.join("not-a-bundle.zip");
    std::fs::write(&bogus, b"definitely not a zip").expect("write bogus file");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "backup.import",
        json!({ "inPath": bogus.to_string_lossy() }),
    );
    assert_eq!(e["code"].as_str(), Some("io_failed"));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "backup.import",
        json!({ "inPath": out_dir.join("missing.zip").to_string_lossy() }),
    );
    assert_eq!(e["code"].as_str(), Some("not_found"));
}
