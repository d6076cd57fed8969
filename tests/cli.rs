use std::fs;
use std::path::Path;

use assert_cmd::Command;

mod common;

fn shard_dataset(root: &Path, count: usize, shard_size: &str) -> std::path::PathBuf {
    let (manifest, images) = common::build_dataset(root, count);
    let out = root.join("out");

    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("shard")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--image-root")
        .arg(&images)
        .arg("--output")
        .arg(&out)
        .args(["--shard-size", shard_size, "--image-size", "8"]);
    cmd.assert().success();
    out
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout is json")
}

#[test]
fn runs() {
    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.assert()
        .success()
        .stdout(predicates::str::contains("seer 0.1.0"));
}

#[test]
fn outputs_tool_name() {
    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("-V");
    cmd.assert().success().stdout("seer 0.1.0\n");
}

// Index subcommand tests

#[test]
fn index_writes_manifest_sorted_by_path() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let root = temp.path().join("tree");
    common::write_png(&root.join("dog/b.png"), 4, 4, 10);
    common::write_png(&root.join("cat/b.png"), 4, 4, 20);
    common::write_png(&root.join("cat/a.png"), 4, 4, 30);
    fs::write(root.join("cat/notes.txt"), "ignored").expect("write notes");
    let manifest = temp.path().join("manifest.csv");

    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("index").arg(&root).arg("--output").arg(&manifest);
    cmd.assert()
        .success()
        .stdout(predicates::str::contains("Indexed 3 image(s) in 2 categories"))
        .stdout(predicates::str::contains("1 => dog"));

    let text = fs::read_to_string(&manifest).expect("read manifest");
    assert_eq!(text, "cat/a.png,cat,0\ncat/b.png,cat,0\ndog/b.png,dog,1\n");
}

#[test]
fn index_missing_root_fails() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("index")
        .arg(temp.path().join("missing"))
        .arg("--output")
        .arg(temp.path().join("manifest.csv"));
    cmd.assert().failure();
}

// Shard subcommand tests

#[test]
fn shard_writes_dataset_layout() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let out = shard_dataset(temp.path(), 5, "2");

    assert!(out.join("metadata.json").is_file());
    assert!(out.join("shards.txt").is_file());
    let listing = fs::read_to_string(out.join("shards.txt")).expect("read listing");
    assert_eq!(
        listing,
        "shards/images0_2.tfrecords\nshards/images1_2.tfrecords\nshards/images2_2.tfrecords\n"
    );
}

#[test]
fn shard_prints_report() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let (manifest, images) = common::build_dataset(temp.path(), 5);

    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("shard")
        .arg("-m")
        .arg(&manifest)
        .arg("-d")
        .arg(&images)
        .arg("-o")
        .arg(temp.path().join("out"))
        .args(["-r", "2", "-i", "8"]);
    cmd.assert()
        .success()
        .stdout(predicates::str::contains("Sharded 5 of 5 image(s) into 3 shard(s)"))
        .stdout(predicates::str::contains("categories: cat, dog"));
}

#[test]
fn shard_json_report_lists_skipped_rows() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let (manifest, images) = common::build_dataset(temp.path(), 4);
    common::write_corrupt(&images.join("cat/002.png"));

    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("shard")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--image-root")
        .arg(&images)
        .arg("--output")
        .arg(temp.path().join("out"))
        .args(["--image-size", "8", "--report", "json"]);
    let report = stdout_json(&mut cmd);

    assert_eq!(report["shard_counts"], serde_json::json!([3]));
    assert_eq!(report["skipped"][0]["row"], 2);
    assert_eq!(report["metadata"]["total_record_count"], 3);
}

#[test]
fn shard_refuses_existing_output_without_force() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let out = shard_dataset(temp.path(), 3, "2");

    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("shard")
        .arg("--manifest")
        .arg(temp.path().join("manifest.csv"))
        .arg("--image-root")
        .arg(temp.path().join("images"))
        .arg("--output")
        .arg(&out);
    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("--force"));
}

#[test]
fn shard_with_force_replaces_output() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let out = shard_dataset(temp.path(), 3, "2");

    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("shard")
        .arg("--manifest")
        .arg(temp.path().join("manifest.csv"))
        .arg("--image-root")
        .arg(temp.path().join("images"))
        .arg("--output")
        .arg(&out)
        .args(["--shard-size", "3", "--image-size", "8", "--force"]);
    cmd.assert().success();

    let listing = fs::read_to_string(out.join("shards.txt")).expect("read listing");
    assert_eq!(listing, "shards/images0_3.tfrecords\n");
    assert!(!out.join("shards/images1_2.tfrecords").exists());
}

#[test]
fn shard_rejects_zero_shard_size() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let (manifest, images) = common::build_dataset(temp.path(), 2);

    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("shard")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--image-root")
        .arg(&images)
        .arg("--output")
        .arg(temp.path().join("out"))
        .args(["--shard-size", "0"]);
    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("shard size must be at least 1"));
}

// Split subcommand tests

#[test]
fn split_reads_metadata() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let out = shard_dataset(temp.path(), 20, "2");

    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("split")
        .arg(out.join("metadata.json"))
        .args(["--report", "json"]);
    let split = stdout_json(&mut cmd);

    assert_eq!(split["train"].as_array().map(Vec::len), Some(8));
    assert_eq!(
        split["test"],
        serde_json::json!(["shards/images8_2.tfrecords", "shards/images9_2.tfrecords"])
    );
    assert_eq!(split["validation"], serde_json::json!([]));
}

#[test]
fn split_reads_listing_file() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let listing = temp.path().join("shards.txt");
    let lines: String = (0..20).map(|i| format!("s{}\n", i)).collect();
    fs::write(&listing, lines).expect("write listing");

    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("split").arg(&listing);
    cmd.assert()
        .success()
        .stdout(predicates::str::contains("Splitting 20 shard(s)"))
        .stdout(predicates::str::contains("train: 16"))
        .stdout(predicates::str::contains("test: 3"))
        .stdout(predicates::str::contains("validation: 1"));
}

#[test]
fn split_rejects_two_ratios() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let listing = temp.path().join("shards.txt");
    fs::write(&listing, "a\nb\n").expect("write listing");

    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("split").arg(&listing).args(["--ratios", "8,2"]);
    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("expected 3 ratios"));
}

// Check subcommand tests

#[test]
fn check_streams_dataset() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let out = shard_dataset(temp.path(), 20, "2");

    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("check")
        .arg(out.join("metadata.json"))
        .args(["--epochs", "2", "--batch", "4", "--seed", "3", "--report", "json"]);
    let report = stdout_json(&mut cmd);

    assert_eq!(report["image_shape"], serde_json::json!([8, 8, 3]));
    assert_eq!(report["steps_per_epoch"], 4);
    assert_eq!(report["final"]["batch_size"], 4.0);
    assert_eq!(report["final"]["label_out_of_range"], 0.0);
    assert_eq!(report["test_records"], 4);
    assert_eq!(report["validation_records"], 0);
}

#[test]
fn check_text_report() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let out = shard_dataset(temp.path(), 10, "1");

    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.arg("check")
        .arg(out.join("metadata.json"))
        .args(["--epochs", "1", "--batch", "3"]);
    cmd.assert()
        .success()
        .stdout(predicates::str::contains("Checked 1 epoch(s) of 3 step(s)"))
        .stdout(predicates::str::contains("final_mean_pixel"));
}

#[test]
fn check_missing_metadata_fails() {
    let mut cmd = Command::cargo_bin("seer").unwrap();
    cmd.args(["check", "nonexistent_metadata.json"]);
    cmd.assert().failure();
}
