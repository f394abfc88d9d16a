use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn runs_without_arguments() {
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.assert().success();
}

#[test]
fn assembles_and_runs_hello_world() {
    let out = std::env::temp_dir().join("braid_hello_world.obj");

    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("asm").arg("tests/files/hello.asm").arg(&out);
    cmd.assert().success();

    // Origin header comes first, big-endian
    let bytes = std::fs::read(&out).unwrap();
    assert_eq!(&bytes[..2], &[0x30, 0x00]);

    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("run").arg(&out).write_stdin("");
    cmd.assert()
        .success()
        .stdout(contains("Hello, world!"))
        .stdout(contains("HALT"));
}

#[test]
fn checks_valid_source() {
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("check").arg("tests/files/hello.asm");
    cmd.assert().success().stdout(contains("0 errors"));
}

#[test]
fn rejects_out_of_range_immediate() {
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("check").arg("tests/files/bad.asm");
    cmd.assert().failure();
}

#[test]
fn run_fails_on_missing_image() {
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("run").arg("tests/files/does_not_exist.obj");
    cmd.assert().failure();
}
