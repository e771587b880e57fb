// SPDX-License-Identifier: Apache-2.0

//! CLI integration tests for the `transpile` sub-command.

use assert_cmd::Command;
use std::fs;
use std::path::Path;

const POLICYBOOK: &str = r#"
- name: Package policy
  hosts: localhost
  vars:
    allowed_packages:
      - mysql
  policies:
    - name: Check for banned packages
      target: task
      condition: input["ansible.builtin.package"].name not in allowed_packages
      actions:
        - deny:
            msg: The package {{ input["ansible.builtin.package"].name }} is not allowed
      tags:
        - compliance
"#;

fn transpile(input: &Path, output: &Path) {
    let mut cmd = Command::cargo_bin("gatecheck").expect("binary");
    _ = cmd
        .arg("--quiet")
        .arg("transpile")
        .arg("-i")
        .arg(input)
        .arg("-o")
        .arg(output)
        .assert()
        .success();
}

#[test]
fn test_transpile_policybook_file() {
    let workdir = tempfile::tempdir().expect("tempdir");
    let policybook = workdir.path().join("book.yml");
    fs::write(&policybook, POLICYBOOK).expect("write policybook");

    let outdir = workdir.path().join("out");
    transpile(&policybook, &outdir);

    let compiled = outdir.join("policies/Check_for_banned_packages.rego");
    let content = fs::read_to_string(&compiled).expect("compiled policy");
    assert!(content.starts_with("package Check_for_banned_packages\n"));
    assert!(content.contains("__target__ = \"task\""));
    assert!(content.contains("__tags__ = [\"compliance\"]"));
    assert!(content.contains("allowed_packages = [\"mysql\"]"));
    assert!(content.contains("check_item_not_in_list"));
    assert!(content.contains("deny = true if {"));
}

#[test]
fn test_recompilation_is_byte_identical() {
    let workdir = tempfile::tempdir().expect("tempdir");
    let policybook = workdir.path().join("book.yml");
    fs::write(&policybook, POLICYBOOK).expect("write policybook");

    let out_first = workdir.path().join("first");
    let out_second = workdir.path().join("second");
    transpile(&policybook, &out_first);
    transpile(&policybook, &out_second);

    let first = fs::read(out_first.join("policies/Check_for_banned_packages.rego"))
        .expect("first compile");
    let second = fs::read(out_second.join("policies/Check_for_banned_packages.rego"))
        .expect("second compile");
    assert_eq!(first, second);
}
