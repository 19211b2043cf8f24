use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn help_lists_the_session_commands() {
    let mut cmd = Command::cargo_bin("frontline-sniff").unwrap();
    cmd.arg("--help");
    cmd.assert().success().stdout(
        predicate::str::contains("--timer")
            .and(predicate::str::contains("--start <MASTER@SLAVE>"))
            .and(predicate::str::contains("--sniff"))
            .and(predicate::str::contains("--ignore-type <TYPE>")),
    );
}

#[test]
fn no_action_is_an_error() {
    let mut cmd = Command::cargo_bin("frontline-sniff").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("nothing to do"));
}

#[test]
fn start_requires_a_separator() {
    let mut cmd = Command::cargo_bin("frontline-sniff").unwrap();
    cmd.arg("--start").arg("11:22:33:44:55:66");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("<master>@<slave>"));
}

#[test]
fn start_rejects_malformed_addresses() {
    let mut cmd = Command::cargo_bin("frontline-sniff").unwrap();
    cmd.arg("--start").arg("11:22:GG:44:55:66@AA:BB:CC:DD:EE:FF");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("cannot parse bluetooth address"));
}
