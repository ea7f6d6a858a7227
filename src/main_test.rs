use super::*;

#[test]
fn clean_script_exits_ok() {
    assert!(script_outcome(0, 4).is_ok());
    assert!(script_outcome(0, 0).is_ok());
}

#[test]
fn failed_script_commands_fail_the_run() {
    let err = script_outcome(2, 5).unwrap_err();
    assert!(matches!(err, CliError::ScriptFailed { failures: 2, total: 5 }));
    assert_eq!(err.to_string(), "2 of 5 script commands failed");
}

#[test]
fn post_data_must_be_json() {
    let cmd = CliCommand::Post { path: "/cart".into(), data: Some("{nope".into()) };
    assert!(matches!(cmd.into_command(), Err(CliError::InvalidJson(_))));
}

#[test]
fn script_subcommand_has_no_single_command() {
    let cmd = CliCommand::Script { input: "-".into() };
    assert!(cmd.into_command().unwrap().is_none());
}
