use super::*;
use crate::test_support::TempDirGuard;

#[test]
fn shell_quote_wraps_and_escapes_single_quotes() {
    assert_eq!(shell_quote("plain"), "'plain'");
    assert_eq!(shell_quote("it's"), r"'it'\''s'");
    assert_eq!(shell_quote("a b $HOME"), "'a b $HOME'");
    assert_eq!(shell_quote(""), "''");
}

#[test]
fn render_enters_directory_scrubs_env_and_execs_command() {
    let builder = IsolationScriptBuilder::new().with_extra_unset_env(vec![
        "MY_TOOL_HOME".to_string(),
        "OLDPWD".to_string(),
        "not a name".to_string(),
    ]);
    let command = vec!["claude".to_string(), "-p".to_string(), "it's".to_string()];
    let text = builder.render("/bin/sh", Path::new("/work/my project"), &command);
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines[0], "#!/bin/sh");
    assert_eq!(lines[1], "cd '/work/my project' || exit 1");
    assert!(lines.contains(&"unset OLDPWD"));
    assert!(lines.contains(&"unset CARGO_MANIFEST_DIR"));
    assert!(lines.contains(&"unset MY_TOOL_HOME"));
    assert_eq!(lines.iter().filter(|line| **line == "unset OLDPWD").count(), 1);
    assert!(!text.contains("not a name"));
    assert!(lines.contains(&"export PWD='/work/my project'"));
    assert_eq!(lines.last(), Some(&r"exec 'claude' '-p' 'it'\''s'"));
}

#[test]
fn env_names_are_validated() {
    assert!(is_env_name("PATH"));
    assert!(is_env_name("npm_config_prefix"));
    assert!(!is_env_name(""));
    assert!(!is_env_name("1ABC"));
    assert!(!is_env_name("A-B"));
}

#[test]
fn unrecognized_shells_are_not_usable() {
    assert!(usable_shell("/usr/bin/fish").is_none());
    assert!(usable_shell("python3").is_none());
    assert!(usable_shell("/definitely/missing/bash").is_none());
}

#[cfg(unix)]
#[test]
fn resolved_shell_falls_back_past_bad_override() {
    let shell = IsolationScriptBuilder::new()
        .with_shell(Some("/usr/bin/fish".to_string()))
        .resolve_shell();
    let name = Path::new(&shell)
        .file_name()
        .and_then(|name| name.to_str())
        .expect("shell file name");
    assert!(RECOGNIZED_SHELLS.contains(&name), "unexpected shell {shell}");
}

#[cfg(unix)]
#[test]
fn built_script_is_private_and_removed_on_drop() {
    let temp = TempDirGuard::new("isolation-drop");
    let script = IsolationScriptBuilder::new()
        .build(temp.path(), &["true".to_string()])
        .expect("build script");
    let path = script.path().to_path_buf();
    let mode = fs::metadata(&path).expect("metadata").permissions().mode();
    assert_eq!(mode & 0o777, 0o700);
    let text = fs::read_to_string(&path).expect("read script");
    assert!(text.starts_with(&format!("#!{}", script.shell())));
    drop(script);
    assert!(!path.exists());
}

#[cfg(unix)]
#[test]
fn script_runs_in_target_directory_without_previous_location() {
    let temp = TempDirGuard::new("isolation-run");
    let target = temp.path().join("target dir");
    fs::create_dir_all(&target).expect("create target");
    let command = vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        "pwd; printf 'old=%s\\n' \"${OLDPWD:-}\"".to_string(),
    ];
    let script = IsolationScriptBuilder::new()
        .build(&target, &command)
        .expect("build script");
    let output = script
        .command()
        .env("OLDPWD", "/somewhere/else")
        .output()
        .expect("run script");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();
    let reported = fs::canonicalize(lines.next().expect("pwd line")).expect("canonical pwd");
    assert_eq!(reported, fs::canonicalize(&target).expect("canonical target"));
    assert_eq!(lines.next(), Some("old="));
}

#[cfg(unix)]
#[test]
fn script_exits_nonzero_when_directory_vanishes() {
    let temp = TempDirGuard::new("isolation-vanish");
    let target = temp.path().join("gone");
    let script = IsolationScriptBuilder::new()
        .build(&target, &["true".to_string()])
        .expect("build script");
    let status = script.command().status().expect("run script");
    assert_eq!(status.code(), Some(1));
}
