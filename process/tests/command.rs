use std::time::{Duration, Instant};

use process::{find_program, Command, Error};

#[test_log::test(tokio::test)]
async fn test_command() {
    let cmd = Command::new("echo").args(["hello,", "world!"]);
    let out = cmd.run().await.unwrap().to_string_lossy();
    assert_eq!(out, "hello, world!\n");

    // arguments are never interpreted by a shell
    let cmd = Command::new("echo").arg("$HOME; exit 1");
    let out = cmd.run().await.unwrap().to_string_lossy();
    assert_eq!(out, "$HOME; exit 1\n");
}

#[test_log::test(tokio::test)]
async fn test_command_combined_output() {
    let cmd = Command::new("sh").args(["-c", "echo out; echo err >&2"]);
    let out = cmd.run().await.unwrap().to_string_lossy();
    let mut lines: Vec<&str> = out.lines().collect();
    lines.sort();
    assert_eq!(lines, vec!["err", "out"]);
}

#[test_log::test(tokio::test)]
async fn test_command_env() {
    let cmd = Command::new("sh")
        .args(["-c", "echo $GREETING"])
        .env("GREETING", "hello");
    let out = cmd.run().await.unwrap().to_string_lossy();
    assert_eq!(out, "hello\n");
}

#[test_log::test(tokio::test)]
async fn test_command_non_zero() {
    let cmd = Command::new("sh").args(["-c", "echo partial; exit 3"]);
    let err = cmd.run().await.unwrap_err();

    assert_eq!(err.code(), Some(3));
    assert_eq!(err.output().unwrap().to_string_lossy(), "partial\n");

    match err {
        Error::GetExitStatusCodeNonZeroError(program, code, output) => {
            assert_eq!(program, "sh");
            assert_eq!(code, 3);
            assert_eq!(output.to_string_lossy(), "partial\n");
        }
        err => panic!("unexpected error: {err:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_command_not_found() {
    let cmd = Command::new("this-program-does-not-exist");

    let err = cmd.run().await.unwrap_err();

    assert_eq!(err.code(), None);
    assert!(err.output().is_none());

    match err {
        Error::SpawnCommandError(_, program) => {
            assert_eq!(program, "this-program-does-not-exist");
        }
        err => panic!("unexpected error: {err:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_command_timeout() {
    let cmd = Command::new("sh")
        .args(["-c", "echo started; sleep 10"])
        .with_timeout(Duration::from_millis(300));

    let now = Instant::now();
    let err = cmd.run().await.unwrap_err();
    assert!(now.elapsed() < Duration::from_secs(5));
    assert_eq!(err.code(), None);
    assert!(err.output().is_some());

    match err {
        Error::TimeoutError(program, duration, output) => {
            assert_eq!(program, "sh");
            assert_eq!(duration, Duration::from_millis(300));
            assert_eq!(output.to_string_lossy(), "started\n");
        }
        err => panic!("unexpected error: {err:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_spawn_lines() {
    let cmd = Command::new("sh").args(["-c", "echo ready; echo change"]);
    let mut stream = cmd.spawn_lines().unwrap();

    assert_eq!(stream.next_line().await.unwrap().as_deref(), Some("ready"));
    assert_eq!(stream.next_line().await.unwrap().as_deref(), Some("change"));
    assert_eq!(stream.next_line().await.unwrap(), None);
    assert_eq!(stream.wait().await.unwrap(), Some(0));
}

#[test]
fn test_find_program() {
    assert!(find_program("sh").is_some());
    assert!(find_program("this-program-does-not-exist").is_none());
}
