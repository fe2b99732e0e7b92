use mailsync::{
    check::{self, check_endpoint},
    config::{EndpointConfig, SyncConfig},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
};

/// A scripted IMAP server accepting one session.
///
/// Only the account `alice` with the given password can log in, and
/// only the `INBOX` and `Archive` folders exist.
async fn spawn_server(password: &'static str, idle: bool) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut commands = Vec::new();

        writer.write_all(b"* OK fake server ready\r\n").await.unwrap();

        while let Ok(Some(line)) = lines.next_line().await {
            let (tag, cmd) = line.split_once(' ').unwrap();
            let name = cmd.split(' ').next().unwrap().to_uppercase();
            commands.push(name.clone());

            let reply = match name.as_str() {
                "LOGIN" if cmd.contains(&format!("\"{password}\"")) => {
                    format!("{tag} OK LOGIN completed\r\n")
                }
                "LOGIN" => format!("{tag} NO [AUTHENTICATIONFAILED] invalid credentials\r\n"),
                "CAPABILITY" if idle => {
                    format!("* CAPABILITY IMAP4rev1 IDLE\r\n{tag} OK CAPABILITY completed\r\n")
                }
                "CAPABILITY" => format!("* CAPABILITY IMAP4rev1\r\n{tag} OK CAPABILITY completed\r\n"),
                "LIST" => format!(
                    "* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\n\
                     * LIST (\\HasNoChildren) \"/\" \"Archive\"\r\n\
                     {tag} OK LIST completed\r\n"
                ),
                "SELECT" if cmd.contains("INBOX") => format!(
                    "* 3 EXISTS\r\n\
                     * 0 RECENT\r\n\
                     * FLAGS (\\Seen)\r\n\
                     {tag} OK [READ-WRITE] SELECT completed\r\n"
                ),
                "SELECT" => format!("{tag} NO no such folder\r\n"),
                "LOGOUT" => format!("* BYE logging out\r\n{tag} OK LOGOUT completed\r\n"),
                _ => format!("{tag} BAD unknown command\r\n"),
            };

            writer.write_all(reply.as_bytes()).await.unwrap();

            if name == "LOGOUT" {
                break;
            }
        }

        commands
    });

    (port, server)
}

fn endpoint(port: u16, password: &str) -> EndpointConfig {
    let mut endpoint = EndpointConfig::new("127.0.0.1", "alice", password);
    endpoint.port = Some(port);
    endpoint.use_tls = false;
    endpoint
}

#[test_log::test(tokio::test)]
async fn test_check_endpoint() {
    let (port, server) = spawn_server("s3cret", true).await;

    let report = check_endpoint(&endpoint(port, "s3cret"), "INBOX").await.unwrap();

    assert_eq!(report.addr, format!("127.0.0.1:{port}"));
    assert_eq!(report.folders, ["INBOX", "Archive"]);
    assert_eq!(report.folder, "INBOX");
    assert_eq!(report.messages, 3);
    assert!(report.idle);

    let commands = server.await.unwrap();
    assert_eq!(commands, ["LOGIN", "CAPABILITY", "LIST", "SELECT", "LOGOUT"]);
}

#[test_log::test(tokio::test)]
async fn test_check_endpoint_bad_credentials() {
    let (port, server) = spawn_server("s3cret", true).await;

    match check_endpoint(&endpoint(port, "wrong"), "INBOX").await.unwrap_err() {
        check::Error::LoginImapServerError(_, user) => assert_eq!(user, "alice"),
        err => panic!("unexpected error: {err:?}"),
    }

    server.abort();
}

#[test_log::test(tokio::test)]
async fn test_check_endpoint_missing_folder() {
    let (port, server) = spawn_server("s3cret", true).await;

    match check_endpoint(&endpoint(port, "s3cret"), "Missing").await.unwrap_err() {
        check::Error::SelectFolderError(_, folder) => assert_eq!(folder, "Missing"),
        err => panic!("unexpected error: {err:?}"),
    }

    // the session is closed even when the check fails
    let commands = server.await.unwrap();
    assert_eq!(commands.last().map(String::as_str), Some("LOGOUT"));
}

#[test_log::test(tokio::test)]
async fn test_check_endpoint_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    match check_endpoint(&endpoint(port, "s3cret"), "INBOX").await.unwrap_err() {
        check::Error::ConnectImapServerError(_, addr) => assert_eq!(addr, format!("127.0.0.1:{port}")),
        err => panic!("unexpected error: {err:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_check_both_endpoints() {
    let (source_port, _source) = spawn_server("secret1", false).await;
    let (dest_port, _dest) = spawn_server("secret2", true).await;

    let config = SyncConfig::new(endpoint(source_port, "secret1"), endpoint(dest_port, "wrong"));
    let report = check::check(&config).await;

    assert!(!report.is_success());
    assert!(report.lacks_idle());
    assert_eq!(report.source.as_ref().unwrap().messages, 3);

    match report.into_result().unwrap_err() {
        check::Error::LoginImapServerError(..) => (),
        err => panic!("unexpected error: {err:?}"),
    }
}
