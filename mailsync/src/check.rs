//! # Check
//!
//! Module dedicated to connection checks. [`check_endpoint`] opens a
//! session on one endpoint, authenticates, lists the folders, selects
//! a folder and reads the server capabilities. It lets a
//! configuration be validated before the first sync attempt.

use std::{fmt, io, time::Duration};

use async_imap::{Client, Session};
use futures::TryStreamExt;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::timeout,
};
use tokio_native_tls::{native_tls, TlsConnector};
use tracing::{debug, info};

use crate::config::{EndpointConfig, SyncConfig, DEFAULT_FOLDER};

/// Maximum duration of the check of one endpoint.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// The capability announcing support of the IDLE command.
pub const IDLE_CAPABILITY: &str = "IDLE";

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot connect to imap server {1}")]
    ConnectImapServerError(#[source] io::Error, String),
    #[error("cannot create tls connector")]
    CreateTlsConnectorError(#[source] native_tls::Error),
    #[error("cannot negotiate TLS with {1}")]
    NegotiateTlsError(#[source] native_tls::Error, String),
    #[error("cannot login to imap server as {1}")]
    LoginImapServerError(#[source] async_imap::error::Error, String),
    #[error("cannot read server capabilities")]
    GetCapabilitiesError(#[source] async_imap::error::Error),
    #[error("cannot list folders")]
    ListFoldersError(#[source] async_imap::error::Error),
    #[error("cannot select folder {1}")]
    SelectFolderError(#[source] async_imap::error::Error, String),
    #[error("check of {0} timed out after {1:?}")]
    TimeoutError(String, Duration),
}

/// What a successful check learned about one endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EndpointReport {
    /// The `host:port` address of the server.
    pub addr: String,

    /// Names of the folders of the account.
    pub folders: Vec<String>,

    /// The selected folder.
    pub folder: String,

    /// Number of messages in the selected folder.
    pub messages: u32,

    /// Whether the server supports the IDLE command.
    pub idle: bool,
}

/// The outcome of the check of both endpoints.
#[derive(Debug)]
pub struct CheckReport {
    pub source: Result<EndpointReport>,
    pub destination: Result<EndpointReport>,
}

impl CheckReport {
    pub fn is_success(&self) -> bool {
        self.source.is_ok() && self.destination.is_ok()
    }

    /// Returns the first failure, source first.
    pub fn into_result(self) -> Result<()> {
        self.source?;
        self.destination?;
        Ok(())
    }

    /// Returns `true` if the source server cannot notify changes,
    /// meaning the idle mode would fall back to polling.
    pub fn lacks_idle(&self) -> bool {
        matches!(&self.source, Ok(report) if !report.idle)
    }
}

/// Checks both endpoints concurrently.
///
/// The synchronized folder is selected on the source. The default
/// folder is selected on the destination, since the engine creates
/// missing folders there.
pub async fn check(config: &SyncConfig) -> CheckReport {
    let (source, destination) = tokio::join!(
        check_endpoint(&config.source, &config.folder),
        check_endpoint(&config.destination, DEFAULT_FOLDER),
    );

    CheckReport {
        source,
        destination,
    }
}

/// Checks one endpoint, within [`CHECK_TIMEOUT`].
pub async fn check_endpoint(endpoint: &EndpointConfig, folder: &str) -> Result<EndpointReport> {
    let addr = format!("{}:{}", endpoint.host, endpoint.port());

    match timeout(CHECK_TIMEOUT, connect(endpoint, &addr, folder)).await {
        Ok(res) => res,
        Err(_) => Err(Error::TimeoutError(addr, CHECK_TIMEOUT)),
    }
}

async fn connect(endpoint: &EndpointConfig, addr: &str, folder: &str) -> Result<EndpointReport> {
    debug!(addr, tls = endpoint.use_tls, "connecting to IMAP server");

    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port()))
        .await
        .map_err(|err| Error::ConnectImapServerError(err, addr.to_owned()))?;

    let report = if endpoint.use_tls {
        let connector = native_tls::TlsConnector::new().map_err(Error::CreateTlsConnectorError)?;
        let tls = TlsConnector::from(connector)
            .connect(&endpoint.host, tcp)
            .await
            .map_err(|err| Error::NegotiateTlsError(err, addr.to_owned()))?;

        authenticate(Client::new(tls), endpoint, addr, folder).await?
    } else {
        authenticate(Client::new(tcp), endpoint, addr, folder).await?
    };

    info!(
        addr,
        folders = report.folders.len(),
        folder = report.folder,
        messages = report.messages,
        idle = report.idle,
        "endpoint check passed"
    );

    Ok(report)
}

async fn authenticate<S>(
    client: Client<S>,
    endpoint: &EndpointConfig,
    addr: &str,
    folder: &str,
) -> Result<EndpointReport>
where
    S: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send,
{
    let mut session = client
        .login(&endpoint.user, endpoint.secret.expose())
        .await
        .map_err(|(err, _)| Error::LoginImapServerError(err, endpoint.user.clone()))?;

    let res = inspect(&mut session, addr, folder).await;

    if let Err(err) = session.logout().await {
        debug!("cannot close imap session: {err}");
    }

    res
}

async fn inspect<S>(session: &mut Session<S>, addr: &str, folder: &str) -> Result<EndpointReport>
where
    S: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send,
{
    let idle = session
        .capabilities()
        .await
        .map_err(Error::GetCapabilitiesError)?
        .has_str(IDLE_CAPABILITY);

    let folders: Vec<String> = session
        .list(Some(""), Some("*"))
        .await
        .map_err(Error::ListFoldersError)?
        .map_ok(|name| name.name().to_owned())
        .try_collect()
        .await
        .map_err(Error::ListFoldersError)?;

    let mailbox = session
        .select(folder)
        .await
        .map_err(|err| Error::SelectFolderError(err, folder.to_owned()))?;

    Ok(EndpointReport {
        addr: addr.to_owned(),
        folders,
        folder: folder.to_owned(),
        messages: mailbox.exists,
        idle,
    })
}
