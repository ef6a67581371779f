//! Transfers a finished archive to the project's SFTP endpoint.
//!
//! The transfer is all-or-nothing: any failure between connect and the final
//! write counts as one upload failure, there is no partial-success state.

use std::fs::File;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use derive_more::{Display, Error, From};
use ssh2::Session;

use crate::config::UploadConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_ATTEMPTS: u32 = 3;
/// Applied to every operation on the session, in milliseconds.
const OPERATION_TIMEOUT_MS: u32 = 120_000;

#[derive(Debug, Display, Error, From)]
pub enum UploadError {
    #[display("Resolving {host}:{port} failed: {error}")]
    Resolve {
        host: String,
        port: u16,
        error: io::Error,
    },

    #[display("{host}:{port} did not resolve to any address")]
    NoAddress {
        #[error(ignore)]
        host: String,
        #[error(ignore)]
        port: u16,
    },

    #[display("Connecting to {host}:{port} failed after {CONNECT_ATTEMPTS} attempts: {error}")]
    Connect {
        host: String,
        port: u16,
        error: io::Error,
    },

    #[display("SFTP session failed: {_0}")]
    #[from]
    Ssh(ssh2::Error),

    #[display("Reading the local archive failed: {_0}")]
    LocalRead(io::Error),

    #[display("Transferring the archive failed: {_0}")]
    Transfer(io::Error),

    #[display("Archive path has no file name")]
    BadArchiveName,
}

/// Uploads `archive` into the remote directory of `config`.
pub fn upload(archive: &Path, config: &UploadConfig) -> Result<(), UploadError> {
    let file_name = archive.file_name().ok_or(UploadError::BadArchiveName)?;

    let tcp = connect(&config.host, config.port)?;
    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(OPERATION_TIMEOUT_MS);
    session.handshake()?;
    session.userauth_password(&config.user, &config.password)?;

    let sftp = session.sftp()?;
    let remote_path = Path::new(&config.remote_path).join(file_name);
    log::debug!(
        target: "stage::upload",
        "Transferring {} to {}:{}",
        archive.display(), config.host, remote_path.display(),
    );

    let mut local = File::open(archive).map_err(UploadError::LocalRead)?;
    let mut remote = sftp.create(&remote_path)?;
    io::copy(&mut local, &mut remote).map_err(UploadError::Transfer)?;
    drop(remote);

    session.disconnect(None, "backup finished", None)?;
    log::info!(target: "stage::upload", "Uploaded {} to {}", archive.display(), config.host);

    Ok(())
}

/// Opens the TCP connection with a timeout and bounded retries.
fn connect(host: &str, port: u16) -> Result<TcpStream, UploadError> {
    let addresses: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|error| UploadError::Resolve {
            host: host.to_string(),
            port,
            error,
        })?
        .collect();
    if addresses.is_empty() {
        return Err(UploadError::NoAddress {
            host: host.to_string(),
            port,
        });
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        match connect_any(&addresses) {
            Ok(stream) => return Ok(stream),
            Err(error) if attempt < CONNECT_ATTEMPTS => {
                log::warn!(
                    target: "stage::upload",
                    "Connecting to {host}:{port} failed (attempt {attempt} of {CONNECT_ATTEMPTS}): {error}",
                );
            }
            Err(error) => {
                return Err(UploadError::Connect {
                    host: host.to_string(),
                    port,
                    error,
                })
            }
        }
    }
}

/// Tries every resolved address once, e.g. both records of a dual-stack
/// host, and returns the first stream that connects.
fn connect_any(addresses: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last_error = None;
    for address in addresses {
        match TcpStream::connect_timeout(address, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(error) => last_error = Some(error),
        }
    }

    Err(last_error.unwrap_or_else(|| io::Error::other("no addresses to try")))
}
