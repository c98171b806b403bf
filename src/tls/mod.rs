//! Optional TLS for the agent listener, configured from
//! `RECEPTOR_TLS_CERT` / `RECEPTOR_TLS_KEY`.

use std::{
    env,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{error, info};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const CERT_ENV: &str = "RECEPTOR_TLS_CERT";
pub const KEY_ENV: &str = "RECEPTOR_TLS_KEY";

static TLS_ACCEPTOR: OnceLock<Option<TlsAcceptor>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- TlsError --------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("{0} is required when enabling TLS")]
    MissingVar(&'static str),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no {what} found in {path}")]
    Empty { what: &'static str, path: PathBuf },

    #[error("invalid tls key/cert pair: {0}")]
    Rustls(#[from] tokio_rustls::rustls::Error),
}

// -----------------------------------------------------------------------------
// ----- TLS: Exported ---------------------------------------------------------

/// Process-wide acceptor, loaded once. `None` means plaintext, either by
/// choice or because the configured files could not be used.
pub fn acceptor() -> Option<TlsAcceptor> {
    TLS_ACCEPTOR
        .get_or_init(|| match load_from_env() {
            Ok(Some(acceptor)) => {
                info!("tls enabled for agent connections");
                Some(acceptor)
            }
            Ok(None) => None,
            Err(err) => {
                error!("tls disabled: {err}");
                None
            }
        })
        .clone()
}

pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

// -----------------------------------------------------------------------------
// ----- TLS: Private helpers --------------------------------------------------

fn load_from_env() -> Result<Option<TlsAcceptor>, TlsError> {
    let cert_path = env::var_os(CERT_ENV);
    let key_path = env::var_os(KEY_ENV);

    if cert_path.is_none() && key_path.is_none() {
        return Ok(None);
    }

    let cert_path = cert_path.ok_or(TlsError::MissingVar(CERT_ENV))?;
    let key_path = key_path.ok_or(TlsError::MissingVar(KEY_ENV))?;

    load_acceptor(Path::new(&cert_path), Path::new(&key_path)).map(Some)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::Empty {
            what: "certificates",
            path: path.to_path_buf(),
        });
    }

    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::Empty {
            what: "private key",
            path: path.to_path_buf(),
        })
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
