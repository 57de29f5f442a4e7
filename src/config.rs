use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig as TlsConfig;
use pgwire::tokio::TlsAcceptor;

use crate::auth::Credentials;

/// Server settings, read from `SLOTKEEPER_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub admin_user: String,
    pub guest_user: String,
    pub guest_password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "slotkeeper".into(),
            admin_user: "admin".into(),
            guest_user: "guest".into(),
            guest_password: "guest".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> io::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset keys keep their defaults;
    /// values that fail to parse are an error rather than silently ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        let defaults = Self::default();
        let string = |key: &str, default: String| lookup(key).unwrap_or(default);

        Ok(Self {
            bind: string("SLOTKEEPER_BIND", defaults.bind),
            port: parsed(&lookup, "SLOTKEEPER_PORT")?.unwrap_or(defaults.port),
            data_dir: lookup("SLOTKEEPER_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: string("SLOTKEEPER_PASSWORD", defaults.password),
            admin_user: string("SLOTKEEPER_ADMIN_USER", defaults.admin_user),
            guest_user: string("SLOTKEEPER_GUEST_USER", defaults.guest_user),
            guest_password: string("SLOTKEEPER_GUEST_PASSWORD", defaults.guest_password),
            max_connections: parsed(&lookup, "SLOTKEEPER_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "SLOTKEEPER_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "SLOTKEEPER_METRICS_PORT")?,
            tls_cert: lookup("SLOTKEEPER_TLS_CERT"),
            tls_key: lookup("SLOTKEEPER_TLS_KEY"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            admin_user: self.admin_user.clone(),
            guest_user: self.guest_user.clone(),
            password: self.password.clone(),
            guest_password: self.guest_password.clone(),
        }
    }

    /// TLS acceptor when both cert and key are configured, `None` when neither is.
    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        let (cert_path, key_path) = match (self.tls_cert.as_deref(), self.tls_key.as_deref()) {
            (None, None) => return Ok(None),
            (Some(c), Some(k)) => (c, k),
            _ => {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    "both SLOTKEEPER_TLS_CERT and SLOTKEEPER_TLS_KEY must be set, or neither",
                ));
            }
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;

        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

        let mut config = TlsConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> io::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e| {
            io::Error::new(ErrorKind::InvalidInput, format!("{key}={raw:?}: {e}"))
        }),
    }
}
