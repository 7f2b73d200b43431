//! Server configuration from `CHAIRTIME_*` environment variables.

use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

use crate::limits::DEFAULT_SLOT_GRANULARITY;
use crate::model::Minutes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    /// Shared secret for customer logins.
    pub password: String,
    pub admin_password: String,
    pub max_connections: usize,
    /// Appends since the last rewrite before the WAL is compacted.
    pub compact_threshold: u64,
    pub slot_granularity: Minutes,
    pub metrics_port: Option<u16>,
    pub tls: Option<TlsFiles>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("both CHAIRTIME_TLS_CERT and CHAIRTIME_TLS_KEY must be set, or neither")]
    PartialTls,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset variables take defaults;
    /// set but unparsable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let tls = match (lookup("CHAIRTIME_TLS_CERT"), lookup("CHAIRTIME_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => return Err(ConfigError::PartialTls),
        };

        let slot_granularity = parsed(&lookup, "CHAIRTIME_SLOT_GRANULARITY", DEFAULT_SLOT_GRANULARITY)?;
        if slot_granularity == 0 {
            return Err(ConfigError::Invalid {
                var: "CHAIRTIME_SLOT_GRANULARITY",
                value: "0".into(),
            });
        }

        Ok(Self {
            port: parsed(&lookup, "CHAIRTIME_PORT", 5433)?,
            bind: text("CHAIRTIME_BIND", "0.0.0.0"),
            data_dir: text("CHAIRTIME_DATA_DIR", "./data").into(),
            password: text("CHAIRTIME_PASSWORD", "chairtime"),
            admin_password: text("CHAIRTIME_ADMIN_PASSWORD", "chairtime-admin"),
            max_connections: parsed(&lookup, "CHAIRTIME_MAX_CONNECTIONS", 256)?,
            compact_threshold: parsed(&lookup, "CHAIRTIME_COMPACT_THRESHOLD", 1000)?,
            slot_granularity,
            metrics_port: lookup("CHAIRTIME_METRICS_PORT")
                .map(|v| v.parse().map_err(|_| ConfigError::Invalid { var: "CHAIRTIME_METRICS_PORT", value: v }))
                .transpose()?,
            tls,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { var, value }),
    }
}

impl TlsFiles {
    pub fn acceptor(&self) -> io::Result<TlsAcceptor> {
        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(&self.cert)?))
            .collect::<Result<_, _>>()?;

        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&self.key)?))?
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}
