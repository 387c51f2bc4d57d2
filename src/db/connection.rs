use anyhow::{Context, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use tokio_postgres::NoTls;

fn default_pool_size() -> usize {
    16
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// Never written to disk; resolved from `PGPASSWORD` or a prompt.
    #[serde(skip_serializing, default)]
    pub password: String,
    #[serde(default)]
    pub ssl_mode: SslMode,
    /// Skip certificate verification in prefer/require modes.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Custom CA bundle (PEM). Falls back to the system store.
    #[serde(default)]
    pub ca_cert_path: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

/// SSL/TLS connection modes, matching libpq's `sslmode`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl ConnectionConfig {
    pub fn connection_string(&self) -> String {
        let sslmode = match self.ssl_mode {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        };
        format!(
            "host={} port={} dbname={} user={} password={} sslmode={} connect_timeout=10",
            quote_conn_value(&self.host),
            self.port,
            quote_conn_value(&self.database),
            quote_conn_value(&self.username),
            quote_conn_value(&self.password),
            sslmode
        )
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 5432,
            database: String::from("postgres"),
            username: String::from("postgres"),
            password: String::new(),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: false,
            ca_cert_path: None,
            pool_size: default_pool_size(),
        }
    }
}

/// Build a connection pool. Connections open lazily on first checkout.
pub fn create_pool(config: &ConnectionConfig) -> Result<Pool> {
    let pg_config: tokio_postgres::Config = config
        .connection_string()
        .parse()
        .context("Invalid PostgreSQL connection settings")?;
    let manager_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let manager = match config.ssl_mode {
        SslMode::Disable => Manager::from_config(pg_config, NoTls, manager_config),
        SslMode::Prefer | SslMode::Require => {
            let tls = build_tls_connector(config, false)?;
            Manager::from_config(pg_config, tls, manager_config)
        }
        SslMode::VerifyCa | SslMode::VerifyFull => {
            let tls = build_tls_connector(config, true)?;
            Manager::from_config(pg_config, tls, manager_config)
        }
    };

    let pool = Pool::builder(manager)
        .max_size(config.pool_size.max(1))
        .build()
        .context("Failed to build connection pool")?;
    tracing::info!(
        target = %config.display_string(),
        pool_size = config.pool_size,
        "connection pool ready"
    );
    Ok(pool)
}

/// Build a TLS connector. `strict_verify` ignores `accept_invalid_certs`.
fn build_tls_connector(config: &ConnectionConfig, strict_verify: bool) -> Result<MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs && !strict_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else if let Some(ca_path) = &config.ca_cert_path {
        let ca_data = std::fs::read(ca_path)
            .with_context(|| format!("Failed to read CA certificate file: {}", ca_path))?;
        for block in pem_blocks(&ca_data)? {
            let cert = native_tls::Certificate::from_pem(block.as_bytes())
                .context("Failed to parse certificate")?;
            builder.add_root_certificate(cert);
        }
    }

    let connector = builder.build().context("Failed to build TLS connector")?;
    Ok(MakeTlsConnector::new(connector))
}

/// Split a PEM bundle into individual certificate blocks.
fn pem_blocks(pem_data: &[u8]) -> Result<Vec<String>> {
    let pem_str =
        std::str::from_utf8(pem_data).context("CA certificate file is not valid UTF-8")?;

    let mut blocks = Vec::new();
    let mut current: Option<String> = None;
    for line in pem_str.lines() {
        let line = line.trim();
        if line.contains("-----BEGIN CERTIFICATE-----") {
            current = Some(format!("{}\n", line));
        } else if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
            if line.contains("-----END CERTIFICATE-----") {
                blocks.extend(current.take());
            }
        }
    }

    if blocks.is_empty() {
        anyhow::bail!("No valid certificates found in PEM data");
    }
    Ok(blocks)
}

/// Quote a value for use in a libpq key=value connection string.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_quotes_values() {
        let config = ConnectionConfig {
            password: "it's".into(),
            database: "demo".into(),
            ..Default::default()
        };
        let conn = config.connection_string();
        assert!(conn.contains("dbname='demo'"));
        assert!(conn.contains("password='it\\'s'"));
        assert!(conn.contains("sslmode=prefer"));
        assert_eq!(config.display_string(), "postgres@localhost:5432/demo");
    }

    #[test]
    fn test_password_not_serialized() {
        let config = ConnectionConfig {
            password: "secret".into(),
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(!text.contains("secret"));
        let back: ConnectionConfig = toml::from_str(&text).unwrap();
        assert!(back.password.is_empty());
        assert_eq!(back.pool_size, 16);
    }

    #[test]
    fn test_ssl_mode_kebab_case() {
        let config: ConnectionConfig = toml::from_str(
            r#"
            host = "db"
            port = 5433
            database = "spec"
            username = "app"
            ssl_mode = "verify-full"
            "#,
        )
        .unwrap();
        assert_eq!(config.ssl_mode, SslMode::VerifyFull);
        assert_eq!(config.pool_size, 16);
    }

    #[test]
    fn test_pem_blocks() {
        let pem = b"junk\n-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n\
-----BEGIN CERTIFICATE-----\nBBBB\n-----END CERTIFICATE-----\n";
        let blocks = pem_blocks(pem).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].contains("BBBB"));
        assert!(pem_blocks(b"nothing here").is_err());
    }

    #[test]
    fn test_disabled_ssl_pool_builds_lazily() {
        let config = ConnectionConfig {
            ssl_mode: SslMode::Disable,
            pool_size: 2,
            ..Default::default()
        };
        let pool = create_pool(&config).unwrap();
        assert_eq!(pool.status().max_size, 2);
    }
}
