//! Plaintext `KEY=VALUE` env files rendered from the secret bundle.
//!
//! One file per consumer: the datastore, the identity provider, the shared
//! datastore credentials, and one per app that needs database or OAuth
//! material. Files are owner-only and rewritten atomically on every render;
//! hooks may add late-bound values with [`append_env`]. Appended lines sit
//! below a marker comment and are carried over when the file is re-rendered.

use crate::secrets::{SecretRole, SecretStore};
use crate::{io_at, write_atomic, StoreError};
use bosun_schema::{validate_app_name, NetworkMode};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ENV_FILE_MODE: u32 = 0o600;

/// Starts the block written by [`append_env`]; everything from here to the
/// end of the file survives a re-render.
const APPENDED_MARKER: &str = "# appended by hooks\n";

pub const DATASTORE_ENV: &str = "postgres";
pub const IDP_ENV: &str = "authentik";
pub const SHARED_DB_ENV: &str = "db-credentials";

const RESERVED: [&str; 3] = [DATASTORE_ENV, IDP_ENV, SHARED_DB_ENV];

/// Where containers reach the primary datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreEndpoint {
    /// Hostname seen from bridge-networked containers.
    pub bridge_host: String,
    /// Hostname seen from host-networked containers.
    pub host_network_host: String,
    pub port: u16,
    /// Superuser of the shared datastore.
    pub user: String,
}

impl Default for DatastoreEndpoint {
    fn default() -> Self {
        Self {
            bridge_host: "host.containers.internal".to_owned(),
            host_network_host: "127.0.0.1".to_owned(),
            port: 5432,
            user: "postgres".to_owned(),
        }
    }
}

impl DatastoreEndpoint {
    pub fn host_for(&self, network: NetworkMode) -> &str {
        match network {
            NetworkMode::Bridge => &self.bridge_host,
            NetworkMode::Host => &self.host_network_host,
        }
    }
}

/// An installed app that may need its own env file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConsumer {
    pub app: String,
    pub network: NetworkMode,
    pub needs_database: bool,
    pub needs_oauth: bool,
}

impl EnvConsumer {
    fn wants_file(&self) -> bool {
        self.needs_database || self.needs_oauth
    }
}

/// Database name and role for an app. Datastores reject `-` in bare identifiers.
pub fn database_name(app: &str) -> String {
    app.replace('-', "_")
}

/// Render every env file under `env_dir` and return the paths written.
///
/// Per-app files of apps that are no longer consumers are removed, so an
/// uninstalled app's credentials disappear on the next render.
pub fn render_env_files(
    store: &SecretStore,
    env_dir: &Path,
    datastore: &DatastoreEndpoint,
    consumers: &[EnvConsumer],
) -> Result<Vec<PathBuf>, StoreError> {
    fs::create_dir_all(env_dir).map_err(io_at("create directory", env_dir))?;
    let bundle = store.snapshot()?;
    let mut written = Vec::new();

    let db_password = bundle.get(SecretRole::DatastorePassword);
    written.push(write_env(
        env_dir,
        DATASTORE_ENV,
        &[("POSTGRES_USER", &datastore.user), ("POSTGRES_PASSWORD", db_password)],
    )?);

    let port = datastore.port.to_string();
    written.push(write_env(
        env_dir,
        IDP_ENV,
        &[
            ("AUTHENTIK_SECRET_KEY", bundle.get(SecretRole::IdpSecretKey)),
            ("AUTHENTIK_BOOTSTRAP_PASSWORD", bundle.get(SecretRole::IdpBootstrapPassword)),
            ("AUTHENTIK_BOOTSTRAP_TOKEN", bundle.get(SecretRole::IdpBootstrapToken)),
            ("AUTHENTIK_POSTGRESQL__HOST", datastore.host_for(NetworkMode::Bridge)),
            ("AUTHENTIK_POSTGRESQL__PORT", &port),
            ("AUTHENTIK_POSTGRESQL__USER", &datastore.user),
            ("AUTHENTIK_POSTGRESQL__PASSWORD", db_password),
            ("LDAP_OUTPOST_TOKEN", bundle.get(SecretRole::LdapOutpostToken)),
            ("LDAP_BIND_PASSWORD", bundle.get(SecretRole::LdapBindPassword)),
        ],
    )?);

    written.push(write_env(
        env_dir,
        SHARED_DB_ENV,
        &[
            ("DB_HOST", &datastore.host_network_host),
            ("DB_PORT", &port),
            ("DB_USER", &datastore.user),
            ("DB_PASSWORD", db_password),
        ],
    )?);

    let mut keep = BTreeSet::new();
    for consumer in consumers.iter().filter(|c| c.wants_file()) {
        validate_app_name(&consumer.app)?;
        let mut vars: Vec<(&str, String)> = Vec::new();
        if consumer.needs_database {
            let host = datastore.host_for(consumer.network);
            let name = database_name(&consumer.app);
            let password = store.app_database_password(&consumer.app)?;
            vars.push(("DB_HOST", host.to_owned()));
            vars.push(("DB_PORT", port.clone()));
            vars.push(("DB_NAME", name.clone()));
            vars.push(("DB_USER", name.clone()));
            vars.push((
                "DATABASE_URL",
                format!("postgres://{name}:{password}@{host}:{port}/{name}"),
            ));
            vars.push(("DB_PASSWORD", password));
        }
        if consumer.needs_oauth {
            vars.push((
                "OAUTH_CLIENT_ID",
                store.derive_app_secret(&consumer.app, "oauth-client-id")?,
            ));
            vars.push((
                "OAUTH_CLIENT_SECRET",
                store.app_oauth_client_secret(&consumer.app)?,
            ));
        }
        vars.push(("ADMIN_PASSWORD", store.app_admin_password(&consumer.app)?));

        let pairs: Vec<(&str, &str)> = vars.iter().map(|(k, v)| (*k, v.as_str())).collect();
        written.push(write_env(env_dir, &consumer.app, &pairs)?);
        keep.insert(consumer.app.as_str());
    }

    remove_stale(env_dir, &keep)?;
    info!("rendered {} env files into {}", written.len(), env_dir.display());
    Ok(written)
}

fn write_env(env_dir: &Path, name: &str, vars: &[(&str, &str)]) -> Result<PathBuf, StoreError> {
    let mut content = String::new();
    for (key, value) in vars {
        check_entry(key, value)?;
        content.push_str(key);
        content.push('=');
        content.push_str(value);
        content.push('\n');
    }
    let path = env_dir.join(format!("{name}.env"));
    if let Some(tail) = appended_block(&path)? {
        content.push_str(&tail);
    }
    write_atomic(&path, content.as_bytes(), Some(ENV_FILE_MODE))?;
    debug!("wrote {}", path.display());
    Ok(path)
}

/// The marker line and everything after it, if `path` has an appended block.
fn appended_block(path: &Path) -> Result<Option<String>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(io_at("read", path))?;
    let start = if content.starts_with(APPENDED_MARKER) {
        Some(0)
    } else {
        content
            .find(&format!("\n{APPENDED_MARKER}"))
            .map(|i| i + 1)
    };
    Ok(start.map(|i| content[i..].to_owned()))
}

fn remove_stale(env_dir: &Path, keep: &BTreeSet<&str>) -> Result<(), StoreError> {
    for entry in fs::read_dir(env_dir).map_err(io_at("read directory", env_dir))? {
        let path = entry.map_err(io_at("read directory", env_dir))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("env") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if RESERVED.contains(&stem) || keep.contains(stem) {
            continue;
        }
        fs::remove_file(&path).map_err(io_at("remove", &path))?;
        info!("removed stale env file {}", path.display());
    }
    Ok(())
}

fn check_entry(key: &str, value: &str) -> Result<(), StoreError> {
    let mut chars = key.chars();
    let valid_key = chars
        .next()
        .is_some_and(|c| c.is_ascii_uppercase() || c == '_')
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    if !valid_key {
        return Err(StoreError::InvalidEnv {
            key: key.to_owned(),
            reason: "keys must match [A-Z_][A-Z0-9_]*".to_owned(),
        });
    }
    if value.contains(['\n', '\r', '\0']) {
        return Err(StoreError::InvalidEnv {
            key: key.to_owned(),
            reason: "values must be single-line".to_owned(),
        });
    }
    Ok(())
}

/// Append variables to `<app>.env` without rewriting earlier lines.
///
/// A variable whose most recent value in the file already equals the new one
/// is skipped, so repeated hook runs do not grow the file. The first append
/// writes the marker that keeps these lines across [`render_env_files`].
/// Returns the number of lines appended.
pub fn append_env(env_dir: &Path, app: &str, vars: &[(&str, &str)]) -> Result<usize, StoreError> {
    validate_app_name(app)?;
    for (key, value) in vars {
        check_entry(key, value)?;
    }
    let path = env_dir.join(format!("{app}.env"));

    let mut current: HashMap<String, String> = HashMap::new();
    let mut marked = false;
    if path.exists() {
        let content = fs::read_to_string(&path).map_err(io_at("read", &path))?;
        marked = content.lines().any(|l| l == APPENDED_MARKER.trim_end());
        for line in content.lines() {
            if let Some((k, v)) = line.split_once('=') {
                current.insert(k.to_owned(), v.to_owned());
            }
        }
    }

    let mut block = String::new();
    let mut appended = 0;
    for (key, value) in vars {
        if current.get(*key).is_some_and(|v| v == value) {
            continue;
        }
        block.push_str(&format!("{key}={value}\n"));
        current.insert((*key).to_owned(), (*value).to_owned());
        appended += 1;
    }
    if appended == 0 {
        return Ok(0);
    }
    if !marked {
        block.insert_str(0, APPENDED_MARKER);
    }

    fs::create_dir_all(env_dir).map_err(io_at("create directory", env_dir))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(ENV_FILE_MODE)
        .open(&path)
        .map_err(io_at("open", &path))?;
    file.write_all(block.as_bytes()).map_err(io_at("append to", &path))?;
    file.sync_all().map_err(io_at("sync", &path))?;
    debug!("appended {appended} variables to {}", path.display());
    Ok(appended)
}
