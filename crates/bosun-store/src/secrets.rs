//! Deployment secrets.
//!
//! The bundle lives in a single JSON file with owner-only permissions. Values
//! are generated once and never change afterwards; loading a bundle written by
//! an older release backfills any newly introduced field without touching the
//! populated ones.

use crate::lock::StoreLock;
use crate::{io_at, write_atomic, StoreError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bosun_schema::validate_app_name;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

const SECRET_FILE_MODE: u32 = 0o600;
const DERIVE_CONTEXT: &str = "bosun 2025-01 per-app secret derivation";

/// Fixed semantic roles of the top-level deployment secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretRole {
    DatastorePassword,
    IdpSecretKey,
    IdpBootstrapPassword,
    IdpBootstrapToken,
    LdapOutpostToken,
    LdapBindPassword,
    SsoHostSecret,
}

impl SecretRole {
    pub const ALL: [SecretRole; 7] = [
        SecretRole::DatastorePassword,
        SecretRole::IdpSecretKey,
        SecretRole::IdpBootstrapPassword,
        SecretRole::IdpBootstrapToken,
        SecretRole::LdapOutpostToken,
        SecretRole::LdapBindPassword,
        SecretRole::SsoHostSecret,
    ];

    pub fn min_len(self) -> usize {
        match self {
            SecretRole::DatastorePassword
            | SecretRole::IdpBootstrapPassword
            | SecretRole::LdapBindPassword => 32,
            SecretRole::IdpBootstrapToken | SecretRole::LdapOutpostToken => 48,
            SecretRole::IdpSecretKey | SecretRole::SsoHostSecret => 64,
        }
    }
}

/// Per-app secrets, generated on first request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppSecretKind {
    AdminPassword,
    OauthClientSecret,
    DatabasePassword,
}

impl AppSecretKind {
    pub fn min_len(self) -> usize {
        match self {
            AppSecretKind::AdminPassword | AppSecretKind::DatabasePassword => 32,
            AppSecretKind::OauthClientSecret => 48,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppSecrets {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub admin_password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oauth_client_secret: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub database_password: String,
}

impl AppSecrets {
    pub fn get(&self, kind: AppSecretKind) -> &str {
        match kind {
            AppSecretKind::AdminPassword => &self.admin_password,
            AppSecretKind::OauthClientSecret => &self.oauth_client_secret,
            AppSecretKind::DatabasePassword => &self.database_password,
        }
    }

    fn slot_mut(&mut self, kind: AppSecretKind) -> &mut String {
        match kind {
            AppSecretKind::AdminPassword => &mut self.admin_password,
            AppSecretKind::OauthClientSecret => &mut self.oauth_client_secret,
            AppSecretKind::DatabasePassword => &mut self.database_password,
        }
    }
}

impl fmt::Debug for AppSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppSecrets")
            .field("admin_password", &redacted(&self.admin_password))
            .field("oauth_client_secret", &redacted(&self.oauth_client_secret))
            .field("database_password", &redacted(&self.database_password))
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretBundle {
    #[serde(default)]
    pub datastore_password: String,
    #[serde(default)]
    pub idp_secret_key: String,
    #[serde(default)]
    pub idp_bootstrap_password: String,
    #[serde(default)]
    pub idp_bootstrap_token: String,
    #[serde(default)]
    pub ldap_outpost_token: String,
    #[serde(default)]
    pub ldap_bind_password: String,
    #[serde(default)]
    pub sso_host_secret: String,
    #[serde(default)]
    pub apps: BTreeMap<String, AppSecrets>,
}

impl SecretBundle {
    pub fn get(&self, role: SecretRole) -> &str {
        match role {
            SecretRole::DatastorePassword => &self.datastore_password,
            SecretRole::IdpSecretKey => &self.idp_secret_key,
            SecretRole::IdpBootstrapPassword => &self.idp_bootstrap_password,
            SecretRole::IdpBootstrapToken => &self.idp_bootstrap_token,
            SecretRole::LdapOutpostToken => &self.ldap_outpost_token,
            SecretRole::LdapBindPassword => &self.ldap_bind_password,
            SecretRole::SsoHostSecret => &self.sso_host_secret,
        }
    }

    fn slot_mut(&mut self, role: SecretRole) -> &mut String {
        match role {
            SecretRole::DatastorePassword => &mut self.datastore_password,
            SecretRole::IdpSecretKey => &mut self.idp_secret_key,
            SecretRole::IdpBootstrapPassword => &mut self.idp_bootstrap_password,
            SecretRole::IdpBootstrapToken => &mut self.idp_bootstrap_token,
            SecretRole::LdapOutpostToken => &mut self.ldap_outpost_token,
            SecretRole::LdapBindPassword => &mut self.ldap_bind_password,
            SecretRole::SsoHostSecret => &mut self.sso_host_secret,
        }
    }

    /// Generate every empty top-level secret. Returns whether anything changed.
    pub fn backfill(&mut self) -> bool {
        let mut changed = false;
        for role in SecretRole::ALL {
            let slot = self.slot_mut(role);
            if slot.is_empty() {
                *slot = generate_secret(role.min_len());
                debug!("generated secret {role:?}");
                changed = true;
            }
        }
        changed
    }
}

impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("SecretBundle");
        for role in SecretRole::ALL {
            s.field(&format!("{role:?}"), &redacted(self.get(role)));
        }
        s.field("apps", &self.apps.keys().collect::<Vec<_>>()).finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

/// `len` characters of base64url drawn from `len` bytes of OS randomness.
pub fn generate_secret(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    let mut encoded = URL_SAFE_NO_PAD.encode(&bytes);
    encoded.truncate(len);
    encoded
}

/// Process-local view of the secret bundle file.
///
/// In-process access goes through a read/write lock. Mutations additionally
/// take an exclusive file lock, re-read the file so writes from other
/// processes are not lost, and persist with an atomic replace.
pub struct SecretStore {
    path: PathBuf,
    lock_path: PathBuf,
    bundle: RwLock<SecretBundle>,
}

impl SecretStore {
    /// Load the bundle at `path`, creating or backfilling it as needed.
    ///
    /// The file is rewritten only when a secret was generated.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        let _guard = StoreLock::acquire(&lock_path)?;

        let (mut bundle, existed) = match read_bundle(&path)? {
            Some(bundle) => (bundle, true),
            None => (SecretBundle::default(), false),
        };
        if bundle.backfill() {
            persist(&path, &bundle)?;
            if existed {
                info!("backfilled missing secrets in {}", path.display());
            } else {
                info!("generated secret bundle at {}", path.display());
            }
        } else {
            tighten_permissions(&path)?;
        }

        Ok(Self {
            path,
            lock_path,
            bundle: RwLock::new(bundle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, role: SecretRole) -> Result<String, StoreError> {
        Ok(self.read()?.get(role).to_owned())
    }

    pub fn snapshot(&self) -> Result<SecretBundle, StoreError> {
        Ok(self.read()?.clone())
    }

    /// Return the app's secret of `kind`, generating and persisting it on
    /// first request. Repeated calls return the same value.
    pub fn app_secret(&self, app: &str, kind: AppSecretKind) -> Result<String, StoreError> {
        validate_app_name(app)?;
        {
            let bundle = self.read()?;
            if let Some(existing) = bundle.apps.get(app).map(|s| s.get(kind)) {
                if !existing.is_empty() {
                    return Ok(existing.to_owned());
                }
            }
        }
        self.mutate(|bundle| {
            let slot = bundle
                .apps
                .entry(app.to_owned())
                .or_default()
                .slot_mut(kind);
            if slot.is_empty() {
                *slot = generate_secret(kind.min_len());
                debug!("generated {kind:?} for {app}");
                (true, slot.clone())
            } else {
                (false, slot.clone())
            }
        })
    }

    pub fn app_admin_password(&self, app: &str) -> Result<String, StoreError> {
        self.app_secret(app, AppSecretKind::AdminPassword)
    }

    pub fn app_oauth_client_secret(&self, app: &str) -> Result<String, StoreError> {
        self.app_secret(app, AppSecretKind::OauthClientSecret)
    }

    pub fn app_database_password(&self, app: &str) -> Result<String, StoreError> {
        self.app_secret(app, AppSecretKind::DatabasePassword)
    }

    /// Drop every secret of `app`. Returns whether an entry existed.
    pub fn delete_app(&self, app: &str) -> Result<bool, StoreError> {
        validate_app_name(app)?;
        let removed = self.mutate(|bundle| {
            let removed = bundle.apps.remove(app).is_some();
            (removed, removed)
        })?;
        if removed {
            info!("deleted secrets for {app}");
        }
        Ok(removed)
    }

    /// Deterministic per-app value derived from the SSO host-derivation
    /// secret, e.g. an OAuth client id. Stable for the lifetime of the bundle.
    pub fn derive_app_secret(&self, app: &str, purpose: &str) -> Result<String, StoreError> {
        let bundle = self.read()?;
        let key = blake3::derive_key(DERIVE_CONTEXT, bundle.sso_host_secret.as_bytes());
        let input = format!("{app}\0{purpose}");
        let hash = blake3::keyed_hash(&key, input.as_bytes());
        Ok(hash.to_hex()[..40].to_owned())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut SecretBundle) -> (bool, T)) -> Result<T, StoreError> {
        let _guard = StoreLock::acquire(&self.lock_path)?;
        let mut bundle = self.write()?;
        if let Some(on_disk) = read_bundle(&self.path)? {
            *bundle = on_disk;
        }
        let backfilled = bundle.backfill();
        let (changed, value) = f(&mut bundle);
        if changed || backfilled {
            persist(&self.path, &bundle)?;
        }
        Ok(value)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, SecretBundle>, StoreError> {
        self.bundle
            .read()
            .map_err(|_| StoreError::LockFailed("secret bundle lock poisoned".to_owned()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, SecretBundle>, StoreError> {
        self.bundle
            .write()
            .map_err(|_| StoreError::LockFailed("secret bundle lock poisoned".to_owned()))
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn read_bundle(path: &Path) -> Result<Option<SecretBundle>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(io_at("read", path))?;
    if content.trim().is_empty() {
        warn!("secret bundle {} is empty, regenerating", path.display());
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&content)?))
}

fn persist(path: &Path, bundle: &SecretBundle) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(bundle)?;
    write_atomic(path, content.as_bytes(), Some(SECRET_FILE_MODE))
}

fn tighten_permissions(path: &Path) -> Result<(), StoreError> {
    let meta = fs::metadata(path).map_err(io_at("stat", path))?;
    if meta.permissions().mode() & 0o077 != 0 {
        warn!("secret bundle {} was group/world accessible, fixing", path.display());
        fs::set_permissions(path, fs::Permissions::from_mode(SECRET_FILE_MODE))
            .map_err(io_at("chmod", path))?;
    }
    Ok(())
}
