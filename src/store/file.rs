//! YAML-file backed stores.
//!
//! Each store keeps the whole document in memory and rewrites the file on
//! every `save`/`delete`. The rewrite happens under a mutex, so concurrent
//! requests in one process are serialized. Several processes sharing one data
//! directory are NOT safe: the last writer wins and earlier writes are lost.
//!
//! Files are created with mode `0660` since the users file holds password
//! hashes.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, info};

use super::{
    models::{Role, Session, User, UserConfig, LEGACY_ADMIN_ID},
    SessionStore, SettingsStore, StoreResult, UserStore,
};
use crate::error::{StoreError, ValidationError};

const FILE_MODE: u32 = 0o660;

async fn write_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.flush().await
}

/// In-memory copy of one YAML document plus the path it is persisted to.
struct YamlFile<D> {
    path: PathBuf,
    document: Mutex<D>,
}

impl<D> YamlFile<D>
where
    D: Serialize + DeserializeOwned + Default + Clone + Send,
{
    async fn open(path: PathBuf) -> StoreResult<Self> {
        let document = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => D::default(),
            Ok(contents) => serde_yaml::from_str(&contents)?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "store file missing, starting empty");
                D::default()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    async fn read<R>(&self, f: impl FnOnce(&D) -> R + Send) -> R {
        let document = self.document.lock().await;
        f(&document)
    }

    /// Apply `f` to a copy, persist the copy, then publish it. A rejected
    /// change or a failed write leaves the in-memory state untouched.
    async fn update(&self, f: impl FnOnce(&mut D) -> StoreResult<()> + Send) -> StoreResult<()> {
        let mut document = self.document.lock().await;
        let mut next = document.clone();
        f(&mut next)?;
        let contents = serde_yaml::to_string(&next)?;
        write_file(&self.path, contents.as_bytes()).await?;
        *document = next;
        Ok(())
    }
}

fn same_text(left: &str, right: &str) -> bool {
    left.to_lowercase() == right.to_lowercase()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct UsersDocument {
    #[serde(default)]
    users: BTreeMap<String, User>,
}

impl UsersDocument {
    /// Username, then email, must not belong to another user.
    fn check_unique(&self, user: &User) -> StoreResult<()> {
        let others = self.users.values().filter(|other| other.id != user.id);
        if !user.username.is_empty()
            && others
                .clone()
                .any(|other| same_text(&other.username, &user.username))
        {
            return Err(StoreError::Conflict(ValidationError::UsernameTaken));
        }
        if !user.email.is_empty() && others.clone().any(|other| same_text(&other.email, &user.email)) {
            return Err(StoreError::Conflict(ValidationError::EmailTaken));
        }
        Ok(())
    }
}

pub struct FileUserStore {
    file: YamlFile<UsersDocument>,
}

impl FileUserStore {
    /// Load the store from `path`; a missing file is an empty store.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: PathBuf) -> StoreResult<Self> {
        let mut file: YamlFile<UsersDocument> = YamlFile::open(path).await?;
        // Older data files mark the administrator by ID only.
        if let Some(admin) = file.document.get_mut().users.get_mut(LEGACY_ADMIN_ID) {
            if admin.role != Role::Admin {
                info!("promoting legacy admin account");
                admin.role = Role::Admin;
            }
        }
        Ok(Self { file })
    }
}

#[async_trait]
impl UserStore for FileUserStore {
    async fn find(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.file.read(|doc| doc.users.get(id).cloned()).await)
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        if username.is_empty() {
            return Ok(None);
        }
        Ok(self
            .file
            .read(|doc| {
                doc.users
                    .values()
                    .find(|user| same_text(&user.username, username))
                    .cloned()
            })
            .await)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        if email.is_empty() {
            return Ok(None);
        }
        Ok(self
            .file
            .read(|doc| {
                doc.users
                    .values()
                    .find(|user| same_text(&user.email, email))
                    .cloned()
            })
            .await)
    }

    async fn all(&self) -> StoreResult<Vec<User>> {
        Ok(self.file.read(|doc| doc.users.values().cloned().collect()).await)
    }

    async fn save(&self, user: &User) -> StoreResult<()> {
        let user = user.clone();
        self.file
            .update(|doc| {
                doc.check_unique(&user)?;
                doc.users.insert(user.id.clone(), user);
                Ok(())
            })
            .await
    }

    async fn delete(&self, user: &User) -> StoreResult<()> {
        self.file
            .update(|doc| {
                doc.users.remove(&user.id);
                Ok(())
            })
            .await
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct SessionsDocument {
    #[serde(default)]
    sessions: BTreeMap<String, Session>,
}

pub struct FileSessionStore {
    file: YamlFile<SessionsDocument>,
}

impl FileSessionStore {
    /// Load the store from `path`; a missing file is an empty store.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: PathBuf) -> StoreResult<Self> {
        Ok(Self {
            file: YamlFile::open(path).await?,
        })
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn find(&self, id: &str) -> StoreResult<Option<Session>> {
        Ok(self.file.read(|doc| doc.sessions.get(id).cloned()).await)
    }

    async fn find_by_user(&self, user_id: &str) -> StoreResult<Vec<Session>> {
        if user_id.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .file
            .read(|doc| {
                doc.sessions
                    .values()
                    .filter(|session| session.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn save(&self, session: &Session) -> StoreResult<()> {
        let session = session.clone();
        self.file
            .update(|doc| {
                doc.sessions.insert(session.id.clone(), session);
                Ok(())
            })
            .await
    }

    async fn delete(&self, session: &Session) -> StoreResult<()> {
        self.file
            .update(|doc| {
                doc.sessions.remove(&session.id);
                Ok(())
            })
            .await
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct UserConfigsDocument {
    #[serde(default)]
    userconfigs: BTreeMap<String, UserConfig>,
}

pub struct FileSettingsStore {
    file: YamlFile<UserConfigsDocument>,
}

impl FileSettingsStore {
    /// Load the store from `path`; a missing file is an empty store.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: PathBuf) -> StoreResult<Self> {
        Ok(Self {
            file: YamlFile::open(path).await?,
        })
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn find(&self, user_id: &str) -> StoreResult<Option<UserConfig>> {
        Ok(self
            .file
            .read(|doc| doc.userconfigs.get(user_id).cloned())
            .await)
    }

    async fn save(&self, config: &UserConfig) -> StoreResult<()> {
        let config = config.clone();
        self.file
            .update(|doc| {
                doc.userconfigs.insert(config.user_id.clone(), config);
                Ok(())
            })
            .await
    }

    async fn delete(&self, config: &UserConfig) -> StoreResult<()> {
        self.file
            .update(|doc| {
                doc.userconfigs.remove(&config.user_id);
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::Role;
    use anyhow::Result;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn user(id: &str, username: &str, email: &str) -> User {
        User {
            id: id.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "$2b$10$hash".to_string(),
            role: Role::Standard,
        }
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileUserStore::open(dir.path().join("users.yaml")).await?;
        assert!(store.all().await?.is_empty());
        assert_eq!(store.find("usr_missing").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_document_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("users.yaml");
        std::fs::write(&path, "users: [not, a, map")?;
        assert!(FileUserStore::open(path).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn lookups_ignore_case() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileUserStore::open(dir.path().join("users.yaml")).await?;
        store.save(&user("usr_a", "Alice", "Alice@X.com")).await?;

        let found = store.find_by_username("alice").await?;
        assert_eq!(found.map(|u| u.id), Some("usr_a".to_string()));
        let found = store.find_by_email("alice@x.COM").await?;
        assert_eq!(found.map(|u| u.id), Some("usr_a".to_string()));
        assert_eq!(store.find_by_username("").await?, None);
        assert_eq!(store.find_by_email("").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn saving_twice_keeps_the_file_stable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("users.yaml");
        let store = FileUserStore::open(path.clone()).await?;
        let alice = user("usr_a", "alice", "alice@x.com");

        store.save(&alice).await?;
        let first = std::fs::read_to_string(&path)?;
        store.save(&alice).await?;
        let second = std::fs::read_to_string(&path)?;

        assert_eq!(first, second);
        assert_eq!(store.all().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn reopening_restores_every_record() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("users.yaml");
        let store = FileUserStore::open(path.clone()).await?;
        let alice = user("usr_a", "alice", "alice@x.com");
        let mut bob = user("usr_b", "bob", "bob@x.com");
        bob.role = Role::Admin;
        store.save(&alice).await?;
        store.save(&bob).await?;
        store.delete(&alice).await?;

        let reopened = FileUserStore::open(path).await?;
        assert_eq!(reopened.all().await?, vec![bob]);
        Ok(())
    }

    #[tokio::test]
    async fn sessions_are_found_by_owner() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileSessionStore::open(dir.path().join("sessions.yaml")).await?;
        let expiry = Utc::now() + Duration::hours(1);
        for (id, owner) in [("sess_1", "usr_a"), ("sess_2", "usr_a"), ("sess_3", "usr_b")] {
            store
                .save(&Session {
                    id: id.to_string(),
                    user_id: owner.to_string(),
                    expiry,
                })
                .await?;
        }

        let owned = store.find_by_user("usr_a").await?;
        assert_eq!(owned.len(), 2);
        assert!(store.find_by_user("").await?.is_empty());

        let first = store.find("sess_1").await?;
        assert_eq!(first.as_ref().map(|s| s.expiry), Some(expiry));
        Ok(())
    }

    #[tokio::test]
    async fn deleting_absent_settings_is_not_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileSettingsStore::open(dir.path().join("userconfigs.yaml")).await?;
        store.delete(&UserConfig::defaults("usr_none")).await?;

        let mut config = UserConfig::defaults("usr_a");
        config.language = "de".to_string();
        config.dark_mode = true;
        store.save(&config).await?;
        assert_eq!(store.find("usr_a").await?, Some(config));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_saves_are_all_persisted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("users.yaml");
        let store = Arc::new(FileUserStore::open(path.clone()).await?);

        let mut tasks = Vec::new();
        for n in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .save(&user(&format!("usr_{n}"), &format!("u{n}"), &format!("u{n}@x.com")))
                    .await
            }));
        }
        for task in tasks {
            task.await??;
        }

        let reopened = FileUserStore::open(path).await?;
        assert_eq!(reopened.all().await?.len(), 16);
        Ok(())
    }

    #[tokio::test]
    async fn save_rejects_names_held_by_another_user() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("users.yaml");
        let store = FileUserStore::open(path.clone()).await?;
        let alice = user("usr_a", "alice", "alice@x.com");
        store.save(&alice).await?;

        let result = store.save(&user("usr_b", "ALICE", "other@x.com")).await;
        assert!(matches!(
            result,
            Err(StoreError::Conflict(ValidationError::UsernameTaken))
        ));
        let result = store.save(&user("usr_c", "carol", "Alice@X.com")).await;
        assert!(matches!(
            result,
            Err(StoreError::Conflict(ValidationError::EmailTaken))
        ));

        // The holder itself may be saved again.
        store.save(&alice).await?;
        let reopened = FileUserStore::open(path).await?;
        assert_eq!(reopened.all().await?, vec![alice]);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_saves_of_one_username_keep_a_single_user() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(FileUserStore::open(dir.path().join("users.yaml")).await?);

        let mut tasks = Vec::new();
        for n in 0..8 {
            let store = store.clone();
            let name = if n % 2 == 0 { "alice" } else { "ALICE" };
            tasks.push(tokio::spawn(async move {
                store
                    .save(&user(&format!("usr_{n}"), name, &format!("a{n}@x.com")))
                    .await
            }));
        }
        let mut saved = 0;
        for task in tasks {
            if task.await?.is_ok() {
                saved += 1;
            }
        }
        assert_eq!(saved, 1);
        assert_eq!(store.all().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn legacy_users_file_marks_admin_by_id() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("users.yaml");
        std::fs::write(
            &path,
            r"users:
  admin:
    id: admin
    username: admin
    email: root@localhost
    hashedPassword: $2a$10$N9qo8uLOickgx2ZMRZoMyeIjZAgcfl7p92ldGxad68LJZdL17lhWy
    sessions: []
  usr_b:
    id: usr_b
    username: bob
    email: bob@x.com
    hashedPassword: $2a$10$N9qo8uLOickgx2ZMRZoMyeIjZAgcfl7p92ldGxad68LJZdL17lhWy
    sessions:
    - id: sess_1
      userID: usr_b
      expiry: 2020-01-01T00:00:00Z
",
        )?;
        let store = FileUserStore::open(path).await?;

        let admin = store.find("admin").await?;
        assert_eq!(admin.map(|u| u.role), Some(Role::Admin));
        let bob = store.find_by_username("bob").await?;
        assert_eq!(bob.map(|u| u.role), Some(Role::Standard));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn created_files_are_not_world_readable() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("users.yaml");
        let store = FileUserStore::open(path.clone()).await?;
        store.save(&user("usr_a", "alice", "alice@x.com")).await?;

        let mode = std::fs::metadata(&path)?.permissions().mode();
        assert_eq!(mode & 0o007, 0);
        assert_eq!(mode & 0o600, 0o600);
        Ok(())
    }
}
