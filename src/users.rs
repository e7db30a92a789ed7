use std::path::PathBuf;

use anyhow::anyhow;
use regex::{Regex, RegexBuilder};

use crate::auth;
use crate::error::{LibError, Result};
use crate::models::{NewUser, PublicUser, User, UserId, UserPatch};
use crate::store::{Collection, Record, RecordStore};

const SEARCH_PATTERN_SIZE_LIMIT: usize = 1 << 20;

impl Record for User {
    fn id(&self) -> u64 {
        self.userid.0
    }
}

pub struct UserStore {
    records: RecordStore<User>,
}

impl UserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            records: RecordStore::new(path, "users"),
        }
    }

    pub async fn list(&self) -> Result<Vec<PublicUser>> {
        let users = self.records.list().await?;
        Ok(users.into_iter().map(PublicUser::from).collect())
    }

    pub async fn get(&self, id: UserId) -> Result<Option<PublicUser>> {
        Ok(self.records.get(id.0).await?.map(PublicUser::from))
    }

    /// Case-insensitive match of `query` against full name, username and email.
    /// Queries that are not valid regular expressions match literally.
    pub async fn search(&self, query: &str) -> Result<Vec<PublicUser>> {
        let pattern = search_pattern(query)?;
        let users = self
            .records
            .filter(|user| {
                pattern.is_match(&user.fullname)
                    || pattern.is_match(&user.username)
                    || pattern.is_match(&user.email)
            })
            .await?;
        Ok(users.into_iter().map(PublicUser::from).collect())
    }

    pub async fn add(&self, new_user: NewUser) -> Result<PublicUser> {
        let NewUser {
            fullname,
            email,
            username,
            password,
            is_admin,
        } = new_user;
        let password_hash = off_runtime(move || auth::hash_password(&password)).await??;
        let user = self
            .records
            .insert(move |id, collection| {
                ensure_email_available(collection, &email, None)?;
                Ok(User {
                    userid: UserId(id),
                    fullname,
                    email,
                    username,
                    password_hash,
                    is_admin,
                })
            })
            .await?;

        tracing::info!(userid = %user.userid, "user registered");
        Ok(user.into())
    }

    pub async fn update(&self, id: UserId, mut patch: UserPatch) -> Result<Option<PublicUser>> {
        let password_hash = match patch.password.take() {
            Some(password) => Some(off_runtime(move || auth::hash_password(&password)).await??),
            None => None,
        };

        let updated = self
            .records
            .update(id.0, move |user, collection| {
                if let Some(email) = patch.email {
                    ensure_email_available(collection, &email, Some(id))?;
                    user.email = email;
                }
                if let Some(fullname) = patch.fullname {
                    user.fullname = fullname;
                }
                if let Some(username) = patch.username {
                    user.username = username;
                }
                if let Some(is_admin) = patch.is_admin {
                    user.is_admin = is_admin;
                }
                if let Some(password_hash) = password_hash {
                    user.password_hash = password_hash;
                }
                Ok(())
            })
            .await?;

        Ok(updated.map(PublicUser::from))
    }

    pub async fn remove(&self, id: UserId) -> Result<Option<PublicUser>> {
        Ok(self.records.remove(id.0).await?.map(PublicUser::from))
    }

    /// Looks the account up by email and checks the password. Unknown emails and
    /// wrong passwords fail identically.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let email = email.trim().to_lowercase();
        let user = self
            .records
            .read(|collection| {
                collection
                    .items()
                    .iter()
                    .find(|user| same_email(&user.email, &email))
                    .cloned()
            })
            .await?;

        let password = password.to_string();
        let Some(user) = user else {
            off_runtime(move || auth::verify_against_dummy(&password)).await?;
            return Err(LibError::invalid_credentials());
        };

        let stored_hash = user.password_hash.clone();
        if off_runtime(move || auth::verify_password(&password, &stored_hash)).await? {
            Ok(user)
        } else {
            tracing::debug!(userid = %user.userid, "password mismatch");
            Err(LibError::invalid_credentials())
        }
    }
}

/// Argon2 work is CPU bound; keep it off the async workers.
async fn off_runtime<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| LibError::unknown("Password processing failed", anyhow!(err)))
}

/// Stored emails are normalized on write, but documents written elsewhere may
/// not be.
fn same_email(stored: &str, normalized: &str) -> bool {
    stored.trim().to_lowercase() == normalized
}

fn ensure_email_available(
    collection: &Collection<User>,
    email: &str,
    owner: Option<UserId>,
) -> Result<()> {
    let taken = collection
        .items()
        .iter()
        .any(|user| same_email(&user.email, email) && Some(user.userid) != owner);
    if taken {
        return Err(LibError::conflict(
            "email_taken",
            "Email is already registered",
            anyhow!("email {} belongs to another user", email),
        ));
    }
    Ok(())
}

fn search_pattern(query: &str) -> Result<Regex> {
    RegexBuilder::new(query)
        .case_insensitive(true)
        .size_limit(SEARCH_PATTERN_SIZE_LIMIT)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(query))
                .case_insensitive(true)
                .size_limit(SEARCH_PATTERN_SIZE_LIMIT)
                .build()
        })
        .map_err(|err| {
            LibError::invalid_with_code("invalid_query", "Search query is invalid", anyhow!(err))
        })
}

#[cfg(test)]
mod tests {
    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::error::ErrorKind;

    fn store() -> (TempDir, UserStore) {
        let dir = tempdir().expect("tempdir");
        let store = UserStore::new(dir.path().join("users.json"));
        (dir, store)
    }

    fn new_user(fullname: &str, email: &str, username: &str) -> NewUser {
        NewUser {
            fullname: fullname.to_string(),
            email: email.to_string(),
            username: username.to_string(),
            password: "hunter22".to_string(),
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn add_assigns_fresh_ids_and_hides_password() {
        let (dir, store) = store();
        let ada = store
            .add(new_user("Ada Lovelace", "ada@example.com", "ada"))
            .await
            .expect("add");
        let alan = store
            .add(new_user("Alan Turing", "alan@example.com", "alan"))
            .await
            .expect("add");
        assert_eq!(ada.userid, UserId(0));
        assert_eq!(alan.userid, UserId(1));

        let listed = serde_json::to_value(store.list().await.expect("list")).expect("json");
        assert_eq!(listed.as_array().map(Vec::len), Some(2));
        assert!(listed[0].get("password").is_none());
        assert!(listed[0].get("passwordHash").is_none());

        let on_disk = std::fs::read_to_string(dir.path().join("users.json")).expect("document");
        assert!(!on_disk.contains("hunter22"));
        assert!(on_disk.contains("$argon2"));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let (_dir, store) = store();
        store
            .add(new_user("Ada", "ada@example.com", "ada"))
            .await
            .expect("add");
        let err = store
            .add(new_user("Other Ada", "ada@example.com", "ada2"))
            .await
            .expect_err("duplicate email");
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(store.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn search_is_case_insensitive_across_fields() {
        let (_dir, store) = store();
        store
            .add(new_user("Ada Lovelace", "ada@example.com", "countess"))
            .await
            .expect("add");
        store
            .add(new_user("Alan Turing", "alan@bletchley.org", "alan"))
            .await
            .expect("add");

        let by_name = store.search("LOVELACE").await.expect("search");
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].username, "countess");

        let by_email = store.search("bletchley").await.expect("search");
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].fullname, "Alan Turing");

        let by_pattern = store.search("^a").await.expect("search");
        assert_eq!(by_pattern.len(), 2);
    }

    #[tokio::test]
    async fn invalid_pattern_matches_literally() {
        let (_dir, store) = store();
        store
            .add(new_user("Grace (Amazing) Hopper", "grace@navy.mil", "grace"))
            .await
            .expect("add");

        let found = store.search("(amazing").await.expect("search");
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn update_merges_only_supplied_fields() {
        let (_dir, store) = store();
        let ada = store
            .add(new_user("Ada", "ada@example.com", "ada"))
            .await
            .expect("add");

        let patch = UserPatch {
            username: Some("countess".to_string()),
            ..Default::default()
        };
        let updated = store
            .update(ada.userid, patch)
            .await
            .expect("update")
            .expect("user exists");

        assert_eq!(updated.username, "countess");
        assert_eq!(updated.fullname, ada.fullname);
        assert_eq!(updated.email, ada.email);
        assert_eq!(updated.is_admin, ada.is_admin);
    }

    #[tokio::test]
    async fn update_password_is_rehashed() {
        let (_dir, store) = store();
        let ada = store
            .add(new_user("Ada", "ada@example.com", "ada"))
            .await
            .expect("add");

        let patch = UserPatch {
            password: Some("new-secret".to_string()),
            ..Default::default()
        };
        store.update(ada.userid, patch).await.expect("update");

        assert!(store.authenticate("ada@example.com", "hunter22").await.is_err());
        assert!(store.authenticate("ada@example.com", "new-secret").await.is_ok());
    }

    #[tokio::test]
    async fn update_rejects_email_owned_by_someone_else() {
        let (_dir, store) = store();
        store
            .add(new_user("Ada", "ada@example.com", "ada"))
            .await
            .expect("add");
        let alan = store
            .add(new_user("Alan", "alan@example.com", "alan"))
            .await
            .expect("add");

        let patch = UserPatch {
            email: Some("ada@example.com".to_string()),
            ..Default::default()
        };
        let err = store
            .update(alan.userid, patch)
            .await
            .expect_err("taken email");
        assert_eq!(err.code, "email_taken");

        // Re-submitting one's own email is fine.
        let patch = UserPatch {
            email: Some("alan@example.com".to_string()),
            ..Default::default()
        };
        assert!(store.update(alan.userid, patch).await.is_ok());
    }

    #[tokio::test]
    async fn update_and_remove_missing_user_return_none() {
        let (_dir, store) = store();
        assert!(
            store
                .update(UserId(3), UserPatch::default())
                .await
                .expect("update")
                .is_none()
        );
        assert!(store.remove(UserId(3)).await.expect("remove").is_none());
    }

    #[tokio::test]
    async fn removed_user_is_gone() {
        let (_dir, store) = store();
        let ada = store
            .add(new_user("Ada", "ada@example.com", "ada"))
            .await
            .expect("add");

        let removed = store.remove(ada.userid).await.expect("remove");
        assert_eq!(removed, Some(ada.clone()));
        assert!(store.get(ada.userid).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn authenticate_checks_credentials() {
        let (_dir, store) = store();
        let ada = store
            .add(new_user("Ada", "ada@example.com", "ada"))
            .await
            .expect("add");

        let user = store
            .authenticate(" ADA@example.com ", "hunter22")
            .await
            .expect("valid credentials");
        assert_eq!(user.userid, ada.userid);

        let wrong = store
            .authenticate("ada@example.com", "nope")
            .await
            .expect_err("wrong password");
        let unknown = store
            .authenticate("nobody@example.com", "hunter22")
            .await
            .expect_err("unknown email");
        assert_eq!(wrong.code, "invalid_credentials");
        assert_eq!(unknown.code, wrong.code);
        assert_eq!(unknown.public, wrong.public);
    }

    #[tokio::test]
    async fn mixed_case_stored_email_still_logs_in() {
        let (dir, store) = store();
        let hash = auth::hash_password("hunter22").expect("hash");
        let document = serde_json::json!({
            "items": [{
                "userid": 4,
                "fullname": "Grace Hopper",
                "email": " Grace@Navy.MIL",
                "username": "grace",
                "passwordHash": hash,
                "isAdmin": false
            }],
            "nextId": 5
        });
        std::fs::write(dir.path().join("users.json"), document.to_string()).expect("write");

        let user = store
            .authenticate("grace@navy.mil", "hunter22")
            .await
            .expect("login");
        assert_eq!(user.userid, UserId(4));

        let err = store
            .add(new_user("Impostor", "GRACE@navy.mil", "grace2"))
            .await
            .expect_err("email already taken");
        assert_eq!(err.code, "email_taken");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_logins_resolve_independently() {
        let (_dir, store) = store();
        store
            .add(new_user("Ada", "ada@example.com", "ada"))
            .await
            .expect("add");
        let store = std::sync::Arc::new(store);

        let handles = (0..4)
            .map(|n| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    let password = if n % 2 == 0 { "hunter22" } else { "wrong" };
                    store.authenticate("ada@example.com", password).await.is_ok()
                })
            })
            .collect::<Vec<_>>();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.expect("login task"));
        }
        assert_eq!(outcomes, vec![true, false, true, false]);
    }
}
