use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use crate::config::*;
use crate::login::*;

pub struct ContextualUserEntry {
    pub username: String,
    pub config: UserEntry,
}

#[derive(Default)]
pub struct UserDatabase {
    users: HashMap<String, Arc<ContextualUserEntry>>,
}

pub struct StaticLoginProvider {
    user_db: watch::Receiver<UserDatabase>,
}

fn build_database(ulist: UserList) -> UserDatabase {
    let users = ulist
        .into_iter()
        .map(|(username, config)| {
            (
                username.clone(),
                Arc::new(ContextualUserEntry { username, config }),
            )
        })
        .collect::<HashMap<_, _>>();
    UserDatabase { users }
}

pub async fn update_user_list(config: PathBuf, up: watch::Sender<UserDatabase>) -> Result<()> {
    let mut stream = signal(SignalKind::user_defined1())
        .context("failed to install SIGUSR1 signal hander for reload")?;

    loop {
        let ulist: UserList = match read_config(config.clone()) {
            Ok(x) => x,
            Err(e) => {
                tracing::warn!(path=%config.as_path().to_string_lossy(), error=%e, "Unable to load config");
                stream.recv().await;
                continue;
            }
        };

        let db = build_database(ulist);
        tracing::info!("{} users loaded", db.users.len());
        up.send(db).context("update user db config")?;
        stream.recv().await;
        tracing::info!("Received SIGUSR1, reloading");
    }
}

impl StaticLoginProvider {
    pub async fn new(config: LoginStaticConfig) -> Result<Self> {
        let (tx, mut rx) = watch::channel(UserDatabase::default());

        tokio::spawn(async move {
            if let Err(e) = update_user_list(config.user_list, tx).await {
                tracing::error!(err=?e, "user list reloader stopped");
            }
        });
        rx.changed().await?;

        Ok(Self { user_db: rx })
    }
}

#[async_trait]
impl LoginProvider for StaticLoginProvider {
    async fn login(&self, username: &str, password: &str) -> Result<Principal> {
        tracing::debug!(user=%username, "login");
        let user = {
            let user_db = self.user_db.borrow();
            match user_db.users.get(username) {
                None => bail!("User {} does not exist", username),
                Some(u) => u.clone(),
            }
        };

        tracing::debug!(user=%username, "verify password");
        if !verify_password(password, &user.config.password)? {
            bail!("Wrong password");
        }

        tracing::debug!(user=%username, "logged");
        Ok(Principal {
            username: user.username.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_user_list() {
        let path = std::env::temp_dir().join(format!("oriel-static-{}.toml", std::process::id()));
        let mut users = UserList::new();
        users.insert(
            "bob".into(),
            UserEntry {
                password: hash_password("s3cret").unwrap(),
            },
        );
        write_config(path.clone(), &users).unwrap();

        let provider = StaticLoginProvider::new(LoginStaticConfig {
            user_list: path.clone(),
        })
        .await
        .unwrap();
        std::fs::remove_file(path).unwrap();

        assert_eq!(provider.login("bob", "s3cret").await.unwrap().username, "bob");
        assert!(provider.login("bob", "wrong").await.is_err());
        assert!(provider.login("carol", "s3cret").await.is_err());
    }
}
