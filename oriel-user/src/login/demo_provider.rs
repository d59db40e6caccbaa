use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::login::*;

/// Accepts a single hardcoded account, for development only
#[derive(Default)]
pub struct DemoLoginProvider;

impl DemoLoginProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LoginProvider for DemoLoginProvider {
    async fn login(&self, username: &str, password: &str) -> Result<Principal> {
        tracing::debug!(user=%username, "login");

        if username != "alice" {
            bail!("user does not exist");
        }

        if password != "hunter2" {
            bail!("wrong password");
        }

        Ok(Principal {
            username: username.to_string(),
        })
    }
}
