use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub pid: Option<PathBuf>,
    pub dav: Option<DavConfig>,
    pub dav_unsecure: Option<DavUnsecureConfig>,
    pub users: UserManagement,
    #[serde(default)]
    pub settings: DavSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DavConfig {
    pub bind_addr: SocketAddr,
    pub certs: PathBuf,
    pub key: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DavUnsecureConfig {
    pub bind_addr: SocketAddr,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "user_driver")]
pub enum UserManagement {
    Demo,
    Static(LoginStaticConfig),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginStaticConfig {
    pub user_list: PathBuf,
}

/// Protocol level knobs of the WebDAV engine
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DavSettings {
    /// Reject MKCOL requests carrying a body with 415
    #[serde(default)]
    pub strict_mkcol_body: bool,
    /// Number of levels walked by a `Depth: infinity` PROPFIND
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Behave as if every request carried `Brief: t`
    #[serde(default)]
    pub brief_default: bool,
    /// Storage quota of the in-memory tree, unlimited when absent
    #[serde(default)]
    pub quota_bytes: Option<u64>,
}
impl Default for DavSettings {
    fn default() -> Self {
        Self {
            strict_mkcol_body: false,
            max_depth: default_max_depth(),
            brief_default: false,
            quota_bytes: None,
        }
    }
}

fn default_max_depth() -> u32 {
    3
}

// ---
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserEntry {
    pub password: String,
}

pub type UserList = HashMap<String, UserEntry>;

pub fn read_config<T: serde::de::DeserializeOwned>(config_file: PathBuf) -> Result<T> {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .open(config_file.as_path())?;

    let mut config = String::new();
    file.read_to_string(&mut config)?;

    Ok(toml::from_str(&config)?)
}

pub fn write_config<T: Serialize>(config_file: PathBuf, config: &T) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(config_file.as_path())?;

    file.write_all(toml::to_string(config)?.as_bytes())?;

    Ok(())
}
