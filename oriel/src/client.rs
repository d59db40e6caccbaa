use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use clap::Subcommand;

use oriel_client::listener::ProgressListener;
use oriel_client::{Host, HostConfig, Path, Resource};

#[derive(clap::Args, Debug)]
pub struct Connection {
    /// Base URL of the remote tree
    #[clap(long, env = "ORIEL_URL")]
    url: String,

    #[clap(short, long, env = "ORIEL_USER")]
    user: Option<String>,

    /// Prompted for when a user is given without it
    #[clap(long, env = "ORIEL_PASSWORD")]
    password: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ClientCommand {
    /// List the children of a folder
    Ls {
        #[clap(default_value = "/")]
        path: String,
    },
    /// Download a file, into a local file or directory
    Get { path: String, dest: PathBuf },
    /// Upload a local file or directory into a remote folder, created if missing
    Put {
        local: PathBuf,
        #[clap(default_value = "/")]
        folder: String,
    },
    /// Create a folder and its missing parents
    Mkdir { path: String },
    Rm { path: String },
    /// Move a resource into a folder
    Mv {
        path: String,
        folder: String,
        #[clap(long)]
        name: Option<String>,
    },
    /// Copy a resource into a folder
    Cp {
        path: String,
        folder: String,
        #[clap(long)]
        name: Option<String>,
    },
    /// Take an exclusive write lock, the token is printed
    Lock {
        path: String,
        /// Seconds, no expiry when absent
        #[clap(long)]
        timeout: Option<u64>,
    },
    Unlock { path: String, token: String },
}

struct TermProgress;
impl ProgressListener for TermProgress {
    fn on_progress(&self, bytes: u64, total: Option<u64>, name: &str) {
        match total {
            Some(t) => eprint!("\r{}: {}/{} bytes", name, bytes, t),
            None => eprint!("\r{}: {} bytes", name, bytes),
        }
    }

    fn on_complete(&self, _name: &str) {
        eprintln!();
    }
}

fn connect(conn: &Connection) -> Result<Host> {
    let mut config = HostConfig::new(&conn.url)?;
    if let Some(user) = &conn.user {
        let password = match &conn.password {
            Some(p) => p.clone(),
            None => rpassword::prompt_password(format!("Password for {}: ", user))?,
        };
        config = config.with_credentials(user, &password);
    }
    Ok(Host::new(config)?)
}

async fn find(host: &Host, raw: &str) -> Result<Resource> {
    host.find(&Path::parse(raw))
        .await?
        .ok_or_else(|| anyhow!("{} does not exist", raw))
}

pub async fn run(conn: &Connection, cmd: &ClientCommand) -> Result<()> {
    let host = connect(conn)?;
    match cmd {
        ClientCommand::Ls { path } => {
            let folder = host
                .get_folder(&Path::parse(path))
                .await?
                .ok_or_else(|| anyhow!("{} does not exist", path))?;
            for child in folder.children().await? {
                match &child {
                    Resource::Folder(_) => println!("{}/", child.name()),
                    Resource::File(f) => println!(
                        "{}\t{}",
                        child.name(),
                        f.content_length().map(|l| l.to_string()).unwrap_or_default()
                    ),
                }
            }
        }
        ClientCommand::Get { path, dest } => match find(&host, path).await? {
            Resource::File(f) => {
                f.download_to_file(dest, Some(&TermProgress)).await?;
            }
            Resource::Folder(_) => bail!("{} is a folder", path),
        },
        ClientCommand::Put { local, folder } => {
            let target = host
                .get_or_create_folder(&Path::parse(folder), true)
                .await?
                .ok_or_else(|| anyhow!("{} is not a folder", folder))?;
            let progress: Arc<dyn ProgressListener> = Arc::new(TermProgress);
            if tokio::fs::metadata(local).await?.is_dir() {
                target.upload_folder(local, Some(progress)).await?;
            } else {
                target.upload_file(local, Some(progress)).await?;
            }
        }
        ClientCommand::Mkdir { path } => {
            host.get_or_create_folder(&Path::parse(path), true)
                .await?
                .ok_or_else(|| anyhow!("a file stands in the way of {}", path))?;
        }
        ClientCommand::Rm { path } => {
            find(&host, path).await?.delete().await?;
        }
        ClientCommand::Mv { path, folder, name } => {
            let dest = host
                .get_folder(&Path::parse(folder))
                .await?
                .ok_or_else(|| anyhow!("{} does not exist", folder))?;
            let mut res = find(&host, path).await?;
            res.move_to(&dest, name.as_deref()).await?;
            println!("{}", res.path());
        }
        ClientCommand::Cp { path, folder, name } => {
            let dest = host
                .get_folder(&Path::parse(folder))
                .await?
                .ok_or_else(|| anyhow!("{} does not exist", folder))?;
            find(&host, path)
                .await?
                .copy_to(&dest, name.as_deref())
                .await?;
        }
        ClientCommand::Lock { path, timeout } => {
            let mut res = find(&host, path).await?;
            res.lock(*timeout).await?;
            println!("{}", res.lock_token().unwrap_or_default());
        }
        ClientCommand::Unlock { path, token } => {
            host.do_unlock(&Path::parse(path), token).await?;
        }
    }
    Ok(())
}
