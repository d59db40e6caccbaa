use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use futures::try_join;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use oriel_proto::dav;
use oriel_proto::dav::memory::MemoryFs;
use oriel_proto::dav::DavContext;
use oriel_user::config::*;
use oriel_user::login::{demo_provider::*, static_provider::*, *};

pub struct Server {
    dav_unsecure_server: Option<dav::Server>,
    dav_server: Option<dav::Server>,
    pid_file: Option<PathBuf>,
}

impl Server {
    pub async fn from_config(config: Config, dev: bool) -> Result<Self> {
        tracing::info!("Init as a WebDAV server");
        let login: ArcLoginProvider = match config.users {
            UserManagement::Demo => Arc::new(DemoLoginProvider::new()),
            UserManagement::Static(x) => Arc::new(StaticLoginProvider::new(x).await?),
        };

        let fs = MemoryFs::new(config.settings.quota_bytes);
        if dev {
            seed_demo(&fs)?;
        }
        let context = DavContext::new(Arc::new(fs), config.settings.clone());

        let dav_unsecure_server = config
            .dav_unsecure
            .map(|dav_config| dav::new_unsecure(dav_config, login.clone(), context.clone()));
        let dav_server = config
            .dav
            .map(|dav_config| dav::new(dav_config, login.clone(), context.clone()))
            .transpose()?;

        Ok(Self {
            dav_unsecure_server,
            dav_server,
            pid_file: config.pid,
        })
    }

    pub async fn run(self) -> Result<()> {
        let pid = std::process::id();
        tracing::info!(pid = pid, "Starting main loops");

        // write the pid file
        if let Some(pid_file) = self.pid_file {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(pid_file)?;
            file.write_all(pid.to_string().as_bytes())?;
            drop(file);
        }

        let exit_signal = watch_ctrl_c();

        try_join!(
            async {
                match self.dav_unsecure_server {
                    None => Ok(()),
                    Some(s) => s.run(exit_signal.clone()).await,
                }
            },
            async {
                match self.dav_server {
                    None => Ok(()),
                    Some(s) => s.run(exit_signal.clone()).await,
                }
            },
        )?;

        Ok(())
    }
}

/// A small tree to click around in `--dev` mode
fn seed_demo(fs: &MemoryFs) -> Result<()> {
    fs.mkdir_all("/documents/drafts")?;
    fs.mkdir_all("/photos")?;
    fs.write_file(
        "/documents/readme.txt",
        "Welcome to Oriel, a WebDAV server.\n",
        Some("text/plain"),
    )?;
    fs.write_file(
        "/documents/drafts/todo.md",
        "- try LOCK\n- try PROPPATCH\n",
        Some("text/markdown"),
    )?;
    tracing::info!(used = fs.used_bytes(), "demo tree seeded");
    Ok(())
}

/// Shut down on CTRL+C or SIGTERM
pub fn watch_ctrl_c() -> watch::Receiver<bool> {
    let (send_cancel, watch_cancel) = watch::channel(false);
    tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(err=?e, "failed to install SIGTERM signal handler");
                return;
            }
        };
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::error!(err=?e, "failed to install CTRL+C signal handler");
                    return;
                }
                tracing::info!("Received CTRL+C, shutting down.");
            }
            _ = term.recv() => tracing::info!("Received SIGTERM, shutting down."),
        }
        let _ = send_cancel.send(true);
    });
    watch_cancel
}
