mod client;
mod server;

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use nix::{sys::signal, unistd::Pid};

use oriel_user::config::*;
use oriel_user::login::hash_password;

use client::{ClientCommand, Connection};
use server::Server;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// A special mode dedicated to developers, NOT INTENDED FOR PRODUCTION
    #[clap(long)]
    dev: bool,

    #[clap(short, long, env = "ORIEL_CONFIG", default_value = "oriel.toml")]
    /// Path to the main Oriel configuration file
    config_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the WebDAV server, serving an in-memory tree
    Daemon,

    /// Reload the user list of a running daemon
    Reload {
        #[clap(short, long, env = "ORIEL_PID")]
        pid: Option<i32>,
    },

    /// Drive a remote WebDAV server
    Client {
        #[clap(flatten)]
        connection: Connection,

        #[clap(subcommand)]
        action: ClientCommand,
    },

    #[clap(subcommand)]
    /// Specific tooling, should not be part of a normal workflow
    Tools(ToolsCommand),
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// Hash a password for the static user list
    PasswordHash {
        #[clap(env = "ORIEL_PASSWORD")]
        maybe_password: Option<String>,
    },
}

fn tracer() {
    tracing_subscriber::fmt::init();
}

fn dev_config() -> Config {
    use std::net::*;
    Config {
        pid: None,
        dav: None,
        dav_unsecure: Some(DavUnsecureConfig {
            bind_addr: SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1)), 8087),
        }),
        users: UserManagement::Demo,
        settings: DavSettings::default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "main=info,oriel=info")
    }

    // Abort on panic (same behavior as in Go)
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{}", panic_info);
        eprintln!("{:?}", backtrace::Backtrace::new());
        std::process::abort();
    }));

    tracer();

    let args = Args::parse();
    match &args.command {
        Command::Daemon => {
            let config = match args.dev {
                true => dev_config(),
                false => read_config(args.config_file)?,
            };
            let server = Server::from_config(config, args.dev).await?;
            server.run().await?;
        }
        Command::Reload { pid } => {
            let pid_path = match args.dev {
                true => None,
                false => read_config::<Config>(args.config_file)?.pid,
            };
            reload(*pid, pid_path)?;
        }
        Command::Client { connection, action } => {
            client::run(connection, action).await?;
        }
        Command::Tools(ToolsCommand::PasswordHash { maybe_password }) => {
            let password = match maybe_password {
                Some(pwd) => pwd.clone(),
                None => {
                    let password = rpassword::prompt_password("Enter password: ")?;
                    let password_confirm = rpassword::prompt_password("Confirm password: ")?;
                    if password != password_confirm {
                        bail!("Passwords don't match.");
                    }
                    password
                }
            };
            println!("{}", hash_password(&password)?);
        }
    }

    Ok(())
}

fn reload(pid: Option<i32>, pid_path: Option<PathBuf>) -> Result<()> {
    let final_pid = match (pid, pid_path) {
        (Some(pid), _) => pid,
        (_, Some(path)) => {
            let mut f = std::fs::OpenOptions::new().read(true).open(path)?;
            let mut pidstr = String::new();
            f.read_to_string(&mut pidstr)?;
            pidstr.trim().parse::<i32>()?
        }
        _ => bail!("Unable to infer your daemon's PID"),
    };
    let pid = Pid::from_raw(final_pid);
    signal::kill(pid, signal::Signal::SIGUSR1)?;
    Ok(())
}
