use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use vaktpost_net::{Network, ShutdownMode, SocketInterest, SysNetwork};
use vaktpost_service::{create, ServiceError, ServiceKind, SocketService};

use crate::settings::Settings;

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Optional YAML settings file; flags override its values.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a loopback echo server on the readiness service
    Serve(ServeArgs),
    /// Connect to a running server and round-trip one message
    Send(SendArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    pub listen: SocketAddr,

    #[arg(short, long, value_enum, default_value_t = Backend::Default)]
    pub backend: Backend,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    pub addr: SocketAddr,

    #[arg(short, long, default_value = "ping over vaktpost")]
    pub message: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Default,
    Select,
    Epoll,
    Kqueue,
    Iocp,
}

impl Backend {
    fn kind(self) -> ServiceKind {
        match self {
            Backend::Default => ServiceKind::Default,
            Backend::Select => ServiceKind::Select,
            Backend::Epoll => ServiceKind::Epoll,
            Backend::Kqueue => ServiceKind::Kqueue,
            Backend::Iocp => ServiceKind::Iocp,
        }
    }

    fn parse(name: &str) -> anyhow::Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "default" => Ok(Backend::Default),
            "select" => Ok(Backend::Select),
            "epoll" => Ok(Backend::Epoll),
            "kqueue" => Ok(Backend::Kqueue),
            "iocp" => Ok(Backend::Iocp),
            other => bail!("unknown backend '{other}'"),
        }
    }
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    match cli.command {
        Commands::Serve(mut args) => {
            if let Some(listen) = settings.listen {
                args.listen = listen;
            }
            if let Some(backend) = &settings.backend {
                args.backend = Backend::parse(backend)?;
            }
            serve(args)
        }
        Commands::Send(mut args) => {
            if let Some(message) = settings.message {
                args.message = message;
            }
            send(args)
        }
    }
}

fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let net: Arc<dyn Network> = Arc::new(SysNetwork::new());
    let service: Arc<dyn SocketService> = create(args.backend.kind(), Arc::clone(&net))?;
    service.start()?;

    let listener = net.tcp_socket(args.listen.is_ipv6())?;
    net.bind(listener, args.listen)?;
    net.listen(listener, 64)?;
    net.set_blocking(listener, false)?;
    service.add(listener, SocketInterest::READ)?;

    info!(addr = %args.listen, backend = ?service.kind(), "echo server listening");

    loop {
        let events = match service.execute(Some(Duration::from_millis(500))) {
            Ok(events) => events,
            Err(ServiceError::Interrupted) => break,
            Err(err) => return Err(err.into()),
        };

        for event in events {
            if event.sock == listener {
                accept_ready(&net, &service, listener)?;
                continue;
            }

            let gone = event.events.intersects(
                SocketInterest::ERROR | SocketInterest::HANG_UP | SocketInterest::INVALID,
            );
            if gone || event.events.contains(SocketInterest::READ) {
                echo_ready(&net, &service, event.sock, gone)?;
            }
        }
    }

    let _ = net.close(listener);
    Ok(())
}

fn accept_ready(
    net: &Arc<dyn Network>,
    service: &Arc<dyn SocketService>,
    listener: vaktpost_net::Socket,
) -> anyhow::Result<()> {
    loop {
        match net.accept(listener) {
            Ok(conn) => {
                net.set_blocking(conn, false)?;
                service.add(conn, SocketInterest::READ)?;
                info!(socket = conn, "connection accepted");
            }
            Err(err) if err.is_would_block() => return Ok(()),
            Err(err) => {
                warn!(error = %err, "accept failed");
                return Ok(());
            }
        }
    }
}

fn echo_ready(
    net: &Arc<dyn Network>,
    service: &Arc<dyn SocketService>,
    sock: vaktpost_net::Socket,
    gone: bool,
) -> anyhow::Result<()> {
    let mut buf = [0u8; 4096];
    let mut drop_conn = gone;

    if !drop_conn {
        loop {
            match net.recv(sock, &mut buf) {
                Ok(0) => {
                    drop_conn = true;
                    break;
                }
                Ok(n) => {
                    // Best-effort echo; a short or refused write closes the
                    // connection rather than queueing.
                    if net.send(sock, &buf[..n]).is_err() {
                        drop_conn = true;
                        break;
                    }
                }
                Err(err) if err.is_would_block() => break,
                Err(err) => {
                    warn!(socket = sock, error = %err, "recv failed");
                    drop_conn = true;
                    break;
                }
            }
        }
    }

    if drop_conn {
        service.close(sock)?;
        let _ = net.close(sock);
        info!(socket = sock, "connection closed");
    }
    Ok(())
}

fn send(args: SendArgs) -> anyhow::Result<()> {
    let net = SysNetwork::new();

    let sock = net.tcp_socket(args.addr.is_ipv6())?;
    net.connect(sock, args.addr)
        .with_context(|| format!("failed to connect to {}", args.addr))?;

    let payload = args.message.as_bytes();
    let written = net.send(sock, payload)?;
    if written != payload.len() {
        bail!("short write: {written} of {} bytes", payload.len());
    }
    net.shutdown(sock, ShutdownMode::Write)?;

    let mut echoed = Vec::with_capacity(payload.len());
    let mut buf = [0u8; 4096];
    while echoed.len() < payload.len() {
        match net.recv(sock, &mut buf)? {
            0 => break,
            n => echoed.extend_from_slice(&buf[..n]),
        }
    }

    net.close(sock)?;

    if echoed != payload {
        bail!("echo mismatch: sent {:?}, got {:?}", args.message, echoed);
    }
    info!(addr = %args.addr, bytes = echoed.len(), "echo verified");
    Ok(())
}
