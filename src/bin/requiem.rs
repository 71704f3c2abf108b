//! CLI entry point: parses flags, optionally loads a config file, wires up
//! tracing, and serves forever.

use std::path::PathBuf;

use clap::Parser;
use requiem::{Encoding, Propagation, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

/// Filtered, framed TCP application server.
#[derive(Debug, Parser)]
#[command(name = "requiem", version = requiem::VERSION)]
struct Cli {
    /// Bind address.
    #[arg(long)]
    addr: Option<String>,

    /// Bind port.
    #[arg(long)]
    port: Option<u16>,

    /// Read chunk size in bytes.
    #[arg(long)]
    buf: Option<usize>,

    /// Connection-lifetime deadline, in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Width in bytes of the content_length header field.
    #[arg(long)]
    header_size: Option<usize>,

    /// Byte order of the content_length header field: "big" or "little".
    #[arg(long)]
    byteorder: Option<String>,

    /// Server-default payload encoding: "json" or "compact".
    #[arg(long)]
    encoding: Option<String>,

    /// Maximum concurrent sessions per address; 0 disables the limit.
    #[arg(long)]
    session_limit: Option<usize>,

    /// Optional TOML config file providing a `[server]` table; CLI flags
    /// override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load_from_file(path)?,
        None => ServerConfig::default(),
    };

    if let Some(addr) = cli.addr {
        config.addr = addr;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(buf) = cli.buf {
        config.buf = buf;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout = timeout;
    }
    if let Some(header_size) = cli.header_size {
        config.header_size = header_size;
    }
    if let Some(byteorder) = cli.byteorder {
        config.byteorder = requiem::ByteOrder::parse(&byteorder)
            .ok_or_else(|| anyhow::anyhow!("invalid --byteorder {byteorder:?}"))?;
    }
    if let Some(encoding) = cli.encoding {
        config.default_encoding = match encoding.as_str() {
            "json" => Encoding::Text,
            "compact" => Encoding::Compact,
            other => anyhow::bail!("invalid --encoding {other:?}"),
        };
    }
    if let Some(session_limit) = cli.session_limit {
        config.session_limit = session_limit;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let mut server = Server::new(config);
        // Default echo handler: a real deployment registers its own
        // handlers before calling serve(); this keeps a bare `requiem`
        // invocation useful for manual wire-protocol testing.
        server.register(0, vec![], |client, message| async move {
            client.send(&message.payload, None, false).await.ok();
            Ok(Propagation::Continue)
        });

        match server.serve().await {
            Ok(()) => {}
            Err(requiem::ServerError::PortUnavailable(err)) => {
                eprintln!("PORT_UNAVAILABLE: {err}");
                std::process::exit(1);
            }
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        }
    });

    Ok(())
}
