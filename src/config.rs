use std::net::{Ipv4Addr, SocketAddr};

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};

pub const DEFAULT_PORT: u16 = 7757;

/// Forward every TCP connection on a local port to a fixed upstream.
///
/// Each option may also be set through the environment variable shown; an
/// explicit flag wins over the environment.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// The target to forward to, like: example.com:8080
    #[arg(short, long, env = "TARGET", value_parser = parse_target)]
    pub target: String,

    /// The incoming listening port
    #[arg(
        short,
        long,
        env = "PORT",
        default_value_t = DEFAULT_PORT,
        value_parser = clap::value_parser!(u16).range(1..),
    )]
    pub port: u16,

    /// Print debug logging
    #[arg(
        short = 'v',
        long = "verbose",
        env = "V",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new(),
    )]
    pub verbose: bool,
}

impl Config {
    /// The listening address on all IPv4 interfaces.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

/// Checks that `s` looks like `host:port` without resolving it.
pub fn parse_target(s: &str) -> Result<String, String> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("`{s}` is missing a port, expected <host>:<port>"))?;

    let host = match host.strip_prefix('[') {
        Some(rest) => rest
            .strip_suffix(']')
            .ok_or_else(|| format!("`{s}` has an unterminated IPv6 literal"))?,
        None if host.contains(':') => {
            return Err(format!("`{s}` IPv6 hosts must be written as [addr]:port"))
        }
        None => host,
    };
    if host.is_empty() {
        return Err(format!("`{s}` is missing a host"));
    }

    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("`{port}` is not a valid port")),
        Ok(_) => Ok(s.to_owned()),
    }
}
