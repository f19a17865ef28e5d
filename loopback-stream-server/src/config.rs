use std::net::SocketAddr;

use clap::Parser;

use loopback_stream_core::StreamConfiguration;

/// Command-line configuration. Every flag falls back to a
/// `LOOPBACK_STREAM_*` environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "loopback-stream", version, about = "Stream loopback audio from a system endpoint over WebSocket")]
pub struct ServerArgs {
    /// Address the HTTP and WebSocket surface listens on.
    #[arg(long, env = "LOOPBACK_STREAM_BIND", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    /// Keep every Nth captured frame.
    #[arg(long, env = "LOOPBACK_STREAM_DOWNSAMPLE_FACTOR", default_value_t = 4)]
    pub downsample_factor: u32,

    /// Messages buffered per subscriber before frames are dropped for it.
    #[arg(long, env = "LOOPBACK_STREAM_QUEUE_DEPTH", default_value_t = 64)]
    pub queue_depth: usize,

    /// Endpoint ID to select at startup.
    #[arg(long, env = "LOOPBACK_STREAM_DEVICE")]
    pub device: Option<String>,

    /// Start capturing from `--device` once selected.
    #[arg(long, env = "LOOPBACK_STREAM_AUTOSTART", requires = "device")]
    pub autostart: bool,
}

impl ServerArgs {
    pub fn stream_configuration(&self) -> StreamConfiguration {
        StreamConfiguration {
            downsample_factor: self.downsample_factor,
            subscriber_queue_depth: self.queue_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stream_configuration() {
        let args = ServerArgs::try_parse_from(["loopback-stream"]).unwrap();
        assert_eq!(args.bind, "0.0.0.0:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(args.stream_configuration(), StreamConfiguration::default());
        assert!(args.device.is_none());
        assert!(!args.autostart);
    }

    #[test]
    fn parses_overrides() {
        let args = ServerArgs::try_parse_from([
            "loopback-stream",
            "--bind",
            "127.0.0.1:8080",
            "--downsample-factor",
            "2",
            "--queue-depth",
            "16",
            "--device",
            "{0.0.0.00000000}.{abc}",
            "--autostart",
        ])
        .unwrap();

        assert_eq!(args.bind.port(), 8080);
        assert_eq!(args.downsample_factor, 2);
        assert_eq!(args.queue_depth, 16);
        assert_eq!(args.device.as_deref(), Some("{0.0.0.00000000}.{abc}"));
        assert!(args.autostart);
    }

    #[test]
    fn autostart_requires_device() {
        assert!(ServerArgs::try_parse_from(["loopback-stream", "--autostart"]).is_err());
    }

    #[test]
    fn rejects_malformed_bind_address() {
        assert!(ServerArgs::try_parse_from(["loopback-stream", "--bind", "not-an-address"]).is_err());
    }
}
