//! Command-line surface of the server.

use clap::Parser;

/// `--serial` value that disables the emergency-stop watcher.
pub const NO_ESTOP: &str = "no-e-stop";

/// `--serial` value that scans for a USB serial device instead of naming a
/// port explicitly.
pub const AUTO_SERIAL: &str = "auto";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ephys-link-server",
    version,
    about = "Ephys Link: a Socket.IO interface for manipulators in electrophysiology experiments."
)]
pub struct Options {
    /// Platform type ("fake", "pathfinder-mpm").
    #[arg(short = 't', long = "type", value_name = "PLATFORM", default_value = "fake")]
    pub platform_type: String,

    /// Enable debug logging.
    #[arg(short, long)]
    pub debug: bool,

    /// Connect to a cloud proxy instead of serving locally.
    #[arg(short = 'p', long)]
    pub use_proxy: bool,

    /// Proxy address to connect to with --use-proxy.
    #[arg(short = 'a', long, default_value = "proxy2.virtualbrainlab.org")]
    pub proxy_address: String,

    /// Port the Pathfinder MPM HTTP controller listens on.
    #[arg(long, default_value_t = 8080)]
    pub mpm_port: u16,

    /// Emergency-stop serial port (e.g. COM3 or /dev/ttyACM0), "auto" to
    /// scan for one, or "no-e-stop" to disable.
    #[arg(short, long, default_value = NO_ESTOP)]
    pub serial: String,

    /// Skip checking for updates on startup.
    #[arg(short, long)]
    pub ignore_updates: bool,

    /// Skip the configuration window.
    #[arg(short, long)]
    pub background: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_surface() {
        let options = Options::parse_from(["ephys-link-server"]);
        assert_eq!(options.platform_type, "fake");
        assert_eq!(options.serial, NO_ESTOP);
        assert_eq!(options.mpm_port, 8080);
        assert!(!options.use_proxy);
    }

    #[test]
    fn flags_parse() {
        let options = Options::parse_from([
            "ephys-link-server",
            "--type",
            "pathfinder-mpm",
            "--mpm-port",
            "8081",
            "--serial",
            "COM3",
            "--debug",
            "--ignore-updates",
        ]);
        assert_eq!(options.platform_type, "pathfinder-mpm");
        assert_eq!(options.mpm_port, 8081);
        assert_eq!(options.serial, "COM3");
        assert!(options.debug && options.ignore_updates);
    }
}
