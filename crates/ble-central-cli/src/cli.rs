use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ble-central-cli")]
#[command(about = "BLE central-role CLI: scan, inspect services, read and watch characteristics")]
pub struct Cli {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Scan(ScanArgs),
    Services(ServicesArgs),
    Read(ReadArgs),
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    #[arg(long, default_value_t = 10)]
    pub duration_secs: u64,
    /// Only report advertisements from this address.
    #[arg(long)]
    pub address: Option<String>,
}

#[derive(Args, Debug)]
pub struct ServicesArgs {
    #[arg(long)]
    pub address: String,
    #[arg(long, default_value_t = 10)]
    pub scan_secs: u64,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    #[arg(long)]
    pub address: String,
    #[arg(long)]
    pub service: String,
    #[arg(long)]
    pub characteristic: String,
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub scan_secs: u64,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[arg(long)]
    pub address: String,
    #[arg(long)]
    pub service: String,
    #[arg(long)]
    pub characteristic: String,
    #[arg(long, default_value_t = 60)]
    pub duration_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub scan_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_defaults_to_10s_and_no_filter() {
        let cli = Cli::parse_from(["ble-central-cli", "scan"]);
        let Command::Scan(args) = cli.command else {
            panic!("expected scan command");
        };

        assert_eq!(cli.verbose, 0);
        assert_eq!(args.duration_secs, 10);
        assert_eq!(args.address, None);
    }

    #[test]
    fn scan_accepts_address_filter() {
        let cli = Cli::parse_from(["ble-central-cli", "scan", "--address", "AA:BB:CC:DD:EE:FF"]);
        let Command::Scan(args) = cli.command else {
            panic!("expected scan command");
        };

        assert_eq!(args.address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn read_defaults_to_30s_timeout() {
        let cli = Cli::parse_from([
            "ble-central-cli",
            "read",
            "--address",
            "AA:BB:CC:DD:EE:FF",
            "--service",
            "180D",
            "--characteristic",
            "2A37",
        ]);
        let Command::Read(args) = cli.command else {
            panic!("expected read command");
        };

        assert_eq!(args.timeout_secs, 30);
        assert_eq!(args.scan_secs, 10);
        assert_eq!(args.service, "180D");
    }

    #[test]
    fn watch_defaults_to_60s() {
        let cli = Cli::parse_from([
            "ble-central-cli",
            "watch",
            "--address",
            "AA:BB:CC:DD:EE:FF",
            "--service",
            "180D",
            "--characteristic",
            "2A37",
        ]);
        let Command::Watch(args) = cli.command else {
            panic!("expected watch command");
        };

        assert_eq!(args.duration_secs, 60);
    }

    #[test]
    fn verbose_flag_is_global_and_counted() {
        let cli = Cli::parse_from(["ble-central-cli", "-vv", "scan"]);
        let Command::Scan(_) = cli.command else {
            panic!("expected scan command");
        };

        assert_eq!(cli.verbose, 2);
    }
}
