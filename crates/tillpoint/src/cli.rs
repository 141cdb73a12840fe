//! Clap derive structures for the `tillpoint` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tillpoint -- talk to a Tillpoint store server from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "tillpoint",
    version,
    about = "Connect a till to a Tillpoint store server",
    long_about = "Discover store services, log in, and watch the live channel \
        of a Tillpoint POS backend.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Store profile to use
    #[arg(long, short = 'p', env = "TILLPOINT_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Store server URL (overrides profile)
    #[arg(long, short = 's', env = "TILLPOINT_SERVER", global = true)]
    pub server: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "TILLPOINT_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "TILLPOINT_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "TILLPOINT_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Skip service discovery and use the default live endpoint
    #[arg(long, global = true)]
    pub no_discovery: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List live services advertised by the store server
    #[command(alias = "disc")]
    Discover(DiscoverArgs),

    /// Log in and remember the cashier profile
    Login(LoginArgs),

    /// End the session and forget the stored profile
    Logout,

    /// Show the stored cashier profile
    Whoami,

    /// Probe the store server's health endpoint
    Health,

    /// Open the live channel and stream its traffic until Ctrl-C
    Live(LiveArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command args ─────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// Bypass the discovery cache
    #[arg(long)]
    pub refresh: bool,

    /// Discovery budget in milliseconds
    #[arg(long, default_value = "5000")]
    pub timeout_ms: u64,
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Cashier username (overrides profile)
    #[arg(long, short = 'u', env = "TILLPOINT_USERNAME")]
    pub username: Option<String>,

    /// Password (prompted when omitted)
    #[arg(long, env = "TILLPOINT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Debug, Args)]
pub struct LiveArgs {
    /// Connect to this discovered service instead of the first one
    #[arg(long)]
    pub service: Option<String>,

    #[command(flatten)]
    pub login: LoginArgs,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Show the resolved configuration
    Show,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },

    /// Store a profile's password in the system keyring
    SetPassword,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
