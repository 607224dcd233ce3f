use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bladeplan")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Resolve, plan and apply package provisioning for virtual blades", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/bladeplan/config.toml)
    #[arg(long, global = true, env = "BLADEPLAN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse and merge a manifest, reporting the first problem found
    Validate(ManifestArgs),

    /// Print the effective manifest after overlays
    Show(ShowArgs),

    /// Show the installation plan for each blade without touching anything
    Plan(PlanArgs),

    /// Provision blades according to their plans
    Apply(ApplyArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared arguments
// ============================================================================

#[derive(Args, Debug, Clone)]
pub struct ManifestArgs {
    /// Base manifest (YAML, JSON or TOML)
    pub manifest: PathBuf,

    /// Overlay applied after the base, in order (repeatable)
    #[arg(short = 'o', long = "overlay")]
    pub overlays: Vec<PathBuf>,

    /// Ignore overlays listed in the config file
    #[arg(long)]
    pub no_default_overlays: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    /// Inventory file listing blades
    #[arg(short, long)]
    pub inventory: Option<PathBuf>,

    /// Inline blade, as id=class or id=class@address (repeatable)
    #[arg(long = "blade-spec", value_name = "SPEC")]
    pub blade_specs: Vec<String>,

    /// Only this blade
    #[arg(short, long, value_name = "ID")]
    pub blade: Option<String>,
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Args, Debug, Clone)]
pub struct ShowArgs {
    #[command(flatten)]
    pub source: ManifestArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = DocumentFormatArg::Yaml)]
    pub format: DocumentFormatArg,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub source: ManifestArgs,

    #[command(flatten)]
    pub inventory: InventoryArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = PlanFormatArg::Text)]
    pub format: PlanFormatArg,

    /// Show the commands each blade would run
    #[arg(long)]
    pub commands: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub source: ManifestArgs,

    #[command(flatten)]
    pub inventory: InventoryArgs,

    /// Report what would run without touching any blade
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of blades provisioned in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Attempts per command for transient failures
    #[arg(long)]
    pub retries: Option<u32>,

    /// Run commands on this host instead of over ssh
    #[arg(long)]
    pub local: bool,

    /// User for ssh connections
    #[arg(long)]
    pub ssh_user: Option<String>,

    /// Identity file for ssh connections
    #[arg(long)]
    pub identity_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DocumentFormatArg {
    Yaml,
    Json,
    Toml,
}

impl From<DocumentFormatArg> for manifest::DocumentFormat {
    fn from(format: DocumentFormatArg) -> Self {
        match format {
            DocumentFormatArg::Yaml => Self::Yaml,
            DocumentFormatArg::Json => Self::Json,
            DocumentFormatArg::Toml => Self::Toml,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PlanFormatArg {
    Text,
    Json,
}
