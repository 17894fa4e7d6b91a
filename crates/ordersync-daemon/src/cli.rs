use clap::{Args, Parser, Subcommand};
use ordersync_scheduler::ScheduleKind;

#[derive(Parser)]
#[command(name = "ordersync", version, about = "Sync storefront orders into the ERP on a schedule")]
pub struct Cli {
    /// Config file (default: $ORDERSYNC_CONFIG, then ~/.ordersync/ordersync.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Read orders but do not write them to the ERP
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Manage scheduled jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
    /// Sync the given shops once, now
    Sync {
        /// Shop id (repeatable)
        #[arg(long = "shop", required = true)]
        shops: Vec<String>,
        /// Lookback window in hours (default: sync.default_lookback_hours)
        #[arg(long)]
        hours: Option<u32>,
    },
    /// Inspect configured shops
    Shops {
        #[command(subcommand)]
        command: ShopsCommand,
    },
}

#[derive(Subcommand)]
pub enum JobsCommand {
    /// List all jobs in creation order
    List,
    /// Add a job
    Add {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        schedule: ScheduleArgs,
        /// Shop id (repeatable). Omit to sync every configured shop.
        #[arg(long = "shop")]
        shops: Vec<String>,
        /// Lookback window override in hours
        #[arg(long)]
        hours: Option<u32>,
    },
    /// Change fields of a job
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        schedule: ScheduleArgs,
        /// Replace the shop list (repeatable)
        #[arg(long = "shop", conflicts_with = "all_shops")]
        shops: Vec<String>,
        /// Target every configured shop
        #[arg(long)]
        all_shops: bool,
        /// Lookback window override in hours
        #[arg(long, conflicts_with = "default_hours")]
        hours: Option<u32>,
        /// Drop the lookback override
        #[arg(long)]
        default_hours: bool,
    },
    /// Delete a job
    Remove { id: String },
    /// Enable or disable a job
    Toggle { id: String },
}

#[derive(Subcommand)]
pub enum ShopsCommand {
    /// List configured shops
    List,
}

/// One of `--daily`, `--hourly` or `--every`.
#[derive(Args)]
#[group(multiple = false)]
pub struct ScheduleArgs {
    /// Run daily at HH:MM
    #[arg(long, value_name = "HH:MM")]
    pub daily: Option<String>,
    /// Run at the top of every hour
    #[arg(long)]
    pub hourly: bool,
    /// Run every N minutes
    #[arg(long, value_name = "MINUTES", allow_negative_numbers = true)]
    pub every: Option<i64>,
}

impl ScheduleArgs {
    pub fn to_schedule(&self) -> Option<ScheduleKind> {
        if let Some(time) = &self.daily {
            Some(ScheduleKind::daily(time))
        } else if self.hourly {
            Some(ScheduleKind::Hourly)
        } else {
            self.every.map(ScheduleKind::every_minutes)
        }
    }
}
