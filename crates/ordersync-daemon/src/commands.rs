use anyhow::{bail, Context, Result};
use ordersync_core::{JobId, ShopId, ShopProvider};
use ordersync_runner::{RunReport, ShopOutcome, SyncStats};
use ordersync_scheduler::{JobDefinition, JobPatch, ScheduledJob};
use tracing::info;

use crate::{
    app::App,
    cli::{Command, JobsCommand, ShopsCommand},
};

pub async fn dispatch(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Run => run(app).await,
        Command::Jobs { command } => jobs(app, command),
        Command::Sync { shops, hours } => sync(app, shops, hours).await,
        Command::Shops {
            command: ShopsCommand::List,
        } => {
            list_shops(app);
            Ok(())
        }
    }
}

async fn run(app: &App) -> Result<()> {
    let handle = &app.handle;
    let _jobs_lock = app.claim_jobs()?;
    handle.start_scheduler();
    info!(jobs = handle.list_jobs().len(), "scheduler running, Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutdown requested");

    handle.stop_scheduler().await;
    handle.abort_runs();
    if let Err(e) = handle.persist() {
        tracing::warn!("final job save failed: {e}");
    }

    let stats = handle.all_stats();
    if !stats.is_empty() {
        println!("Last run per shop:");
        print_stats(&stats);
    }
    Ok(())
}

fn jobs(app: &App, command: JobsCommand) -> Result<()> {
    let handle = &app.handle;
    let _jobs_lock = match command {
        JobsCommand::List => None,
        _ => Some(app.claim_jobs()?),
    };
    match command {
        JobsCommand::List => {
            let jobs = handle.list_jobs();
            if jobs.is_empty() {
                println!("No jobs.");
            }
            for job in &jobs {
                print_job(job);
            }
        }

        JobsCommand::Add {
            name,
            schedule,
            shops,
            hours,
        } => {
            let Some(schedule) = schedule.to_schedule() else {
                bail!("one of --daily, --hourly or --every is required");
            };
            let mut definition = JobDefinition::new(&name, schedule).with_shops(shops);
            definition.lookback_hours = hours;
            let id = handle.add_job(definition)?;
            println!("Added job {id}");
        }

        JobsCommand::Update {
            id,
            name,
            schedule,
            shops,
            all_shops,
            hours,
            default_hours,
        } => {
            let shop_ids = if all_shops {
                Some(Vec::new())
            } else if shops.is_empty() {
                None
            } else {
                Some(shops.into_iter().map(ShopId::from).collect())
            };
            let lookback_hours = if default_hours {
                Some(None)
            } else {
                hours.map(Some)
            };
            let patch = JobPatch {
                name,
                schedule: schedule.to_schedule(),
                enabled: None,
                shop_ids,
                lookback_hours,
            };
            let job = handle.update_job(&JobId::from(id.as_str()), patch)?;
            print_job(&job);
        }

        JobsCommand::Remove { id } => {
            if handle.remove_job(&JobId::from(id.as_str())) {
                println!("Removed job {id}");
            } else {
                println!("No job {id}, nothing removed");
            }
        }

        JobsCommand::Toggle { id } => {
            let enabled = handle.toggle_enabled(&JobId::from(id.as_str()))?;
            println!("Job {id} {}", if enabled { "enabled" } else { "disabled" });
        }
    }
    Ok(())
}

async fn sync(app: &App, shops: Vec<String>, hours: Option<u32>) -> Result<()> {
    let shop_ids = shops.into_iter().map(ShopId::from).collect();
    let report = app.handle.trigger_run_now(shop_ids, hours).await?;
    print_report(&report);
    print_synced(app, &report);
    if report.all_failed() {
        bail!("every selected shop failed");
    }
    Ok(())
}

fn list_shops(app: &App) {
    let shops = app.shops.list_shops();
    if shops.is_empty() {
        println!("No shops configured.");
        return;
    }
    let current = app.shops.current_index();
    for (index, shop) in shops.iter().enumerate() {
        let marker = if index == current { '*' } else { ' ' };
        println!(
            "{marker} {:<38} {:<24} {}@{}/{}",
            shop.id, shop.name, shop.source.user, shop.source.host, shop.source.database
        );
    }
}

fn print_job(job: &ScheduledJob) {
    let shops = if job.targets_all_shops() {
        "all shops".to_string()
    } else {
        job.shop_ids
            .iter()
            .map(ShopId::as_str)
            .collect::<Vec<_>>()
            .join(",")
    };
    let next = job
        .next_run_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let last = job
        .last_run_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{} {:<20} {:<16} {:<8} next={next} last={last} shops={shops}",
        job.id,
        job.name,
        job.schedule.to_string(),
        if job.enabled { "enabled" } else { "disabled" },
    );
}

fn print_report(report: &RunReport) {
    for outcome in &report.shops {
        match outcome {
            ShopOutcome::Completed { stats } => print_stats(std::slice::from_ref(stats)),
            ShopOutcome::Failed { stats, error } => {
                print_stats(std::slice::from_ref(stats));
                println!("  failed: {error}");
            }
            ShopOutcome::NotFound { shop_id } => println!("{shop_id}: not configured"),
        }
    }
    if report.aborted {
        println!("Run aborted before all shops finished.");
    }
}

/// Order numbers written by `report`'s run, per shop.
fn print_synced(app: &App, report: &RunReport) {
    for stats in report.all_stats() {
        let numbers: Vec<String> = app
            .handle
            .synced_orders(&stats.shop_id)
            .into_iter()
            .filter(|o| o.synced_at >= report.started_at)
            .map(|o| o.order_number)
            .collect();
        if !numbers.is_empty() {
            println!("  {} synced: {}", stats.shop_id, numbers.join(", "));
        }
    }
}

fn print_stats(stats: &[SyncStats]) {
    for s in stats {
        println!(
            "{}: total={} synced={} skipped={} errored={} window={}h{}",
            s.shop_id,
            s.total,
            s.synced,
            s.skipped,
            s.errored,
            s.hours,
            if s.aborted { " (aborted)" } else { "" }
        );
    }
}
