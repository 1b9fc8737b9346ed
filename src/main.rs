//! Nimbus CLI
//!
//! Usage:
//!   nimbus refresh                    # Refresh every saved location now
//!   nimbus refresh -i <formatted id>  # Refresh one location
//!   nimbus poll                       # Run the polling loop until Ctrl-C
//!   nimbus search <query> [--add]     # Find places, optionally save them
//!   nimbus show [-u imperial]         # Print stored weather

use std::path::PathBuf;
use std::process::ExitCode;

use argh::FromArgs;
use nimbus_core::{AppError, Config, ConfigError, WeatherError, WeatherSource};
use nimbus_services::{AcquireOptions, AppServices, PollingOutcome, PollingTrigger, RefreshResult};
use nimbus_weather::{Location, UnitSet};

/// Nimbus - location-aware weather
#[derive(FromArgs)]
struct Args {
    /// config file (default: <config dir>/nimbus/config.toml)
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Refresh(RefreshArgs),
    Poll(PollArgs),
    Search(SearchArgs),
    Show(ShowArgs),
}

/// Refresh weather for saved locations
#[derive(FromArgs)]
#[argh(subcommand, name = "refresh")]
struct RefreshArgs {
    /// formatted id of a single location to refresh
    #[argh(option, short = 'i')]
    id: Option<String>,
}

/// Run background polling until interrupted
#[derive(FromArgs)]
#[argh(subcommand, name = "poll")]
struct PollArgs {
    /// skip the initial refresh
    #[argh(switch)]
    no_initial: bool,
}

/// Search for places by name
#[derive(FromArgs)]
#[argh(subcommand, name = "search")]
struct SearchArgs {
    /// place name
    #[argh(positional)]
    query: String,

    /// weather source to search with: open_meteo, metno, accu, caiyun
    #[argh(option, short = 's')]
    source: Option<WeatherSource>,

    /// save the first result
    #[argh(switch)]
    add: bool,
}

/// Print stored locations and their weather
#[derive(FromArgs)]
#[argh(subcommand, name = "show")]
struct ShowArgs {
    /// units: metric or imperial (default: metric)
    #[argh(option, short = 'u', default = "String::from(\"metric\")")]
    units: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Args = argh::from_env();
    if let Err(e) = nimbus_core::init() {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

/// Full detail goes to the log, the user gets the short message.
fn report(e: &AppError) {
    tracing::error!("{}", e);
    eprintln!("{}", e.user_message());
    if let Some(action) = e.suggested_action() {
        eprintln!("{}", action.hint());
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .map_err(|e| ConfigError::Load(format!("{:#}", e)))?;

    let validation = config.validate();
    if !validation.is_valid() {
        return Err(ConfigError::Invalid(validation.error_summary()).into());
    }
    for warning in &validation.warnings {
        tracing::warn!("Config warning: {}", warning);
    }

    let services = AppServices::new(config).await?;
    services.ensure_current_position().await?;

    let result = match args.command {
        Command::Refresh(args) => refresh(&services, args).await,
        Command::Poll(args) => poll(&services, args).await,
        Command::Search(args) => search(&services, args).await,
        Command::Show(args) => show(&services, args).await,
    };

    services.shutdown();
    result
}

async fn refresh(services: &AppServices, args: RefreshArgs) -> Result<(), AppError> {
    let Some(id) = args.id else {
        match services.scheduler().refresh_all(PollingTrigger::Manual).await {
            PollingOutcome::Completed(report) => {
                for (id, result) in &report.results {
                    match result {
                        RefreshResult::Refreshed => println!("  ok      {}", id),
                        RefreshResult::Failed(Some(kind)) => {
                            println!("  failed  {}: {}", id, kind.user_message())
                        }
                        RefreshResult::Failed(None) => println!("  failed  {}", id),
                    }
                }
            }
            other => println!("Refresh did not run: {:?}", other),
        }
        return Ok(());
    };

    let location = services
        .store()
        .get(&id)
        .await?
        .ok_or(WeatherError::LocationNotFound(id))?;
    let updated = services
        .orchestrator()
        .acquire(&location, AcquireOptions::default(), &services.shutdown_token())
        .await?;
    print_location(&updated, &UnitSet::metric());
    Ok(())
}

async fn poll(services: &AppServices, args: PollArgs) -> Result<(), AppError> {
    if !args.no_initial {
        let outcome = services.scheduler().refresh_all(PollingTrigger::Manual).await;
        tracing::info!("Initial refresh: {:?}", outcome);
    }

    let polling = services.spawn_polling();
    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, shutting down");

    services.shutdown();
    polling
        .await
        .map_err(|e| AppError::Other(anyhow::Error::new(e).context("Polling task failed")))?;
    Ok(())
}

async fn search(services: &AppServices, args: SearchArgs) -> Result<(), AppError> {
    let results = services.search(&args.query, args.source).await?;
    if results.is_empty() {
        println!("No places found for \"{}\"", args.query);
        return Ok(());
    }

    for location in &results {
        println!("  {}  [{}]", location.display_name(), location.formatted_id);
    }

    if args.add {
        let chosen = &results[0];
        services.store().put(chosen).await?;
        println!("Saved {}", chosen.display_name());
    }
    Ok(())
}

async fn show(services: &AppServices, args: ShowArgs) -> Result<(), AppError> {
    let units = match args.units.as_str() {
        "metric" => UnitSet::metric(),
        "imperial" => UnitSet::imperial(),
        other => {
            return Err(AppError::Other(anyhow::anyhow!(
                "Unknown units '{}', expected metric or imperial",
                other
            )))
        }
    };

    for location in &services.store().list().await? {
        print_location(location, &units);
    }
    Ok(())
}

fn print_location(location: &Location, units: &UnitSet) {
    println!("{} ({})", location.display_name(), location.weather_source.display_name());
    let Some(weather) = &location.weather else {
        println!("  no weather yet");
        return;
    };

    let current = &weather.current;
    println!(
        "  {} {}, updated {}",
        current.condition.description(),
        units.temperature.format(current.temperature),
        weather.base.update_time.format("%Y-%m-%d %H:%M UTC")
    );
    if let Some(speed) = current.wind.speed {
        println!("  wind {}", units.speed.format(speed));
    }
    if let Some(pressure) = current.pressure {
        println!("  pressure {}", units.pressure.format(pressure));
    }
    for day in weather.daily.iter().take(5) {
        let rain = day
            .precipitation
            .map(|mm| format!(", {}", units.precipitation.format(mm)))
            .unwrap_or_default();
        println!(
            "  {}  {} / {}  {}{}",
            day.date,
            units.temperature.format(day.temperature_max),
            units.temperature.format(day.temperature_min),
            day.condition_day.description(),
            rain
        );
    }
    for alert in &weather.alerts {
        println!("  ! {}", alert.title);
    }
}
