use std::{
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use clap::{Parser, Subcommand};

use yande_walls::{
    bootstrap::{self, ExeLauncher},
    data_loaders::{
        config::Settings,
        state::{read_current_wallpaper, RunCounter},
    },
    deadline::Deadline,
    engine::Engine,
    error, helper, info, lock, logging,
    paths::Paths,
    process::SystemProcesses,
    scheduler::{relevant_orientations, target_for},
    selection::Selector,
    slideshow,
    stock::StockDir,
    wallpaper_engine::{DesktopWallpaper, WallpaperSetter},
    warn,
};

#[derive(Parser)]
#[command(name = "yande-walls", version, about = "Image-board wallpaper rotator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Serve one wallpaper now, or keep serving when a slideshow is configured
    Run,
    /// Run the background download helper
    Helper,
    /// Show stock levels and helper state
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = Settings::load();
    let paths = Paths::resolve();
    if let Err(e) = paths.ensure_dirs() {
        eprintln!("[{}] Cannot create state directories: {e}", yande_walls::APP_TAG);
    }

    let command = cli.command.unwrap_or(Command::Run);
    logging::init(settings.debug, paths.log_file.clone());
    if matches!(command, Command::Helper) {
        logging::set_echo(false);
    }
    std::panic::set_hook(Box::new(|panic_info| {
        error!("Panic: {}", panic_info);
    }));

    let result = match command {
        Command::Run => run_foreground(settings, paths),
        Command::Helper => run_helper(settings, paths),
        Command::Status => Ok(print_status(&settings, &paths)),
    };

    let code = result.unwrap_or_else(|e| {
        error!("{e:#}");
        ExitCode::FAILURE
    });
    logging::flush();
    code
}

fn run_helper(settings: Settings, paths: Paths) -> anyhow::Result<ExitCode> {
    info!("!---------- Starting download helper ----------!");
    let engine = Engine::with_network(settings, paths)
        .context("could not set up the HTTP client")?
        .allow_downloads(true);
    helper::run(engine, &SystemProcesses).context("download helper failed")?;
    Ok(ExitCode::SUCCESS)
}

fn run_foreground(settings: Settings, paths: Paths) -> anyhow::Result<ExitCode> {
    let force_downloads = settings.force_downloads;
    let engine = Engine::with_network(settings, paths)
        .context("could not set up the HTTP client")?
        .allow_downloads(force_downloads);
    if let Some(path) = &engine.settings.countdown_path {
        slideshow::write_countdown(path, 0);
    }

    let procs = SystemProcesses;
    let _lock = match lock::acquire(&engine.paths, &procs) {
        Ok(guard) => guard,
        Err(e) => {
            // someone else legitimately holds the run
            info!("{e}");
            return Ok(ExitCode::SUCCESS);
        }
    };

    let launcher = ExeLauncher::default();
    let setter = DesktopWallpaper::new(&engine.paths.cache_dir);
    if engine.settings.slideshow_minutes > 0 {
        return Ok(run_slideshow(&engine, &setter, &launcher));
    }
    Ok(serve_once(&engine, &setter, &launcher))
}

/// Settles the rating selection, makes sure a helper on the current one is
/// running, then serves.
fn serve_once(engine: &Engine, setter: &dyn WallpaperSetter, launcher: &ExeLauncher) -> ExitCode {
    let start = Instant::now();
    let deadline = Deadline::after(engine.settings.run_timeout);
    let countdown = if engine.settings.show_countdown {
        slideshow::start_run_countdown(deadline)
    } else {
        None
    };

    let selector = Selector::new(engine, setter, &deadline).stopping_helper(&SystemProcesses);
    selector.sync_ratings();
    if let Err(e) = bootstrap::ensure_helper_running(&engine.paths, &SystemProcesses, launcher) {
        warn!("Download helper unavailable: {e}");
    }
    let outcome = selector.serve();
    drop(countdown);
    info!("Total time: {:.2}s", start.elapsed().as_secs_f64());

    match outcome {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("No wallpaper applied: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_slideshow(engine: &Engine, setter: &dyn WallpaperSetter, launcher: &ExeLauncher) -> ExitCode {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
        warn!("Could not install stop handler: {e}");
    }

    let interval = Duration::from_secs(engine.settings.slideshow_minutes.max(1).saturating_mul(60));
    info!("Slideshow: changing wallpaper every {} minutes", interval.as_secs() / 60);
    while !stop.load(Ordering::Relaxed) {
        serve_once(engine, setter, launcher);

        let _countdown = engine
            .settings
            .countdown_path
            .clone()
            .and_then(|path| slideshow::start_slideshow_countdown(path, interval));
        let next = Deadline::after(interval);
        while !stop.load(Ordering::Relaxed) && !next.is_expired() {
            next.sleep_at_most(Duration::from_millis(250));
        }
    }

    info!("Slideshow interrupted by user");
    ExitCode::SUCCESS
}

fn print_status(settings: &Settings, paths: &Paths) -> ExitCode {
    println!("Collage mode: {}", settings.collage_mode.describe());
    println!("Ratings: {}", settings.rating_keys().join(", "));
    for &orientation in relevant_orientations(settings.collage_mode) {
        let target = target_for(settings, orientation);
        let on_disk = StockDir::new(paths.stock_dir_for(orientation)).count();
        let low_water = settings.low_water_mark(target);
        let flag = if on_disk < low_water { "  (low)" } else { "" };
        println!("{orientation:>9}: {on_disk}/{target} in stock, low-water mark {low_water}{flag}");
    }

    match bootstrap::helper_pid(&paths.helper_pid_file, &SystemProcesses) {
        Some(pid) => println!("Download helper: running (pid {pid})"),
        None => println!("Download helper: not running"),
    }
    if let Some(current) = read_current_wallpaper(&paths.current_wallpaper_file) {
        println!("Current wallpaper: {}", current.display());
    }
    println!("Archive counter: {}", RunCounter::new(&paths.counter_file).last());
    ExitCode::SUCCESS
}
