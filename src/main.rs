mod ui;

use std::{sync::mpsc, thread, time::Duration};

use clap::{Args as ClapArgs, Parser, Subcommand};
use egui::Vec2;
use log::{error, info};
use tokio::runtime::Runtime;

use salesrace::{
    LiveOutput, Quota, Race, RaceCommand, SalesRaceError,
    bootstrap::{HttpRosterSource, RosterSource},
    render::ChannelRenderer,
    roster::{RosterStore, standings, standings::format_table},
    session::HubConnection,
    stimulus::{StimulusClient, Transaction},
};
use ui::live::{LeaderboardApp, config::AppConfig};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(ClapArgs, Debug, Default, Clone)]
struct BackendArgs {
    /// Base url of the sales api, e.g. http://localhost:5177/api
    #[arg(short, long)]
    base_url: Option<String>,

    /// Sales amount that completes one lap
    #[arg(short, long)]
    quota: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open the live leaderboard window
    Live {
        #[command(flatten)]
        backend: BackendArgs,

        /// Milliseconds between two frames
        #[arg(short, long)]
        refresh_ms: Option<u64>,
    },
    /// Print the current standings once
    Roster {
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// Post a test transaction
    TestSale {
        #[arg(short, long)]
        person_id: i64,

        #[arg(short, long)]
        amount: f64,

        #[arg(short, long)]
        base_url: Option<String>,
    },
}

fn load_config(backend: &BackendArgs) -> Result<AppConfig, SalesRaceError> {
    let mut app_config = AppConfig::from_local_file()?.unwrap_or_default();
    if let Some(base_url) = &backend.base_url {
        app_config.base_url = base_url.clone();
    }
    if let Some(quota) = backend.quota {
        app_config.quota = quota;
    }
    Ok(app_config)
}

fn http_client() -> Result<reqwest::Client, SalesRaceError> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| SalesRaceError::HttpClientError { source: e })
}

fn runtime() -> Result<Runtime, SalesRaceError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| SalesRaceError::RuntimeError { source: e })
}

fn live(backend: BackendArgs, refresh_ms: Option<u64>) -> Result<(), SalesRaceError> {
    let mut app_config = load_config(&backend)?;
    if let Some(refresh_ms) = refresh_ms {
        app_config.refresh_rate_ms = refresh_ms;
    }
    let settings = app_config.race_settings()?;
    let hub_config = app_config.hub_config()?;
    let client = http_client()?;
    let runtime = runtime()?;

    let (output_tx, output_rx) = mpsc::channel::<LiveOutput>();
    let (command_tx, command_rx) = tokio::sync::mpsc::unbounded_channel::<RaceCommand>();

    // Ctrl-C takes the same way out as closing the window
    let interrupt_tx = command_tx.clone();
    on_ctrlc(move || {
        info!("Interrupted, shutting the race down");
        let _ = interrupt_tx.send(RaceCommand::Shutdown);
    });

    let base_url = app_config.base_url.clone();
    let race_thread = thread::spawn(move || {
        let mut race = Race::new(
            settings,
            HubConnection::new(hub_config, client.clone()),
            HttpRosterSource::new(client.clone(), &base_url),
            ChannelRenderer::new(output_tx.clone()),
        )
        .with_stimulus(StimulusClient::new(client, &base_url));

        let connectivity_tx = output_tx.clone();
        race.observe(move |transition| {
            let _ = connectivity_tx.send(LiveOutput::Connectivity(transition.to));
        });
        race.on_bootstrap_failure(move |e| {
            let _ = output_tx.send(LiveOutput::BootstrapFailed(e.to_string()));
        });

        let summary = runtime.block_on(race.run(command_rx));
        info!(
            "Race finished after {} frames, {} sales dispatched, {} events dropped",
            summary.frames, summary.session.dispatched, summary.session.dropped
        );
    });

    let mut native_options = eframe::NativeOptions::default();
    native_options.viewport = native_options
        .viewport
        .with_decorations(false)
        .with_transparent(true)
        .with_inner_size(Vec2::new(900., 520.))
        .with_position(app_config.window_position.clone());

    eframe::run_native(
        "Salesrace",
        native_options,
        Box::new(|cc| {
            Ok(Box::new(LeaderboardApp::new(
                output_rx,
                command_tx,
                race_thread,
                app_config,
                cc,
            )))
        }),
    )
    .map_err(|e| SalesRaceError::WindowError {
        reason: e.to_string(),
    })
}

fn on_ctrlc(handler: impl FnMut() + Send + 'static) {
    if let Err(e) = ctrlc::set_handler(handler) {
        error!("Could not set Ctrl-C handler: {}", e);
    }
}

fn exit_on_ctrlc() {
    on_ctrlc(|| {
        println!("Exiting...");
        std::process::exit(0);
    });
}

fn roster(backend: BackendArgs) -> Result<(), SalesRaceError> {
    exit_on_ctrlc();
    let app_config = load_config(&backend)?;
    let quota = Quota::new(app_config.quota)?;
    let mut source = HttpRosterSource::new(http_client()?, &app_config.base_url);

    let competitors = runtime()?.block_on(source.load())?;
    let mut store = RosterStore::new();
    store.bootstrap(competitors)?;

    println!("{}", format_table(&standings(&store.snapshot(), quota)));
    Ok(())
}

fn test_sale(person_id: i64, amount: f64, base_url: Option<String>) -> Result<(), SalesRaceError> {
    exit_on_ctrlc();
    let app_config = load_config(&BackendArgs {
        base_url,
        quota: None,
    })?;
    let stimulus = StimulusClient::new(http_client()?, &app_config.base_url);

    runtime()?.block_on(stimulus.post(Transaction {
        sales_person_id: person_id,
        amount,
    }))
}

fn main() {
    #[cfg(debug_assertions)]
    colog::init();

    let cli = Args::parse();

    let result = match cli.command {
        Some(Commands::Live {
            backend,
            refresh_ms,
        }) => live(backend, refresh_ms),
        None => live(BackendArgs::default(), None),
        Some(Commands::Roster { backend }) => roster(backend),
        Some(Commands::TestSale {
            person_id,
            amount,
            base_url,
        }) => test_sale(person_id, amount, base_url),
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
