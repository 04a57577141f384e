use clap::Parser;
use client::api::WorldApi;
use client::config::ClientConfig;
use client::input::InputCommand;
use client::network::{Session, SessionView};
use client::rendering::Renderer;
use client::ws::WsConnector;
use log::{error, info, warn};
use macroquad::prelude::next_frame;
use macroquad::window::Conf;
use tokio::sync::{mpsc, watch};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Realtime server base URL (ws:// or wss://)
    #[arg(long)]
    ws_url: Option<String>,

    /// REST API base URL
    #[arg(long)]
    api_url: Option<String>,

    /// Access token passed as the `token` query parameter
    #[arg(short = 't', long)]
    token: Option<String>,

    /// Zone to load
    #[arg(short = 'z', long)]
    zone: Option<String>,

    /// Local player id and display name
    #[arg(short = 'p', long)]
    player: Option<String>,

    /// Run the session without a window until Ctrl-C
    #[arg(long)]
    headless: bool,

    /// Window width
    #[arg(short = 'w', long, default_value = "800")]
    width: usize,

    /// Window height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "508")]
    height: usize,
}

impl Args {
    fn into_config(self) -> ClientConfig {
        let mut config = ClientConfig::from_env();
        if let Some(url) = self.ws_url {
            config = config.with_ws_base_url(url);
        }
        if let Some(url) = self.api_url {
            config = config.with_api_base_url(url);
        }
        if let Some(token) = self.token {
            config = config.with_access_token(token);
        }
        if let Some(zone) = self.zone {
            config = config.with_zone(zone);
        }
        if let Some(player) = self.player {
            config = config.with_player(player.clone(), player);
        }
        config
    }
}

async fn run_session(
    config: ClientConfig,
    commands: mpsc::Receiver<InputCommand>,
    views: Option<watch::Sender<SessionView>>,
) -> Result<(), BoxError> {
    let api = WorldApi::new(config.clone())?;
    let connector = WsConnector::new(config.transport.connect_timeout);
    let token = config.access_token.clone();

    let mut session = Session::new(connector, config);
    session.bootstrap(&api).await;

    match token {
        Some(token) => session.connect(&token),
        None => warn!("No access token given, staying offline"),
    }

    session.run(commands, views).await;
    Ok(())
}

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build()
}

fn run_headless(config: ClientConfig) -> Result<(), BoxError> {
    let (commands, receiver) = mpsc::channel(64);

    runtime()?.block_on(async move {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
                let _ = commands.send(InputCommand::Quit).await;
            }
        });
        run_session(config, receiver, None).await
    })
}

fn run_windowed(config: ClientConfig, width: usize, height: usize) -> Result<(), BoxError> {
    let (commands, receiver) = mpsc::channel(64);
    let (views, view) = watch::channel(SessionView::default());

    let session_thread = std::thread::spawn(move || -> Result<(), String> {
        let runtime = runtime().map_err(|e| e.to_string())?;
        runtime
            .block_on(run_session(config, receiver, Some(views)))
            .map_err(|e| e.to_string())
    });

    let conf = Conf {
        window_title: "Code Valley".to_string(),
        window_width: width as i32,
        window_height: height as i32,
        ..Default::default()
    };

    macroquad::Window::from_config(conf, async move {
        let mut renderer = Renderer::new(width, height);

        'frames: loop {
            let frame = view.borrow().clone();

            for command in renderer.sample_input(&frame) {
                let quit = command == InputCommand::Quit;
                if let Err(e) = commands.try_send(command) {
                    warn!("Dropping input: {}", e);
                }
                if quit {
                    break 'frames;
                }
            }

            renderer.render(&frame);
            next_frame().await;
        }
    });

    match session_thread.join() {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err("session thread panicked".into()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let headless = args.headless;
    let (width, height) = (args.width, args.height);
    let config = args.into_config();

    info!("Starting client...");
    info!("Realtime server: {}", config.ws_base_url);
    info!("REST API: {}", config.api_base_url);
    info!("Zone: {}", config.zone);
    if !headless {
        info!("Controls: WASD/arrows to move, click to interact, T dismiss toast, I mark inbox read, Esc quit");
    }

    let result = if headless {
        run_headless(config)
    } else {
        run_windowed(config, width, height)
    };

    if let Err(e) = &result {
        error!("Client stopped with error: {}", e);
    }
    result.map_err(|e| e as Box<dyn std::error::Error>)
}
