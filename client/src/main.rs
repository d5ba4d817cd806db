use clap::Parser;
use client::game::{ClientGameState, SharedState};
use client::input::InputManager;
use client::network;
use client::rendering::Renderer;
use log::{error, info};
use ::rand::Rng;
use macroquad::prelude::*;
use macroquad::window::Conf;
use shared::World;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Session id to use; a random one is picked when omitted
    #[arg(short = 'i', long)]
    session_id: Option<u32>,

    /// Window width
    #[arg(short = 'w', long, default_value = "800")]
    width: i32,

    /// Window height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "600")]
    height: i32,
}

fn window_conf() -> Conf {
    let args = Args::parse();
    Conf {
        window_title: "Netcode Client".to_string(),
        window_width: args.width,
        window_height: args.height,
        ..Default::default()
    }
}

/// Zero is never handed out so it cannot be confused with "no session".
fn random_session_id() -> u32 {
    ::rand::thread_rng().gen_range(1..=u32::MAX)
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let session_id = args.session_id.unwrap_or_else(random_session_id);
    let world = World::standard();

    info!("Starting client...");
    info!("Session {} connecting to: {}", session_id, args.server);
    info!("Controls: WASD or arrow keys to move, Escape to quit");
    info!("Press 1/2/3 to toggle Prediction/Reconciliation/Interpolation");

    let shared = Arc::new(SharedState::new(ClientGameState::new(
        session_id,
        world.clone(),
    )));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let network_thread = match network::spawn(args.server.clone(), Arc::clone(&shared), outbound_rx) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start network thread: {}", e);
            return;
        }
    };

    let mut input = InputManager::new();
    let mut renderer = Renderer::new(world);

    while shared.is_running() {
        let frame = input.update();
        if frame.quit {
            break;
        }

        let view = {
            let mut game = shared.game();
            game.handle_toggles(frame.toggles);
            if let Some(packet) = game.apply_local_input(frame.direction, get_frame_time()) {
                if outbound_tx.send(packet).is_err() {
                    error!("Network thread is gone");
                    break;
                }
            }
            game.render_view(Instant::now())
        };

        renderer.render(&view);
        next_frame().await;
    }

    shared.stop();
    if network_thread.join().is_err() {
        error!("Network thread panicked");
    }
    info!("Client stopped");
}
