//! SaveIt - A self-hosted Telegram media saver.
//!
//! SaveIt logs into a Telegram user account from a small desktop window, then
//! listens to the account's messages. Replying `.saveit` to any media copies that
//! media to the account's Saved Messages.
//!
//! # Features
//!
//! - **Guided Login**: API credentials, login code and optional 2FA password in one form
//! - **Session Persistence**: One session file per phone number, reused on the next start
//! - **Media Saving**: Reply the trigger to a photo, video or document to keep a copy
//! - **YAML Configuration**: Optional configuration file with environment variable support
//!
//! # Configuration
//!
//! Every value has a default. A `config.yaml` can prefill the form and tune the saver:
//!
//! ```yaml
//! telegram:
//!   api_id: 123456
//!   api_hash: "a1b2c3d4"
//!   phone_number: "+98912..."
//!
//! saver:
//!   trigger: ".saveit"
//!   download_dir: "downloads"
//! ```
//!
//! # Environment Variable Overrides
//!
//! ```bash
//! export SAVEIT_TELEGRAM__API_HASH="a1b2c3d4"
//! export SAVEIT_SAVER__STATUS_DELETE_DELAY=5
//! ```
//!
//! # Usage
//!
//! ```bash
//! saveit --config config.yaml --data ./saveit-data
//! ```
//!
//! # Architecture
//!
//! - [`bot`] - Backend thread owning the login flow and the message listener
//! - [`config`] - Configuration layers and structures
//! - [`login`] - Login state machine
//! - [`saver`] - Media saver and message listener
//! - [`telegram`] - Telegram client traits, session files and the `grammers` adapter
//! - [`ui`] - Desktop window
//! - [`utils`] - Path and phone number helpers
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (default: `info`)

use std::sync::mpsc;

use clap::Parser;
use eframe::egui;
use env_logger::Env;
use log::{error, info};

use crate::{
    bot::spawn_backend,
    config::Config,
    login::LoginForm,
    ui::{SaveItApp, WINDOW_TITLE},
};

mod bot;
mod config;
mod login;
mod saver;
mod telegram;
mod ui;
mod utils;

/// Command-line arguments.
///
/// # Examples
///
/// ```bash
/// saveit --config config.yaml --data ./saveit-data
/// ```
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    ///
    /// Optional: without it, the defaults and `SAVEIT_` environment variables apply.
    #[arg(short, long)]
    config: Option<String>,

    /// Path to the directory for storing persistent data.
    ///
    /// This directory will contain:
    /// - `session_<phone digits>.session` - Telegram sessions, one per phone number
    /// - `downloads/` - Media downloaded before being uploaded to Saved Messages
    ///
    /// Session files give full access to the account: restrict the permissions of
    /// this directory.
    #[arg(short, long, default_value = ".")]
    data: String,
}

fn main() {
    // Put logger at info level by default
    let env = Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    info!("Starting saveit {}...", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load config: {}", e);
            return;
        }
    };

    let (ui_tx, ui_rx) = mpsc::channel();
    let cmd_tx = match spawn_backend(&config, &args.data, ui_tx) {
        Ok(started) => started,
        Err(e) => {
            error!("Failed to start backend: {:#}", e);
            return;
        }
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size([420.0, 560.0]),
        ..Default::default()
    };
    let app = SaveItApp::new(
        cmd_tx,
        ui_rx,
        LoginForm::from_config(&config.telegram),
        &config.saver.trigger,
    );

    if let Err(e) = eframe::run_native(
        WINDOW_TITLE,
        options,
        Box::new(move |_cc| Ok(Box::new(app))),
    ) {
        error!("Window failed: {}", e);
    }

    // Work still pending on the backend thread is abandoned
    info!("Bye");
}
