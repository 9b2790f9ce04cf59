mod app;
mod assets;
mod config;
mod framegen;
mod graphics;
mod submission;

use anyhow::Context;
use clap::Parser;

use crate::app::App;
use crate::config::{Args, DemoConfig};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    simple_logger::SimpleLogger::new()
        .without_timestamps()
        .with_level(args.log_level)
        .init()
        .context("Failed to initialize logging")?;

    let config = DemoConfig::from(args);

    log::debug!("{:?}", config);

    let event_loop = winit::event_loop::EventLoop::new();

    let app = App::new(&event_loop, config).context("Failed to start the demo")?;

    App::run(app, event_loop)
}
