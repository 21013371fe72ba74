use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use eframe::egui;
use log::{error, info};

use balancer_ui::config::AppConfig;
use balancer_ui::link::BalancerLink;
use balancer_ui::session::Session;
use balancer_ui::ui::BalancerUi;

#[derive(Parser, Debug)]
#[command(version, about = "Monitor and control an 8-cell balancer over BLE")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Advertised device name, overrides the config file
    #[arg(short, long)]
    device: Option<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(name) = args.device {
        config.device.name = name;
    }
    info!("looking for device \"{}\"", config.device.name);

    let rt = tokio::runtime::Runtime::new()?;

    let (tx, rx) = std::sync::mpsc::channel();

    let (link, handle) = BalancerLink::new(config.device.clone(), config.gatt.clone(), tx);
    let session = Session::new(config.telemetry.clone(), config.command.encoding, handle);
    let ui = BalancerUi::new(rx, session, config.ui.clone());

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([600.0, 400.0]),
        default_theme: eframe::Theme::Light,
        ..Default::default()
    };

    eframe::run_native(
        "8-Cell Balancer",
        options,
        Box::new(|cc| {
            let ctx = cc.egui_ctx.clone();
            std::thread::spawn(move || {
                rt.block_on(async {
                    if let Err(e) = link.run(&ctx).await {
                        error!("link stopped: {e:#}");
                    }
                });
            });

            Box::new(ui)
        }),
    )?;

    Ok(())
}
