// スマートメータに接続して計測値を1回取得してみる。
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use anyhow::{Context, anyhow};
use clap::Parser;
use routeb_exporter::exporter::Exporter;
use routeb_exporter::lineport::LinePort;
use routeb_exporter::settings::Settings;
use routeb_exporter::skstack::driver::SkModem;
use routeb_exporter::skstack::session::Session;
use serialport::{DataBits, SerialPort, StopBits};
use std::fs;
use std::time::Duration;
use tracing_subscriber::FmtSubscriber;

/// スマートメーターBルートから計測値を1回取得する。
#[derive(Parser, Debug)]
#[command(name = "dryrun")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 設定ファイル名
    #[arg(short = 'S', long, default_value = "routeb_exporter.toml")]
    config_file: String,

    /// シリアルデバイス名(設定ファイルより優先)
    #[arg(short = 'D', long)]
    device: Option<String>,
}

/// シリアルポートを開く
fn open_port(port_name: &str, baud: u32) -> anyhow::Result<Box<dyn SerialPort>> {
    let builder = serialport::new(port_name, baud)
        .stop_bits(StopBits::One)
        .data_bits(DataBits::Eight)
        .timeout(Duration::from_secs(1));

    builder
        .open()
        .with_context(move || format!("Failed to open \"{}\".", port_name))
}

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::TRACE)
        .with_thread_names(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();

    // 設定ファイルからスマートメーターの情報を得る
    let file = fs::read_to_string(&cli.config_file).context("setting file read error.")?;
    let mut settings = Settings::from_toml(&file)?;
    if let Some(device) = cli.device {
        settings.device = device;
    }

    let credentials = settings
        .credentials
        .as_ref()
        .map(|c| c.to_credentials())
        .transpose()
        .map_err(|s| anyhow!(s))?;

    // シリアルポートを開く
    let serial_port = open_port(&settings.device, settings.baud)?;
    let session = Session::new(SkModem::new(LinePort::new(serial_port)));
    let mut exporter = Exporter::new(
        session,
        settings.target_object,
        settings.measures.clone(),
        settings.recv_timeout_ms,
    );

    // スマートメーターと接続して1回分を取得する
    exporter.session.connect(
        credentials.as_ref(),
        settings.scan_channel_mask,
        settings.scan_duration,
    )?;
    let values = exporter.scrape()?;
    for (name, value) in values.iter() {
        println!("{} {}", name, value);
    }
    exporter.session.close();
    Ok(())
}
