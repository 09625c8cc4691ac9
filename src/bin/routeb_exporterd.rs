// ルートBスマートメーターの計測値をHTTPで公開するデーモン
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use anyhow::{Context, anyhow};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use clap::Parser;
use routeb_exporter::exporter::{Exporter, ScrapeError};
use routeb_exporter::lineport::LinePort;
use routeb_exporter::settings::Settings;
use routeb_exporter::skstack::driver::{ModemError, SkModem};
use routeb_exporter::skstack::session::{self, Credentials, Session, State as SessionState};
use serialport::{DataBits, SerialPort, StopBits};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::FmtSubscriber;

/// スマートメーターBルートの計測値をPrometheus形式で公開する。
#[derive(Parser, Debug)]
#[command(name = "routeb_exporterd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 設定ファイル名
    #[arg(short = 'S', long, default_value = "routeb_exporter.toml")]
    config_file: String,

    /// シリアルデバイス名(設定ファイルより優先)
    #[arg(short = 'D', long)]
    device: Option<String>,

    /// HTTP待ち受けアドレス(設定ファイルより優先)
    #[arg(short = 'L', long)]
    listen: Option<String>,
}

struct App {
    exporter: Mutex<Exporter<Box<dyn SerialPort>>>,
    credentials: Option<Credentials>,
    scan_channel_mask: u32,
    scan_duration: u8,
    helps: HashMap<String, String>,
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

// エラーごとのHTTPステータス
fn status_for(e: &ScrapeError) -> StatusCode {
    match e {
        ScrapeError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ScrapeError::Session(session::Error::ConnectionFailed) => StatusCode::GATEWAY_TIMEOUT,
        ScrapeError::Session(session::Error::Modem(ModemError::Disconnected)) => {
            StatusCode::GATEWAY_TIMEOUT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// text exposition format (version 0.0.4)
fn render(values: &[(String, i64)], helps: &HashMap<String, String>) -> String {
    let mut out = String::new();
    let mut seen = BTreeSet::new();
    for (name, value) in values {
        if seen.insert(name.clone()) {
            if let Some(help) = helps.get(name) {
                out.push_str(&format!("# HELP {} {}\n", name, help));
            }
            out.push_str(&format!("# TYPE {} gauge\n", name));
        }
        out.push_str(&format!("{} {}\n", name, value));
    }
    out
}

async fn metrics(State(app): State<Arc<App>>) -> Response {
    let scraped = tokio::task::spawn_blocking({
        let app = Arc::clone(&app);
        move || {
            let mut exporter = app.exporter.lock().expect("scrape mutex");
            // 未接続ならまず接続する
            if exporter.session.state() != SessionState::Connected {
                exporter
                    .session
                    .connect(
                        app.credentials.as_ref(),
                        app.scan_channel_mask,
                        app.scan_duration,
                    )
                    .map_err(ScrapeError::from)?;
            }
            let result = exporter.scrape();
            // タイムアウト以外の失敗はセッションを畳んで次回に接続し直す
            if let Err(e) = &result {
                if !matches!(e, ScrapeError::Timeout) {
                    exporter.session.close();
                }
            }
            result
        }
    })
    .await;

    match scraped {
        Ok(Ok(values)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(&values, &app.helps),
        )
            .into_response(),
        Ok(Err(e)) => {
            tracing::error!("スクレイプに失敗した: {}", e);
            (status_for(&e), format!("scrape failed: {}\n", e)).into_response()
        }
        Err(e) => {
            tracing::error!("スクレイプタスクが落ちた: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "scrape task failed\n".to_owned(),
            )
                .into_response()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
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
    if let Some(listen) = cli.listen {
        settings.listen = listen;
    }

    let credentials = settings
        .credentials
        .as_ref()
        .map(|c| c.to_credentials())
        .transpose()
        .map_err(|s| anyhow!(s))?;

    // メトリクス名とHELP文の対応
    let mut helps = HashMap::new();
    for measure in settings.measures.iter() {
        if let Some(help) = &measure.help {
            for layout in measure.layouts() {
                helps.insert(layout.name, help.clone());
            }
        }
    }

    // シリアルポートを開く
    let serial_port = open_port(&settings.device, settings.baud)?;
    let session = Session::new(SkModem::new(LinePort::new(serial_port)));
    let exporter = Exporter::new(
        session,
        settings.target_object,
        settings.measures.clone(),
        settings.recv_timeout_ms,
    );

    let app = Arc::new(App {
        exporter: Mutex::new(exporter),
        credentials,
        scan_channel_mask: settings.scan_channel_mask,
        scan_duration: settings.scan_duration,
        helps,
    });

    let router = Router::new()
        .route("/metrics", get(metrics))
        .with_state(app);

    let listener = tokio::net::TcpListener::bind(&settings.listen)
        .await
        .with_context(|| format!("Failed to bind \"{}\".", settings.listen))?;
    tracing::info!("listening on {}", settings.listen);
    axum::serve(listener, router).await?;
    Ok(())
}
