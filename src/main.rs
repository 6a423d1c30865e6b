use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use posefit::camera::FrameSource;
use posefit::catalog::Item;
use posefit::config::Config;
use posefit::measurement::PlaceholderMeasurements;
use posefit::pose::PoseEstimator;
use posefit::session::{MeasurementSession, SessionEvent, SessionOutcome};
use posefit::sim::{ScriptedEstimator, SimulatedCamera};

/// カメラで姿勢を確認し、採寸してサイズを推薦する
#[derive(Parser, Debug)]
#[command(name = "posefit", version = env!("GIT_VERSION"))]
struct Args {
    /// 設定ファイル
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// 商品タイトル（カテゴリと性別を推定する）
    #[arg(long, default_value = "Classic Cotton T-Shirt")]
    item: String,

    /// カテゴリIDを直接指定 (shirts, pants, dresses ...)
    #[arg(long)]
    category: Option<String>,

    /// 在庫サイズ (例: S,M,L)
    #[arg(long, value_delimiter = ',')]
    sizes: Vec<String>,

    /// カメラとモデルの代わりにシミュレーションを使う
    #[arg(long)]
    simulate: bool,

    /// 結果を JSON で出力
    #[arg(long)]
    json: bool,
}

fn build_item(args: &Args) -> Item {
    let mut item = Item::from_title("cli", args.item.clone(), Vec::new()).with_sizes(args.sizes.iter().cloned());
    if let Some(category) = &args.category {
        item.category_id = category.clone();
    }
    item
}

async fn run<S, E>(config: Config, source: S, estimator: E, item: &Item, json: bool) -> Result<SessionOutcome>
where
    S: FrameSource,
    E: PoseEstimator,
{
    let mut session = MeasurementSession::new(config, source, estimator, Box::new(PlaceholderMeasurements));
    let mut events = session.subscribe();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // 状態表示（メッセージが変わった時だけ）
    let printer = tokio::spawn(async move {
        let mut last = String::new();
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Status { message, progress, stable_count, total_count } => {
                    if message != last && !json {
                        eprintln!("[{:>3.0}%] {} ({}/{} steady)", progress * 100.0, message, stable_count, total_count);
                        last = message;
                    }
                }
                SessionEvent::Ready { .. } if !json => eprintln!("Pose confirmed, checking stability..."),
                SessionEvent::TimedOut { waited } if !json => {
                    eprintln!("Still waiting after {}s, keep holding the pose", waited.as_secs())
                }
                _ => {}
            }
        }
    });

    let outcome = session.run(item, cancel).await;
    drop(session);
    let _ = printer.await;
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, ignored) = Config::load_or_default(&args.config);
    posefit::logging::init(&config.log)?;
    info!("posefit ({})", env!("GIT_VERSION"));
    if let Some(e) = ignored {
        warn!("config {} ignored, using defaults: {}", args.config.display(), e);
    }

    let item = build_item(&args);
    info!("item '{}' -> category '{}'", item.title, item.category_id);

    let outcome = if args.simulate {
        let estimator = ScriptedEstimator::standing().absent_for(10).jitter(0.002, 42);
        let source = SimulatedCamera::new(config.camera.ideal_width, config.camera.ideal_height);
        run(config, source, estimator, &item, args.json).await?
    } else {
        run_desktop(config, &item, args.json).await?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        let m = &outcome.measurements;
        println!("Item:        {} ({})", item.title, outcome.category);
        println!(
            "Measured:    chest {:.1}in, waist {:.1}in, hips {:.1}in, inseam {:.1}in",
            m.chest, m.waist, m.hips, m.inseam
        );
        println!(
            "Recommended: {} (confidence {:.0}%)",
            outcome.recommendation.size,
            outcome.recommendation.confidence * 100.0
        );
    }
    Ok(())
}

#[cfg(feature = "desktop")]
async fn run_desktop(config: Config, item: &Item, json: bool) -> Result<SessionOutcome> {
    use posefit::camera::OpenCvSource;
    use posefit::pose::MoveNetEstimator;

    let estimator = MoveNetEstimator::new(&config.detector.model_path);
    run(config, OpenCvSource::new(), estimator, item, json).await
}

#[cfg(not(feature = "desktop"))]
async fn run_desktop(_config: Config, _item: &Item, _json: bool) -> Result<SessionOutcome> {
    anyhow::bail!("built without the `desktop` feature; rerun with --simulate or rebuild with --features desktop")
}
