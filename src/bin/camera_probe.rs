use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::warn;

use posefit::camera::{Camera, OpenCvSource, SinkFrame};
use posefit::config::Config;

/// 接続されたカメラを順に開き、制約チェーンのどこで成功するか調べる
#[derive(Parser, Debug)]
#[command(name = "camera_probe", version = env!("GIT_VERSION"))]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// 調べるデバイス数
    #[arg(long, default_value_t = 5)]
    devices: i32,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (config, ignored) = Config::load_or_default(&args.config);
    posefit::logging::init(&config.log)?;
    if let Some(e) = ignored {
        warn!("config {} ignored, using defaults: {}", args.config.display(), e);
    }

    println!("=== カメラプローブ ===");
    println!();

    for index in 0..args.devices {
        let mut camera_config = config.camera.clone();
        camera_config.device_index = index;
        let chain = camera_config.constraint_chain();

        print!("index {}: ", index);
        let mut camera = Camera::new(OpenCvSource::new());
        let settings = match camera.start(&chain) {
            Ok(s) => s,
            Err(e) => {
                println!("{} [{}] {}", e.kind, e.platform_name.as_deref().unwrap_or("-"), e.message);
                continue;
            }
        };
        println!(
            "{}x{} fps={:.1} ({} constraint sets)",
            settings.width,
            settings.height,
            settings.frame_rate,
            chain.len()
        );

        // フレーム読み取り
        thread::sleep(Duration::from_millis(500));
        match camera.sink().read_frame() {
            Ok(SinkFrame::Ready(frame)) => {
                println!("       frame: {}x{} bytes={}", frame.width, frame.height, frame.data.len())
            }
            Ok(SinkFrame::NotReady) => println!("       frame: not ready"),
            Ok(SinkFrame::NoStream) => println!("       frame: stream ended"),
            Err(e) => println!("       frame err: {:#}", e),
        }
        camera.stop();
        println!();
    }
    Ok(())
}
