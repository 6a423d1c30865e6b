//! stderr とタイムスタンプ付きログファイルへの同時出力

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use env_logger::{Builder, Target};

use crate::config::LogConfig;

/// Target for raw platform/model diagnostics. Hidden at the default level.
pub const DIAG_TARGET: &str = "posefit::diag";

struct TeeWriter {
    file: Option<BufWriter<File>>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(f) = self.file.as_mut() {
            f.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(f) = self.file.as_mut() {
            f.flush()?;
        }
        Ok(())
    }
}

fn open_log_file(dir: &str) -> Result<(BufWriter<File>, PathBuf)> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create log dir {}", dir))?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = PathBuf::from(dir).join(format!("posefit_{}.log", ts));
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok((BufWriter::new(file), path))
}

/// ロガーを初期化。ログファイルのパスを返す（ファイル出力なしならNone）
///
/// `RUST_LOG` overrides `config.level` when set.
pub fn init(config: &LogConfig) -> Result<Option<PathBuf>> {
    let (file, path) = if config.dir.is_empty() {
        (None, None)
    } else {
        let (f, p) = open_log_file(&config.dir)?;
        (Some(f), Some(p))
    };

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone());

    Builder::new()
        .parse_filters(&filter)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(TeeWriter { file })))
        .try_init()
        .context("logger already initialized")?;

    if let Some(ref p) = path {
        log::info!("Log: {}", p.display());
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tee_writer_without_file() {
        let mut w = TeeWriter { file: None };
        assert_eq!(w.write(b"hello\n").unwrap(), 6);
        assert!(w.flush().is_ok());
    }
}
