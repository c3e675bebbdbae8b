// ==========================================
// 订单导入管道 - 命令行入口
// ==========================================
// 子命令: preview / execute / template
// 输出: 报告以 JSON 打印到 stdout，日志写 stderr
// ==========================================

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use order_import::api::ExecuteImportRequest;
use order_import::app::{get_default_db_path, AppState};
use order_import::importer::{FilePayload, ManualMapping, RunContext};
use order_import::logging;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "order-import", version, about = "Bulk order import from CSV / Excel files")]
struct Cli {
    /// SQLite database path (defaults to ORDER_IMPORT_DB_PATH or the user data dir)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Overall time limit for the run in seconds (defaults to the stored config)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a file and preview the rows that would be imported
    Preview(FileArgs),

    /// Import a file into the order store
    Execute {
        #[command(flatten)]
        file: FileArgs,

        /// Insert rows even when they duplicate an existing order
        #[arg(long)]
        keep_duplicates: bool,

        /// Rows per batch (clamped to 10..=200)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Write the import template CSV
    Template {
        /// Output path (defaults to the template file name in the current dir)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct FileArgs {
    /// CSV / TSV / XLSX / XLS / ODS file
    file: PathBuf,

    /// Manual column mapping, e.g. --map order_date="Tarikh"
    #[arg(long = "map", value_name = "FIELD=HEADER")]
    mappings: Vec<String>,
}

impl FileArgs {
    fn payload(&self) -> Result<FilePayload> {
        let bytes = std::fs::read(&self.file)
            .with_context(|| format!("cannot read {}", self.file.display()))?;
        let name = self
            .file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.file.display().to_string());
        Ok(FilePayload::new(name, bytes))
    }

    fn manual_mapping(&self) -> Result<Option<ManualMapping>> {
        if self.mappings.is_empty() {
            return Ok(None);
        }
        let mut mapping = ManualMapping::new();
        for entry in &self.mappings {
            let Some((field, header)) = entry.split_once('=') else {
                bail!("invalid --map value '{}', expected FIELD=HEADER", entry);
            };
            mapping.insert(field.trim().to_string(), header.trim().to_string());
        }
        Ok(Some(mapping))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.json_logs {
        logging::init_json();
    } else {
        logging::init();
    }

    tracing::info!(version = order_import::VERSION, "{} 启动", order_import::APP_NAME);

    let db_path = cli.db.clone().unwrap_or_else(get_default_db_path);
    let state = AppState::new(db_path).await?;

    // Ctrl-C → 取消令牌（在途批次跑完，不再派发）
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("收到中断信号，停止派发新批次");
                cancel.cancel();
            }
        });
    }
    let mut ctx = RunContext::with_cancel_token(cancel);
    if let Some(secs) = cli.timeout_secs {
        ctx = ctx.with_run_timeout(Duration::from_secs(secs));
    }

    match cli.command {
        Command::Preview(args) => {
            let response = state
                .import_api
                .validate_import(args.payload()?, args.manual_mapping()?, &ctx)
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Execute {
            file,
            keep_duplicates,
            batch_size,
        } => {
            let request = ExecuteImportRequest {
                skip_duplicates: !keep_duplicates,
                batch_size,
                field_mapping: file.manual_mapping()?,
                timeout_ms: None,
            };
            let response = state
                .import_api
                .execute_import(file.payload()?, request, &ctx)
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Template { output } => {
            let template = state.import_api.download_template()?;
            let path = output.unwrap_or_else(|| PathBuf::from(&template.file_name));
            std::fs::write(&path, &template.bytes)
                .with_context(|| format!("cannot write {}", path.display()))?;
            println!("{}", path.display());
        }
    }

    Ok(())
}
