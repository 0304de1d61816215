use clap::Parser;
use foldercmp_lib::core::{format_size, ClassifiedFile, ComparisonEvent, Severity};
use foldercmp_lib::logging::{get_log_dir, LogConfig, SizeRotatingWriter};
use foldercmp_lib::{AppConfig, CompareRequest, CompareSession, ComparisonResult};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;

/// 比较两个文件夹中的文件名，可选保存报告并分类复制文件
#[derive(Debug, Parser)]
#[command(name = "foldercmp", version, about)]
struct Cli {
    /// 文件夹1
    folder_a: String,
    /// 文件夹2
    folder_b: String,
    /// 保存分析报告
    #[arg(short, long)]
    report: bool,
    /// 分类复制文件
    #[arg(short, long)]
    classify: bool,
    /// 输出目录的父目录（覆盖配置文件）
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// 配置目录
    #[arg(long)]
    config_dir: Option<PathBuf>,
    /// 三个分类并行复制
    #[arg(long)]
    parallel: bool,
    /// 以 JSON Lines 输出事件
    #[arg(long)]
    json: bool,
    /// 以 debug 级别把日志同时输出到 stderr
    #[arg(short, long)]
    verbose: bool,
}

/// 调试构建始终输出到控制台
fn wants_console(verbose: bool) -> bool {
    verbose || cfg!(debug_assertions)
}

/// 初始化日志系统
fn init_logging(config_dir: &std::path::Path, verbose: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let config = LogConfig::load(config_dir);
    let console = wants_console(verbose);
    if !config.enabled && !console {
        return None;
    }

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };
    let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    // 文件日志创建失败时只保留 stderr 输出
    let file_layer = config
        .enabled
        .then(|| SizeRotatingWriter::new(&get_log_dir(config_dir), config.max_size_mb).ok())
        .flatten()
        .map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
        });

    let (stderr_layer, guard) = if console {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init();

    guard
}

fn print_event(event: &ComparisonEvent) {
    match event {
        ComparisonEvent::Progress { done, total, phase } => {
            let percent = if *total > 0 { done * 100 / total } else { 100 };
            eprintln!("[{}/{}] {}% {}", done, total, percent, phase.label());
        }
        ComparisonEvent::FileClassified { file } => {
            let tag = match file {
                ClassifiedFile::OnlyA { .. } => "A ",
                ClassifiedFile::OnlyB { .. } => " B",
                ClassifiedFile::Common { .. } => "AB",
            };
            println!("{}  {}", tag, file);
        }
        ComparisonEvent::Log { message, severity } => match severity {
            Severity::Error | Severity::Warning => eprintln!("{}", message),
            Severity::Info | Severity::Success => println!("{}", message),
        },
    }
}

fn print_result(result: &ComparisonResult) {
    let copied = result
        .classification
        .as_ref()
        .map(|c| format!(", 已复制 {} ({})", c.copied, format_size(c.bytes_copied)))
        .unwrap_or_default();
    if let Some(dir) = &result.output_dir {
        println!("输出目录: {}{}", dir.display(), copied);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(foldercmp_lib::dirs::app_config_dir);
    let _log_guard = init_logging(&config_dir, cli.verbose);

    let mut config = AppConfig::load(&config_dir);
    if let Some(dir) = cli.output_dir {
        config.output_base_dir = Some(dir);
    }
    if cli.parallel {
        config.parallel_copy = true;
    }

    let request = CompareRequest::new(&cli.folder_a, &cli.folder_b, cli.report, cli.classify)?;
    let session = CompareSession::new();
    let mut running = session.start(request, config.job_config())?;

    let cancel = running.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("收到中断信号，正在取消比较");
            cancel.cancel();
        }
    });

    while let Some(event) = running.events.next().await {
        if cli.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }
    }

    let result = match running.handle.await? {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("比较失败: {}", e);
            return Ok(ExitCode::from(1));
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        print_result(&result);
    }

    let partial = result
        .classification
        .as_ref()
        .map(|c| c.is_partial())
        .unwrap_or(false);
    Ok(if partial {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}
