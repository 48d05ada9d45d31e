use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sentinel_core::{
    collect_files, scan_and_write, scan_and_write_remote, OutputFormat, ScanInput, ScanMode, ScanOptions, ScanSession,
    ScanStats,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// 命令行入口（基于 clap）
#[derive(Parser, Debug)]
#[command(name = "sentinel", version, about = "多来源威胁评分与扫描编排")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 扫描单个文件或目录（只遍历一层）
    Scan {
        /// 输入文件或目录
        input: PathBuf,

        /// 本地线程数（"auto"=CPU 核心数；仅 local 模式生效）
        #[arg(long, default_value = "auto")]
        threads: String,

        /// 最大扫描文件大小（单位字节，例如 5242880 代表 5MB）
        #[arg(long)]
        max_file_size: Option<u64>,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// 分析一个或多个 URL
    Url {
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// 输出文件（JSON 数组）
    #[arg(long, default_value = "./result.json")]
    output: PathBuf,

    /// 扫描模式：local、backend 或 deep
    #[arg(long)]
    mode: Option<ScanMode>,

    /// 远端分析服务地址，例如 http://127.0.0.1:3000
    #[arg(long)]
    backend: Option<String>,

    /// 远端模式下并发处理的目标数
    #[arg(long)]
    workers: Option<usize>,

    /// 深度扫描最大轮询次数
    #[arg(long)]
    max_polls: Option<u32>,

    /// 轮询间隔（秒）
    #[arg(long)]
    poll_interval: Option<f64>,

    /// 只输出分数不低于该值的结果
    #[arg(long)]
    min_score: Option<u8>,

    /// 规则文件路径（TOML），默认使用内置规则
    #[arg(long)]
    rules: Option<PathBuf>,

    /// 配置文件（TOML）；命令行参数优先
    #[arg(long)]
    config: Option<PathBuf>,

    /// 输出带缩进的 JSON
    #[arg(long)]
    pretty: bool,
}

impl CommonArgs {
    /// 配置文件打底，命令行覆盖
    fn options(&self) -> Result<ScanOptions> {
        let mut opts = match &self.config {
            Some(p) => ScanOptions::from_toml_file(p)?,
            None => ScanOptions::default(),
        };
        if let Some(mode) = self.mode { opts.mode = mode; }
        if let Some(url) = &self.backend { opts.backend_url = Some(url.clone()); }
        if let Some(n) = self.workers { opts.workers = n.max(1); }
        if let Some(n) = self.max_polls { opts.max_poll_attempts = n; }
        if let Some(secs) = self.poll_interval {
            anyhow::ensure!(secs.is_finite() && secs >= 0.0, "invalid --poll-interval {secs}");
            opts.poll_interval = Duration::from_secs_f64(secs);
        }
        if let Some(s) = self.min_score { opts.min_score = s; }
        if let Some(r) = &self.rules { opts.rules_path = Some(r.clone()); }
        Ok(opts)
    }

    fn format(&self) -> OutputFormat {
        if self.pretty { OutputFormat::JsonPretty } else { OutputFormat::Json }
    }
}

fn main() -> Result<()> {
    // 初始化日志（支持通过 RUST_LOG 控制等级，例如 info、debug）
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { input, threads, max_file_size, common } => {
            info!(?input, output = ?common.output, "starting scan");
            let mut opts = common.options()?;
            if let Some(t) = parse_threads(&threads) { opts.threads = Some(t); }
            if max_file_size.is_some() { opts.max_file_size = max_file_size; }

            let inputs: Vec<ScanInput> = collect_files(&input)?.into_iter().map(ScanInput::File).collect();
            run(inputs, opts, &common)?;
        }
        Commands::Url { urls, common } => {
            info!(count = urls.len(), output = ?common.output, "starting url analysis");
            let opts = common.options()?;
            let inputs: Vec<ScanInput> = urls.into_iter().map(ScanInput::Url).collect();
            run(inputs, opts, &common)?;
        }
    }

    Ok(())
}

fn run(inputs: Vec<ScanInput>, opts: ScanOptions, common: &CommonArgs) -> Result<()> {
    let session = ScanSession::open(opts, common.format())?;
    let stats = write_results(&inputs, &common.output, &session)?;
    session.end();
    info!(
        targets_scanned = stats.targets_scanned,
        results_written = stats.results_written,
        fallbacks = stats.fallbacks,
        skipped = stats.skipped,
        "scan finished"
    );
    Ok(())
}

fn write_results(inputs: &[ScanInput], output: &Path, session: &ScanSession) -> Result<ScanStats> {
    // 以缓冲方式打开输出文件，按 JSON 数组流式写入
    let mut out = BufWriter::new(File::create(output).context("create output file")?);

    let stats = if session.options().mode == ScanMode::Local {
        scan_and_write(inputs, &mut out, session).context("scan and write failed")?
    } else {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("build tokio runtime")?;
        rt.block_on(async {
            let orchestrator = session.orchestrator()?;
            // Ctrl-C：取消未完成的深度扫描作业，已有结果照常写出
            let cancel = session.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, cancelling outstanding deep scans");
                    cancel.cancel();
                }
            });
            scan_and_write_remote(inputs, &mut out, session, &orchestrator)
                .await
                .context("scan and write failed")
        })?
    };
    out.flush().context("flush output file")?;
    Ok(stats)
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    // 支持通过环境变量 RUST_LOG 控制日志等级，如：RUST_LOG=debug
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(env_filter).with_writer(std::io::stderr).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 解析线程参数
fn parse_threads(s: &str) -> Option<usize> {
    if s.eq_ignore_ascii_case("auto") { return None; }
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Some(n),
        _ => None,
    }
}
