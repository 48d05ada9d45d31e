//! 批量扫描主流程与并行调度
use anyhow::{Context, Result};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::analyzer::analyze_local;
use crate::options::ScanStats;
use crate::orchestrator::{is_fallback, Orchestrator};
use crate::rules::RuleBook;
use crate::session::{OutputFormat, ScanSession};
use crate::target::ScanInput;
use crate::types::ScanResult;

/// 收集输入：单个文件原样返回；目录只遍历一层并按文件名排序，保证输出顺序可复现
pub fn collect_files(input: &Path) -> Result<Vec<PathBuf>> {
    let md = std::fs::metadata(input).with_context(|| format!("stat input {}", input.display()))?;
    if md.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut files: Vec<PathBuf> = vec![];
    for entry in WalkDir::new(input).min_depth(1).max_depth(1) {
        let entry = match entry { Ok(e) => e, Err(_) => continue };
        if entry.file_type().is_file() { files.push(entry.into_path()); }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// JSON 数组的流式写出器
///
/// 低于 `min_score` 的结果只计数不输出。
pub struct ResultWriter<'a> {
    out: &'a mut dyn Write,
    format: OutputFormat,
    min_score: u8,
    first: bool,
}

impl<'a> ResultWriter<'a> {
    pub fn begin(out: &'a mut dyn Write, format: OutputFormat, min_score: u8) -> Result<Self> {
        write!(out, "[")?;
        Ok(Self { out, format, min_score, first: true })
    }

    /// 写出一条结果；返回是否真正写出
    pub fn write(&mut self, result: &ScanResult) -> Result<bool> {
        if result.threat_score() < self.min_score {
            return Ok(false);
        }
        if !self.first { write!(self.out, ",")?; } else { self.first = false; }
        match self.format {
            OutputFormat::Json => serde_json::to_writer(&mut *self.out, result)?,
            OutputFormat::JsonPretty => {
                let body = serde_json::to_string_pretty(result)?;
                write!(self.out, "\n  {}", body.replace('\n', "\n  "))?;
            }
        }
        Ok(true)
    }

    pub fn finish(self) -> Result<()> {
        if self.format == OutputFormat::JsonPretty && !self.first {
            writeln!(self.out)?;
        }
        write!(self.out, "]")?;
        Ok(())
    }
}

fn record(stats: &mut ScanStats, writer: &mut ResultWriter<'_>, result: &ScanResult) -> Result<()> {
    stats.targets_scanned += 1;
    if is_fallback(result) { stats.fallbacks += 1; }
    if writer.write(result)? { stats.results_written += 1; }
    Ok(())
}

/// 按大小上限过滤文件输入
fn within_size_limit(inputs: &[ScanInput], max_file_size: Option<u64>, stats: &mut ScanStats) -> Vec<ScanInput> {
    let Some(max) = max_file_size else { return inputs.to_vec() };
    let mut kept = Vec::with_capacity(inputs.len());
    for input in inputs {
        if let ScanInput::File(p) = input {
            if let Ok(md) = std::fs::metadata(p) {
                if md.len() > max {
                    debug!(path = %p.display(), size = md.len(), max, "skipping oversized file");
                    stats.skipped += 1;
                    continue;
                }
            }
        }
        kept.push(input.clone());
    }
    kept
}

/// 本地分析单个输入（同步，无远端）
fn analyze_input(input: &ScanInput, rules: &RuleBook) -> ScanResult {
    match input.load() {
        Ok(target) => analyze_local(&target, rules),
        Err(e) => {
            debug!(identity = %input.identity(), error = %e, "local analysis failed");
            ScanResult::from_local_error(input.identity(), input.kind(), &e)
        }
    }
}

/// 本地模式：扫描输入并将结果以 JSON 数组流式写入 `out`
///
/// 线程数 > 1 时走并行调度，否则串行；两条路径的输出顺序都与输入顺序一致。
pub fn scan_and_write(inputs: &[ScanInput], out: &mut dyn Write, session: &ScanSession) -> Result<ScanStats> {
    let opts = session.options();
    let mut stats = ScanStats::default();
    let inputs = within_size_limit(inputs, opts.max_file_size, &mut stats);
    let threads = opts.threads.unwrap_or_else(num_cpus::get);
    let store = session.store();

    let mut writer = ResultWriter::begin(out, session.format(), opts.min_score)?;
    if threads > 1 && inputs.len() > 1 {
        scan_parallel(&inputs, &mut writer, session, &mut stats, threads)?;
    } else {
        let rules = session.rules();
        for input in &inputs {
            let result = analyze_input(input, &rules);
            record(&mut stats, &mut writer, &result)?;
            store.put(result);
        }
    }
    writer.finish()?;
    info!(scanned = stats.targets_scanned, written = stats.results_written, skipped = stats.skipped, "local scan finished");
    Ok(stats)
}

/// 并行调度：
/// - Rayon 线程池并行分析
/// - 单个 Writer 按 idx 重排并流式写 JSON，保证稳定顺序
fn scan_parallel(
    inputs: &[ScanInput],
    writer: &mut ResultWriter<'_>,
    session: &ScanSession,
    stats: &mut ScanStats,
    threads: usize,
) -> Result<()> {
    use crossbeam_channel as channel;
    use rayon::prelude::*;

    type Msg = (usize /*idx*/, ScanResult);
    let (tx, rx) = channel::bounded::<Msg>(256);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("build rayon pool")?;
    let rules = session.rules();
    let store = session.store();
    let indexed: Vec<(usize, ScanInput)> = inputs.iter().cloned().enumerate().collect();

    // Writer 留在当前线程，扫描在后台线程的线程池内执行
    let scan_thread = std::thread::spawn(move || {
        pool.install(|| {
            indexed.par_iter().for_each_with(tx, |tx, (idx, input)| {
                let _ = tx.send((*idx, analyze_input(input, &rules)));
            });
        });
        // 结束后 Sender 全部被丢弃，Receiver 将收到关闭信号
    });

    let mut next_idx: usize = 0;
    let mut buffer: BTreeMap<usize, ScanResult> = BTreeMap::new();
    while let Ok((idx, result)) = rx.recv() {
        buffer.insert(idx, result);
        while let Some(result) = buffer.remove(&next_idx) {
            record(stats, writer, &result)?;
            store.put(result);
            next_idx += 1;
        }
    }

    if scan_thread.join().is_err() {
        anyhow::bail!("scan worker panicked");
    }
    Ok(())
}

/// 远端模式（backend / deep）：由编排器有界并发处理，按输入顺序流式写出
pub async fn scan_and_write_remote(
    inputs: &[ScanInput],
    out: &mut dyn Write,
    session: &ScanSession,
    orchestrator: &Orchestrator,
) -> Result<ScanStats> {
    let opts = session.options();
    let mut stats = ScanStats::default();
    let inputs = within_size_limit(inputs, opts.max_file_size, &mut stats);

    let mut writer = ResultWriter::begin(out, session.format(), opts.min_score)?;
    let results = orchestrator.scan_stream(&inputs);
    futures::pin_mut!(results);
    while let Some(result) = results.next().await {
        record(&mut stats, &mut writer, &result)?;
    }
    writer.finish()?;
    info!(
        mode = ?orchestrator.mode(),
        scanned = stats.targets_scanned,
        written = stats.results_written,
        fallbacks = stats.fallbacks,
        "remote scan finished"
    );
    Ok(stats)
}
