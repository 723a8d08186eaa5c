//! SignalLab 命令行入口
//!
//! 生成配置、列出插件、对两个分隔文本文件做DTW对齐。

use anyhow::{bail, Context};
use serde_json::json;
use signal_lab::{
    config::{generate_default_config_file, init_logging, ConfigManager, LoggingConfig},
    data::{validate_table, value_series, DelimitedTableLoader, TableLoader},
    ExecutionRequest, InputValue, PluginInputs, PluginRegistry, RegistryConfig, PLATFORM_NAME, VERSION,
};
use std::env;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "signal_lab.yaml";

/// 程序入口点
#[tokio::main]
async fn main() {
    if let Err(e) = run_main().await {
        tracing::error!("❌ 运行失败: {:#}", e);
        std::process::exit(1);
    }
}

/// 主要逻辑函数
async fn run_main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["init"] => generate_config_file(DEFAULT_CONFIG_PATH).await,
        ["init", path] => generate_config_file(path).await,
        ["plugins", config_path] => list_plugins(config_path).await,
        ["align", a, b] => align_files(a, b, None).await,
        ["align", a, b, window] => {
            let window: usize = window
                .parse()
                .with_context(|| format!("window must be a non-negative integer, got '{}'", window))?;
            align_files(a, b, Some(window)).await
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

/// 生成默认配置文件
async fn generate_config_file(path: &str) -> anyhow::Result<()> {
    init_logging(&LoggingConfig::default());
    tracing::info!("📝 生成默认配置文件: {}", path);

    generate_default_config_file(path).await?;

    tracing::info!("✅ 配置文件生成完成");
    tracing::info!("🔧 编辑后运行: signal_lab plugins {}", path);
    Ok(())
}

/// 按配置发现并装载插件，打印列表
async fn list_plugins(config_path: &str) -> anyhow::Result<()> {
    if !Path::new(config_path).exists() {
        init_logging(&LoggingConfig::default());
        tracing::info!("💡 使用 'signal_lab init' 生成默认配置文件");
        bail!("config file not found: {}", config_path);
    }

    let manager = ConfigManager::load_from_file(config_path).await?;
    let config = manager.get_config();
    init_logging(&config.logging);
    manager.validate()?;

    tracing::info!("🚀 启动 {} v{}", PLATFORM_NAME, VERSION);
    tracing::info!("📄 配置文件: {}", config_path);

    let registry = PluginRegistry::with_builtins(config.registry_config()?)?;

    for root in &config.plugin_roots {
        if !root.is_dir() {
            tracing::warn!("⚠️  插件目录不存在: {}", root.display());
            continue;
        }
        let report = registry.discover(root).await?;
        for (plugin_id, version) in &report.discovered {
            if let Err(e) = registry.load(plugin_id, Some(version)) {
                tracing::warn!("⚠️  装载 {}@{} 失败: {}", plugin_id, version, e);
            }
        }
        for failure in &report.errors {
            tracing::warn!("❌ {}: {}", failure.path.display(), failure.error);
        }
    }

    println!("{:<20} {:<10} {:<10} {:<20} PRODUCES", "ID", "VERSION", "STATE", "ENTRY POINT");
    for plugin in registry.list_plugins() {
        println!(
            "{:<20} {:<10} {:<10} {:<20} {}",
            plugin.id,
            plugin.version.to_string(),
            format!("{:?}", plugin.state),
            plugin.entry_point,
            plugin.produces.join(",")
        );
    }
    Ok(())
}

/// 对齐两个文件中的序列
async fn align_files(a: &str, b: &str, window: Option<usize>) -> anyhow::Result<()> {
    init_logging(&LoggingConfig::default());
    let loader = DelimitedTableLoader::new();

    let mut inputs = PluginInputs::new();
    for (name, path) in [("series_a", a), ("series_b", b)] {
        let table = loader
            .load(Path::new(path))
            .await
            .with_context(|| format!("failed to load {}", path))?;
        for warning in validate_table(&table) {
            tracing::warn!("⚠️  {}: {}", path, warning);
        }
        inputs.insert(name, InputValue::Sequence(value_series(&table)?));
    }

    let registry = PluginRegistry::with_builtins(RegistryConfig::default())?;
    let mut request = ExecutionRequest::new("dtw", inputs).with_override("return_path", json!(true));
    if let Some(window) = window {
        request = request.with_override("window_size", json!(window));
    }

    let result = registry.execute(request).await;
    let elapsed = result.usage.elapsed;
    let output = result.into_result()?;
    let alignment = output
        .as_alignment()
        .context("dtw plugin returned no alignment")?;

    tracing::info!("📈 对齐完成，用时 {:?}", elapsed);
    println!("distance:    {:.6}", alignment.distance);
    println!("path length: {}", alignment.path_length);
    if let Some(normalized) = alignment.normalized_distance {
        println!("normalized:  {:.6}", normalized);
    }
    Ok(())
}

/// 打印使用说明
fn print_usage() {
    println!("{} 信号分析平台 v{}", PLATFORM_NAME, VERSION);
    println!();
    println!("用法:");
    println!("  signal_lab init [path]              # 生成默认配置文件");
    println!("  signal_lab plugins <config_file>    # 发现并列出插件");
    println!("  signal_lab align <a> <b> [window]   # 对两个分隔文本文件做DTW对齐");
    println!();
    println!("示例:");
    println!("  signal_lab init");
    println!("  signal_lab align a.csv b.csv 10");
}
