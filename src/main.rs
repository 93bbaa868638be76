use anyhow::Context;
use clap::Parser;
use stackplan::config::cli::LogFormat;
use stackplan::config::toml_config::StackFile;
use stackplan::core::emitter::render_access_table;
use stackplan::core::engine::PlanOutcome;
use stackplan::domain::ports::HostPortProbe;
use stackplan::utils::error::ErrorSeverity;
use stackplan::utils::{logger, validation::Validate};
use stackplan::{
    CliConfig, ComposeLifecycle, EffectiveConfig, LocalStorage, SocketProbe, StackEngine,
    StackError,
};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    match cli.log_format {
        LogFormat::Text => logger::init_cli_logger(cli.verbose),
        LogFormat::Json => logger::init_json_logger(cli.verbose),
    }

    tracing::info!("🚀 Starting stackplan");
    tracing::info!("📁 Loading stack file from: {}", cli.config);

    let file = StackFile::from_file(&cli.config)
        .with_context(|| format!("failed to load stack file '{}'", cli.config));
    let file = match file {
        Ok(file) => file,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    // 預設 < 檔案 < 環境變數 < 命令列，只在這裡解析一次
    let env: HashMap<String, String> = std::env::vars().collect();
    let config = match EffectiveConfig::resolve(&file, &env, &cli.overrides()) {
        Ok(config) => config,
        Err(e) => exit_with(e),
    };
    if let Err(e) = config.validate() {
        exit_with(e);
    }
    tracing::debug!("Effective config: {:?}", config);

    let engine = StackEngine::new(config);
    let effective = engine.config();
    let lifecycle = Arc::new(
        ComposeLifecycle::new(effective.project.clone(), cli.output_dir.clone())
            .with_env_file(effective.env_file.clone())
            .with_files(effective.compose_files.iter().cloned())
            .with_profile(effective.profile.clone()),
    );

    // 停止時只需要服務名稱，不解析也不探測埠號
    if cli.down {
        match engine.down(lifecycle).await {
            Ok(stopped) if stopped.is_empty() => println!("Nothing to stop."),
            Ok(stopped) => println!("⏹️ Stopped: {}", stopped.join(", ")),
            Err(e) => exit_with(e),
        }
        return Ok(());
    }

    let probe = SocketProbe::default();
    let probe: Option<&dyn HostPortProbe> = if cli.no_probe { None } else { Some(&probe) };

    if cli.dry_run {
        tracing::info!("🔍 DRY RUN MODE - nothing is written or started");
        let outcome = match engine.plan(probe) {
            Ok(outcome) => outcome,
            Err(e) => exit_with(e),
        };
        print_dry_run(&outcome, cli.json)?;
        return Ok(());
    }

    let storage = LocalStorage::new(cli.output_dir.clone());
    let running = match engine.previous_run(&storage, lifecycle.as_ref()).await {
        Ok(running) => running,
        Err(e) => exit_with(e),
    };
    let outcome = match engine.plan_around(probe, &running) {
        Ok(outcome) => outcome,
        Err(e) => exit_with(e),
    };

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl-C");
            let _ = cancel_tx.send(true);
        }
    });

    let report = engine
        .up(&outcome, &storage, lifecycle, &running, cancel_rx)
        .await
        .and_then(|report| report.into_result());

    match report {
        Ok(report) => {
            println!("\n{}", "=".repeat(60));
            println!("Services started successfully! ({})", report.run_id);
            println!("{}", "=".repeat(60));
            println!("\nRunning services:");
            print!("{}", render_access_table(&outcome.plan));
            println!("{}", "=".repeat(60));
        }
        Err(e) => exit_with(e),
    }

    Ok(())
}

fn print_dry_run(outcome: &PlanOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", outcome.emitted.to_json()?);
        return Ok(());
    }
    println!("# --- env file ---");
    print!("{}", outcome.emitted.render_env_file());
    println!("# --- compose override ---");
    print!("{}", outcome.emitted.render_override_file()?);
    println!("# --- access ---");
    print!("{}", render_access_table(&outcome.plan));
    Ok(())
}

fn exit_with(e: StackError) -> ! {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());

    // 依嚴重程度決定退出碼
    let code = match e.severity() {
        ErrorSeverity::Low => 130,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(code);
}
