use std::sync::Arc;

use tokio::io::AsyncReadExt;

use email_assist::config::AssistConfig;
use email_assist::flagging::FileFlagSink;
use email_assist::llm::create_provider;
use email_assist::pipeline::{EmailInput, Orchestrator};
use email_assist::samples::SAMPLES;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing (stderr, so stdout carries only results)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = AssistConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("  export OPENAI_API_KEY=sk-...");
        eprintln!("  (or EMAIL_ASSIST_BACKEND=anthropic with ANTHROPIC_API_KEY=sk-ant-...)");
        std::process::exit(1);
    });

    eprintln!("📧 Email Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({:?})", config.llm.model, config.llm.backend);
    eprintln!("   Flagged emails: {}", config.flag_dir.display());
    eprintln!(
        "   Analysis: {}",
        if config.pipeline.parallel_analysis {
            "parallel"
        } else {
            "sequential"
        }
    );
    eprintln!("   Paste an email and press Ctrl-D (empty input runs the samples).\n");

    let llm = create_provider(&config.llm)?;
    let flag_sink = Arc::new(FileFlagSink::new(config.flag_dir.clone()));
    let orchestrator = Orchestrator::with_config(llm, flag_sink, &config.pipeline);

    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;

    let emails: Vec<(&str, EmailInput)> = if input.trim().is_empty() {
        SAMPLES
            .iter()
            .map(|s| (s.name, EmailInput::new(s.text)))
            .collect()
    } else {
        vec![("stdin", EmailInput::new(input))]
    };

    let mut failures = 0usize;
    for (name, email) in &emails {
        println!("=== {} ===", name);
        match orchestrator.process(email).await {
            Ok(result) => println!("{}\n", result),
            Err(e) => {
                failures += 1;
                println!("{}\n", e.user_message());
            }
        }
    }

    if failures > 0 {
        eprintln!("{} of {} email(s) failed", failures, emails.len());
        std::process::exit(1);
    }

    Ok(())
}
