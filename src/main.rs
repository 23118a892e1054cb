//! agentcorp - command line entry point
//!
//! With arguments, runs them as one query through triage and decomposition.
//! Without, starts an interactive session on stdin.

use std::collections::HashMap;

use agentcorp::config::{create_agent_from_config, load_agent_from_file, AgentConfig, SystemPromptSource};
use agentcorp::{Agent, Config, ToolRegistry};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools when they help \
     answer the request, and report results concisely.";

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let default_filter = if config.verbose {
        "agentcorp=debug"
    } else {
        "agentcorp=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let registry = ToolRegistry::with_builtin_tools();
    let mut agent = build_agent(&config, &registry)?;
    info!(
        "Agent ready: provider={} model={} tools={}",
        agent.provider().kind(),
        agent.provider().model(),
        agent.tools().len()
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        let answer = agent.handle_complex_query(&args.join(" ")).await?;
        println!("{}", answer);
        info!("Total cost: ${:.6}", agent.total_cost());
        return Ok(());
    }

    repl(&mut agent).await
}

fn build_agent(config: &Config, registry: &ToolRegistry) -> anyhow::Result<Agent> {
    let api_keys = HashMap::new();
    if let Some(path) = &config.agent_config {
        info!("Loading agent definition from {}", path.display());
        return Ok(load_agent_from_file(path, &api_keys, registry, config)?);
    }

    let mut definition = AgentConfig::new("openai", "gpt-4-turbo");
    definition.name = Some("assistant".to_string());
    definition.system_prompt = SystemPromptSource::Text(DEFAULT_SYSTEM_PROMPT.to_string());
    definition.tools = registry.list_tools().into_iter().map(|t| t.name).collect();
    match std::env::current_dir() {
        Ok(dir) => {
            definition
                .context_settings
                .insert("workingdir".to_string(), dir.to_string_lossy().to_string());
        }
        Err(e) => warn!("Could not determine current directory: {}", e),
    }
    Ok(create_agent_from_config(&definition, &api_keys, registry, config)?)
}

async fn repl(agent: &mut Agent) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "/cost" => {
                println!(
                    "${:.6} ({} input / {} output tokens)",
                    agent.total_cost(),
                    agent.memory().total_input_tokens(),
                    agent.memory().total_output_tokens()
                );
            }
            "/tasks" => {
                let summary = agent.get_tasks().await;
                for (label, tasks) in [
                    ("pending", &summary.pending),
                    ("in_progress", &summary.in_progress),
                    ("completed", &summary.completed),
                    ("failed", &summary.failed),
                ] {
                    println!("{}: {}", label, tasks.len());
                    for description in tasks {
                        println!("  - {}", description);
                    }
                }
            }
            query => match agent.handle_complex_query(query).await {
                Ok(answer) => println!("{}", answer),
                Err(e) => warn!("Query failed: {}", e),
            },
        }
    }
    Ok(())
}
