// crates/loomcli/src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use loomcore::{ExecutionEvent, Value, Workflow};
use loomruntime::FlowRuntime;
use loomstore::WorkflowStore;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "loom")]
#[command(about = "Loom workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Path to a credentials JSON file
        #[arg(short, long)]
        credentials: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },

    /// Apply or revert store schema migrations
    Migrate {
        /// Path to the sqlite database file
        #[arg(long, default_value = "loom.db")]
        db: PathBuf,

        /// Revert the most recent migration instead of applying
        #[arg(long)]
        revert: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            credentials,
            verbose,
        } => {
            let level = if verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            };
            tracing_subscriber::fmt().with_max_level(level).init();

            run_workflow(file, input, credentials).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }

        Commands::Migrate { db, revert } => {
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .init();
            migrate(db, revert).await?;
        }
    }

    Ok(())
}

async fn run_workflow(
    file: PathBuf,
    input: Option<String>,
    credentials: Option<PathBuf>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow_json = std::fs::read_to_string(&file)?;
    let workflow: Workflow = serde_json::from_str(&workflow_json)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    if !workflow.pin_data.is_empty() {
        println!("   Pinned nodes: {}", workflow.pin_data.len());
    }
    println!();

    // Parse input data into the engine's value model
    let inputs: HashMap<String, Value> = if let Some(input_str) = input {
        let json: serde_json::Value = serde_json::from_str(&input_str)?;
        if let serde_json::Value::Object(obj) = json {
            obj.into_iter()
                .map(|(k, v)| (k, Value::from_json(v)))
                .collect()
        } else {
            return Err(anyhow::anyhow!("Input must be a JSON object"));
        }
    } else {
        HashMap::new()
    };

    let mut registry = loomruntime::NodeRegistry::new();
    loomnodes::register_all(&mut registry);

    let runtime = FlowRuntime::with_registry(
        std::sync::Arc::new(registry),
        loomruntime::RuntimeConfig::default(),
    );

    if let Some(path) = credentials {
        let loaded = runtime.credentials().load_file(&path).await?;
        println!("🔑 Loaded {} credential entries", loaded);
    }

    let mut events = runtime.subscribe_events();

    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::WorkflowStarted { .. } => {
                    println!("▶️  Workflow started");
                }
                ExecutionEvent::NodeStarted {
                    node_id, node_type, ..
                } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    duration_ms,
                    pinned,
                    ..
                } => {
                    if pinned {
                        println!("  📌 Node {} used pinned data", node_id);
                    } else {
                        println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                    }
                }
                ExecutionEvent::NodeFailed {
                    node_id,
                    error,
                    continued,
                    ..
                } => {
                    if continued {
                        println!("  ⚠️  Node {} failed (continuing): {}", node_id, error);
                    } else {
                        println!("  ❌ Node {} failed: {}", node_id, error);
                    }
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    loomcore::NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", node_id, message);
                    }
                    loomcore::NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", node_id, message);
                    }
                    loomcore::NodeEvent::Progress { percent, message } => {
                        if let Some(msg) = message {
                            println!("     📊 [{}] {}% - {}", node_id, percent, msg);
                        } else {
                            println!("     📊 [{}] {}%", node_id, percent);
                        }
                    }
                    _ => {}
                },
                ExecutionEvent::WorkflowCompleted {
                    success,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("✨ Workflow completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Workflow failed after {}ms", duration_ms);
                    }
                }
            }
        }
    });

    let result = runtime.execute(&workflow, inputs).await?;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!(
        "   Completed: {}/{} nodes ({} failed)",
        result.completed_nodes, result.total_nodes, result.failed_nodes
    );

    if !result.outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        for (node_id, outputs) in &result.outputs {
            if !outputs.is_empty() {
                println!("   Node {}:", node_id);
                for (key, value) in outputs {
                    println!("     {}: {:?}", key, value);
                }
            }
        }
    }

    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow_json = std::fs::read_to_string(&file)?;
    let workflow: Workflow = serde_json::from_str(&workflow_json)?;

    // Check every connection references a known node
    for conn in &workflow.connections {
        for endpoint in [conn.from_node, conn.to_node] {
            if workflow.find_node(endpoint).is_none() {
                return Err(anyhow::anyhow!(
                    "Connection references unknown node {}",
                    endpoint
                ));
            }
        }
    }

    // Check node types exist in the standard registry
    let mut registry = loomruntime::NodeRegistry::new();
    loomnodes::register_all(&mut registry);
    let known = registry.list_node_types();
    for node in &workflow.nodes {
        if !known.contains(&node.node_type) {
            println!("   ⚠️  Unknown node type: {}", node.node_type);
        }
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let mut registry = loomruntime::NodeRegistry::new();
    loomnodes::register_all(&mut registry);

    for node_type in registry.list_node_types() {
        if let Some(info) = registry.get_info(&node_type) {
            println!("  • {} ({})", node_type, info.category);
            println!("    {}", info.description);
            if let Some(credential) = info.credential {
                println!("    requires credential: {}", credential);
            }
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    use loomcore::NodeSpec;

    let mut workflow = Workflow::new("Example HTTP Workflow");
    workflow.description = Some("Fetches data from an API and logs the result".to_string());

    let http_node = NodeSpec::new("http.request")
        .with_name("Fetch Data")
        .with_config("method", "GET")
        .with_position(100.0, 100.0);

    let debug_node = NodeSpec::new("debug.log")
        .with_name("Log Response")
        .with_position(300.0, 100.0);

    let http_id = workflow.add_node(http_node);
    let debug_id = workflow.add_node(debug_node);

    workflow.connect(http_id, "body", debug_id, "message");

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  loom run --file {} --input '{{\"url\": \"https://api.github.com/zen\"}}'",
        output.display()
    );

    Ok(())
}

async fn migrate(db: PathBuf, revert: bool) -> Result<()> {
    if revert {
        let name = loomstore::migrations::revert_last(&db).await?;
        println!("↩️  Reverted migration: {}", name);
    } else {
        // Opening the store applies any pending migrations
        let store = WorkflowStore::open(&db).await?;
        let count = store.list().await.map(|w| w.len()).unwrap_or(0);
        println!(
            "✅ Schema up to date at {} ({} workflows)",
            db.display(),
            count
        );
    }
    Ok(())
}
