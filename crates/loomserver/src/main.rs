use actix_cors::Cors;
use actix_web::{
    delete, get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult,
};
use actix_ws::Message;
use loomcore::{Value, Workflow};
use loomruntime::FlowRuntime;
use loomstore::WorkflowStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<FlowRuntime>,
    store: WorkflowStore,
}

/// Request body for workflow execution
#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    inputs: HashMap<String, serde_json::Value>,
}

/// Request body for pinning node outputs
#[derive(Debug, Deserialize)]
struct PinRequest {
    outputs: HashMap<String, serde_json::Value>,
}

/// Response for workflow creation
#[derive(Debug, Serialize)]
struct WorkflowResponse {
    id: Uuid,
    message: String,
}

/// Response for workflow execution
#[derive(Debug, Serialize)]
struct ExecutionResponse {
    execution_id: Uuid,
    completed_nodes: usize,
    failed_nodes: usize,
    total_nodes: usize,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "loom"
    }))
}

/// List all stored workflows
#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    match data.store.list().await {
        Ok(summaries) => {
            let workflow_list: Vec<_> = summaries
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "id": s.id,
                        "name": s.name,
                        "active": s.active,
                        "trigger_count": s.trigger_count,
                    })
                })
                .collect();
            Ok(HttpResponse::Ok().json(workflow_list))
        }
        Err(e) => Ok(HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string()))),
    }
}

/// Create a new workflow
#[post("/api/workflows")]
async fn create_workflow(
    data: web::Data<AppState>,
    workflow: web::Json<Workflow>,
) -> ActixResult<impl Responder> {
    let workflow = workflow.into_inner();
    let workflow_id = workflow.id;

    info!("Creating workflow: {} ({})", workflow.name, workflow_id);

    if let Err(e) = data.store.save(&workflow).await {
        error!("Failed to persist workflow {}: {}", workflow_id, e);
        return Ok(HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string())));
    }

    data.runtime.register_workflow(workflow).await;

    Ok(HttpResponse::Created().json(WorkflowResponse {
        id: workflow_id,
        message: "Workflow created successfully".to_string(),
    }))
}

/// Get a specific workflow
#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();

    match data.store.load(workflow_id).await {
        Ok(Some(workflow)) => Ok(HttpResponse::Ok().json(workflow)),
        Ok(None) => Ok(HttpResponse::NotFound()
            .json(ErrorResponse::new(format!("Workflow {} not found", workflow_id)))),
        Err(e) => Ok(HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string()))),
    }
}

/// Delete a workflow
#[delete("/api/workflows/{id}")]
async fn delete_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();

    match data.store.delete(workflow_id).await {
        Ok(true) => {
            data.runtime.unregister_workflow(workflow_id).await;
            info!("Deleted workflow: {}", workflow_id);
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "message": "Workflow deleted successfully"
            })))
        }
        Ok(false) => Ok(HttpResponse::NotFound()
            .json(ErrorResponse::new(format!("Workflow {} not found", workflow_id)))),
        Err(e) => Ok(HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string()))),
    }
}

/// Execute a workflow
#[post("/api/workflows/{id}/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<ExecuteRequest>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    let inputs = req.into_inner().inputs;

    info!("Executing workflow: {}", workflow_id);

    let workflow = match data.store.load(workflow_id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => {
            return Ok(HttpResponse::NotFound()
                .json(ErrorResponse::new(format!("Workflow {} not found", workflow_id))))
        }
        Err(e) => {
            return Ok(
                HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string()))
            )
        }
    };

    if let Err(e) = data.store.increment_trigger_count(workflow_id).await {
        warn!("Failed to bump trigger count for {}: {}", workflow_id, e);
    }

    let converted_inputs: HashMap<String, Value> = inputs
        .into_iter()
        .map(|(k, v)| (k, Value::from_json(v)))
        .collect();

    match data.runtime.execute(&workflow, converted_inputs).await {
        Ok(result) => {
            info!(
                "Workflow {} completed: {}/{} nodes ({} failed)",
                workflow_id, result.completed_nodes, result.total_nodes, result.failed_nodes
            );

            Ok(HttpResponse::Ok().json(ExecutionResponse {
                execution_id: result.execution_id,
                completed_nodes: result.completed_nodes,
                failed_nodes: result.failed_nodes,
                total_nodes: result.total_nodes,
            }))
        }
        Err(e) => {
            error!("Workflow {} execution failed: {}", workflow_id, e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string())))
        }
    }
}

/// Pin sample outputs for a node so executions use them instead of
/// running the node
#[post("/api/workflows/{id}/pin/{node_id}")]
async fn pin_node(
    data: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
    req: web::Json<PinRequest>,
) -> ActixResult<impl Responder> {
    let (workflow_id, node_id) = path.into_inner();

    let mut workflow = match data.store.load(workflow_id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => {
            return Ok(HttpResponse::NotFound()
                .json(ErrorResponse::new(format!("Workflow {} not found", workflow_id))))
        }
        Err(e) => {
            return Ok(
                HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string()))
            )
        }
    };

    if workflow.find_node(node_id).is_none() {
        return Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Node {} not in workflow {}",
            node_id, workflow_id
        ))));
    }

    let outputs: HashMap<String, Value> = req
        .into_inner()
        .outputs
        .into_iter()
        .map(|(k, v)| (k, Value::from_json(v)))
        .collect();

    workflow.pin_node(node_id, outputs);

    if let Err(e) = data.store.update_pin_data(workflow_id, &workflow.pin_data).await {
        return Ok(HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string())));
    }
    data.runtime.register_workflow(workflow).await;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Node pinned" })))
}

/// Remove pinned outputs from a node
#[delete("/api/workflows/{id}/pin/{node_id}")]
async fn unpin_node(
    data: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
) -> ActixResult<impl Responder> {
    let (workflow_id, node_id) = path.into_inner();

    let mut workflow = match data.store.load(workflow_id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => {
            return Ok(HttpResponse::NotFound()
                .json(ErrorResponse::new(format!("Workflow {} not found", workflow_id))))
        }
        Err(e) => {
            return Ok(
                HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string()))
            )
        }
    };

    let removed: Option<HashMap<String, Value>> = workflow.unpin_node(node_id);
    if removed.is_none() {
        return Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Node {} has no pinned data",
            node_id
        ))));
    }

    if let Err(e) = data.store.update_pin_data(workflow_id, &workflow.pin_data).await {
        return Ok(HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string())));
    }
    data.runtime.register_workflow(workflow).await;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Node unpinned" })))
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available node types
#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();
    let node_types = registry.list_node_types();

    let nodes: Vec<_> = node_types
        .iter()
        .map(|node_type| {
            let info = registry.get_info(node_type);
            serde_json::json!({
                "type": node_type,
                "description": info.as_ref().map(|i| i.description.clone()).unwrap_or_default(),
                "category": info.as_ref().map(|i| i.category.clone()).unwrap_or_default(),
                "credential": info.as_ref().and_then(|i| i.credential.clone()),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Starting loom server");

    // Create runtime with registered nodes
    let mut registry = loomruntime::NodeRegistry::new();
    loomnodes::register_all(&mut registry);

    let runtime = FlowRuntime::with_registry(
        Arc::new(registry),
        loomruntime::RuntimeConfig::default(),
    );

    // Seed credentials from disk when configured
    if let Ok(path) = std::env::var("LOOM_CREDENTIALS") {
        let loaded = runtime.credentials().load_file(&path).await?;
        info!("Loaded {} credential entries from {}", loaded, path);
    }

    // Open the workflow store and re-register persisted workflows
    let db_path = std::env::var("LOOM_DB").unwrap_or_else(|_| "loom.db".to_string());
    let store = WorkflowStore::open(&db_path).await?;
    let summaries = store.list().await?;
    for summary in &summaries {
        if let Some(workflow) = store.load(summary.id).await? {
            runtime.register_workflow(workflow).await;
        }
    }
    info!(
        "Store ready at {} with {} workflow(s)",
        db_path,
        summaries.len()
    );

    let app_state = web::Data::new(AppState {
        runtime: Arc::new(runtime),
        store,
    });

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_workflows)
            .service(create_workflow)
            .service(get_workflow)
            .service(delete_workflow)
            .service(execute_workflow)
            .service(pin_node)
            .service(unpin_node)
            .service(websocket_events)
            .service(list_node_types)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
