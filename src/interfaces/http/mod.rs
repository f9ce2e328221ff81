use crate::application::IngestOptions;
use crate::domain::custodian::SourceSystem;
use crate::domain::error::{AppError, Result};
use crate::domain::ingest_report::ClearScope;
use crate::domain::staging::{CollectionFilter, CollectionName};
use crate::interfaces::state::AppState;
use crate::shared::log_buffer::{add_log, snapshot, SharedLogs};
use actix_cors::Cors;
use actix_web::{
    delete, dev::Server, get, post, web, App, HttpResponse, HttpServer, Responder, Scope,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct HttpState {
    pub app_state: Arc<AppState>,
    pub logs: SharedLogs,
}

#[derive(Deserialize)]
pub struct IngestRequest {
    /// File or directory inside the inbox, relative to it or absolute; the inbox
    /// itself when omitted.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(flatten)]
    pub options: IngestOptions,
}

#[derive(Deserialize)]
pub struct ProcessRequest {
    /// Collection name, `kind`, `kind.date` or a legacy `kind_MM_DD` filter.
    #[serde(default)]
    pub collection: Option<String>,
}

#[derive(Deserialize)]
pub struct ClearWarehouseQuery {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

fn error_response(err: &AppError) -> HttpResponse {
    let body = json!({ "error": err.to_string() });
    match err {
        AppError::NotFound(_) => HttpResponse::NotFound().json(body),
        AppError::ValidationError(_) | AppError::ParseError(_) => {
            HttpResponse::BadRequest().json(body)
        }
        _ => HttpResponse::InternalServerError().json(body),
    }
}

/// Resolve a requested ingest path, refusing anything that lands outside the inbox
/// once `..` segments and symlinks are resolved.
fn resolve_in_inbox(inbox: &Path, requested: Option<&Path>) -> Result<PathBuf> {
    let inbox = std::fs::canonicalize(inbox)
        .map_err(|e| AppError::NotFound(format!("Inbox {}: {}", inbox.display(), e)))?;
    let Some(requested) = requested else {
        return Ok(inbox);
    };

    let candidate = inbox.join(requested);
    let resolved = std::fs::canonicalize(&candidate)
        .map_err(|_| AppError::NotFound(format!("Path {}", requested.display())))?;
    if !resolved.starts_with(&inbox) {
        return Err(AppError::ValidationError(format!(
            "Path {} is outside the inbox",
            requested.display()
        )));
    }
    Ok(resolved)
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[get("/stats")]
async fn stats(data: web::Data<HttpState>) -> impl Responder {
    let staging = match data.app_state.staging.stats().await {
        Ok(stats) => stats,
        Err(e) => return error_response(&e),
    };
    match data.app_state.warehouse.stats().await {
        Ok(warehouse) => HttpResponse::Ok().json(json!({
            "staging": staging,
            "warehouse": warehouse,
        })),
        Err(e) => error_response(&e),
    }
}

#[post("/ingest")]
async fn ingest(data: web::Data<HttpState>, req: web::Json<IngestRequest>) -> impl Responder {
    let req = req.into_inner();
    let path = match resolve_in_inbox(&data.app_state.config.ingest.inbox_dir, req.path.as_deref()) {
        Ok(path) => path,
        Err(e) => {
            add_log(&data.logs, "WARN", "HttpApi", &format!("Ingest refused: {}", e));
            return error_response(&e);
        }
    };

    add_log(
        &data.logs,
        "INFO",
        "HttpApi",
        &format!(
            "Ingest requested for {} (stage_only={} archive={})",
            path.display(),
            req.options.stage_only,
            req.options.archive
        ),
    );

    match data.app_state.ingestion.ingest_path(&path, &req.options).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => {
            add_log(&data.logs, "ERROR", "HttpApi", &format!("Ingest failed: {}", e));
            error_response(&e)
        }
    }
}

#[post("/process")]
async fn process(data: web::Data<HttpState>, req: web::Json<ProcessRequest>) -> impl Responder {
    let filter = match req.collection.as_deref() {
        Some(raw) => match CollectionFilter::parse(raw) {
            Ok(filter) => filter,
            Err(e) => return error_response(&e),
        },
        None => CollectionFilter::All,
    };

    match data.app_state.etl.run(&filter).await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => {
            add_log(&data.logs, "ERROR", "HttpApi", &format!("Process failed: {}", e));
            error_response(&e)
        }
    }
}

#[delete("/staging")]
async fn clear_staging(data: web::Data<HttpState>) -> impl Responder {
    match data.app_state.staging.clear().await {
        Ok(dropped) => {
            add_log(
                &data.logs,
                "INFO",
                "HttpApi",
                &format!("Dropped {} staged collection(s)", dropped),
            );
            HttpResponse::Ok().json(json!({ "dropped": dropped }))
        }
        Err(e) => error_response(&e),
    }
}

#[delete("/staging/{name}")]
async fn drop_collection(data: web::Data<HttpState>, name: web::Path<String>) -> impl Responder {
    let name = match name.parse::<CollectionName>() {
        Ok(name) => name,
        Err(e) => return error_response(&e),
    };
    match data.app_state.staging.drop_collection(&name).await {
        Ok(true) => HttpResponse::Ok().json(json!({ "dropped": name.to_string() })),
        Ok(false) => error_response(&AppError::NotFound(format!("Collection {}", name))),
        Err(e) => error_response(&e),
    }
}

#[delete("/warehouse")]
async fn clear_warehouse(
    data: web::Data<HttpState>,
    query: web::Query<ClearWarehouseQuery>,
) -> impl Responder {
    let source_system = match query.source.as_deref().map(str::parse::<SourceSystem>) {
        Some(Ok(source)) => Some(source),
        Some(Err(e)) => return error_response(&e),
        None => None,
    };
    let scope = ClearScope {
        source_system,
        record_date: query.date,
    };

    match data.app_state.warehouse.clear(&scope).await {
        Ok(deleted) => {
            add_log(
                &data.logs,
                "WARN",
                "HttpApi",
                &format!("Cleared {} warehouse row(s)", deleted),
            );
            HttpResponse::Ok().json(json!({ "deleted": deleted }))
        }
        Err(e) => error_response(&e),
    }
}

#[get("/logs")]
async fn get_logs(data: web::Data<HttpState>) -> impl Responder {
    HttpResponse::Ok().json(snapshot(&data.logs))
}

fn api_scope() -> Scope {
    web::scope("/api")
        .service(health)
        .service(stats)
        .service(ingest)
        .service(process)
        .service(clear_staging)
        .service(drop_collection)
        .service(clear_warehouse)
        .service(get_logs)
}

pub fn start_server(app_state: Arc<AppState>) -> std::io::Result<Server> {
    let host = app_state.config.http.host.clone();
    let port = app_state.config.http.port;
    let state = web::Data::new(HttpState {
        logs: app_state.logs.clone(),
        app_state,
    });

    add_log(
        &state.logs,
        "INFO",
        "HttpApi",
        &format!("Listening on http://{}:{}/api", host, port),
    );

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .service(api_scope())
    })
    .bind((host.as_str(), port))?
    .run();

    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::file_ingestion::tests::{scratch_dir, MemoryWarehouse};
    use crate::infrastructure::config::AppConfig;
    use crate::infrastructure::db::staging::StagingRepository;
    use crate::shared::log_buffer::new_log_buffer;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::Value;

    async fn http_state(inbox: &Path) -> web::Data<HttpState> {
        let staging = Arc::new(StagingRepository::connect("sqlite::memory:", 1).await.unwrap());
        let warehouse = Arc::new(MemoryWarehouse::default());
        let logs = new_log_buffer();
        let mut config = AppConfig::default();
        config.ingest.inbox_dir = inbox.to_path_buf();
        let app_state = Arc::new(AppState::new(
            config,
            staging,
            warehouse,
            logs.clone(),
        ));
        web::Data::new(HttpState { app_state, logs })
    }

    #[actix_web::test]
    async fn test_health() {
        let app = test::init_service(App::new().service(api_scope())).await;
        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ok");
    }

    #[actix_web::test]
    async fn test_ingest_then_stats() {
        let dir = scratch_dir();
        let file = dir.join("hdfc_holding_30062024.csv");
        std::fs::write(
            &file,
            "Client Code,Client Name,ISIN,Security Name,Pledged Qty,Free Balance,Total Balance\n\
             C001,Asha Rao,INE002A01018,RELIANCE INDUSTRIES,10,90,100\n\
             C002,Vikram Shah,INE009A01021,INFOSYS,0,25,25\n",
        )
        .unwrap();

        let state = http_state(&dir).await;
        let app = test::init_service(App::new().app_data(state.clone()).service(api_scope())).await;

        let req = test::TestRequest::post()
            .uri("/api/ingest")
            .set_json(json!({ "path": "hdfc_holding_30062024.csv" }))
            .to_request();
        let report: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(report["files"], 1);
        assert_eq!(report["succeeded"], 1);
        assert_eq!(report["rows_accepted"], 2);

        let req = test::TestRequest::get().uri("/api/stats").to_request();
        let stats_body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stats_body["staging"]["collections"], 1);
        assert_eq!(stats_body["warehouse"]["custody_rows"], 2);

        let req = test::TestRequest::get().uri("/api/logs").to_request();
        let logs: Value = test::call_and_read_body_json(&app, req).await;
        assert!(!logs.as_array().unwrap().is_empty());

        std::fs::remove_dir_all(dir).ok();
    }

    #[actix_web::test]
    async fn test_missing_path_is_not_found() {
        let dir = scratch_dir();
        let state = http_state(&dir).await;
        let app = test::init_service(App::new().app_data(state).service(api_scope())).await;
        let req = test::TestRequest::post()
            .uri("/api/ingest")
            .set_json(json!({ "path": "not-here.csv" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        std::fs::remove_dir_all(dir).ok();
    }

    #[actix_web::test]
    async fn test_ingest_refuses_paths_outside_inbox() {
        let inbox = scratch_dir();
        let elsewhere = scratch_dir();
        let outside = elsewhere.join("hdfc_holding_30062024.csv");
        std::fs::write(&outside, "Client Code,ISIN\nC001,INE002A01018\n").unwrap();

        let state = http_state(&inbox).await;
        let app = test::init_service(App::new().app_data(state.clone()).service(api_scope())).await;

        let escaping = PathBuf::from("..")
            .join(elsewhere.file_name().unwrap())
            .join("hdfc_holding_30062024.csv");
        for path in [outside.clone(), escaping] {
            let req = test::TestRequest::post()
                .uri("/api/ingest")
                .set_json(json!({ "path": path }))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
        assert!(outside.exists());
        assert_eq!(state.app_state.staging.stats().await.unwrap().collections, 0);

        std::fs::remove_dir_all(inbox).ok();
        std::fs::remove_dir_all(elsewhere).ok();
    }

    #[actix_web::test]
    async fn test_drop_collection_errors() {
        let state = http_state(&std::env::temp_dir()).await;
        let app = test::init_service(App::new().app_data(state).service(api_scope())).await;

        let req = test::TestRequest::delete()
            .uri("/api/staging/not-a-collection")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::delete()
            .uri("/api/staging/custody.2024-06-30.hdfc")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_clear_warehouse_rejects_unknown_source() {
        let state = http_state(&std::env::temp_dir()).await;
        let app = test::init_service(App::new().app_data(state).service(api_scope())).await;

        let req = test::TestRequest::delete()
            .uri("/api/warehouse?source=nowhere")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::delete()
            .uri("/api/warehouse?source=hdfc&date=2024-06-30")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["deleted"], 0);
    }

    #[actix_web::test]
    async fn test_process_with_bad_filter() {
        let state = http_state(&std::env::temp_dir()).await;
        let app = test::init_service(App::new().app_data(state).service(api_scope())).await;
        let req = test::TestRequest::post()
            .uri("/api/process")
            .set_json(json!({ "collection": "pizza" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/process")
            .set_json(json!({}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["collections"], 0);
    }
}
