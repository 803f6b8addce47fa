// File: services/clinic_backend/src/main.rs
use clinic_common::logging;
use clinic_config::{ensure_dotenv_loaded, load_config};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

mod app_state;

use app_state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ensure_dotenv_loaded();
    logging::init();

    let config = Arc::new(logging::log_result(
        load_config(),
        "Configuration loaded",
        "Failed to load config",
    )?);
    let state = AppState::new(config)?;

    #[allow(unused_mut)] // mutated only with the openapi feature
    let mut app = state.router();

    #[cfg(feature = "openapi")]
    {
        use clinic_gcal::doc::AgendaApiDoc;
        use utoipa::OpenApi;
        use utoipa_swagger_ui::SwaggerUi;

        #[derive(OpenApi)]
        #[openapi(
            info(
                title = "Clinic Agenda API",
                version = "0.1.0",
                description = "Appointment availability, booking and calendar authorization",
                license(name = "MIT", url = "https://opensource.org/licenses/MIT")
            ),
            servers((url = "/api", description = "Main API Prefix")),
        )]
        struct ApiDoc;

        let mut openapi_doc = ApiDoc::openapi();
        openapi_doc.merge(AgendaApiDoc::openapi());
        info!("Adding Swagger UI at /api/docs");
        app = app.merge(SwaggerUi::new("/api/docs").url("/api/docs/openapi.json", openapi_doc));
    }

    let addr = state.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    info!("Starting server at http://{}", addr);
    info!("API endpoints available at http://{}/api", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        logging::log_error(e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
