use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use envconfig::Envconfig;
use hmc_controller::{config::Settings, telemetry, State};
use kube::Client;
use prometheus::{Encoder, TextEncoder};
use tracing::info;

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok().body(buffer),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await?;

    let settings = Settings::init_from_env()?;
    let port = settings.http_port;
    info!(
        system_namespace = %settings.system_namespace,
        management = %settings.management_name,
        "Starting controllers"
    );

    // Init k8s controller state
    let state = State::new(settings)?;
    let client = Client::try_default().await?;

    let managed_cluster_controller =
        hmc_controller::run_managed_cluster_controller(state.clone(), client.clone());
    let management_controller =
        hmc_controller::run_management_controller(state.clone(), client.clone());
    let cluster_template_controller =
        hmc_controller::run_cluster_template_controller(state.clone(), client.clone());
    let service_template_controller =
        hmc_controller::run_service_template_controller(state.clone(), client.clone());
    let provider_template_controller =
        hmc_controller::run_provider_template_controller(state.clone(), client);

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(("0.0.0.0", port))?
    .shutdown_timeout(5)
    .run();

    tokio::join!(
        managed_cluster_controller,
        management_controller,
        cluster_template_controller,
        service_template_controller,
        provider_template_controller,
        server
    )
    .5?;
    Ok(())
}
