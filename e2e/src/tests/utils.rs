use std::sync::Once;

use axum::Router;
use skywire::HttpClient;
use url::Url;

static TRACING_INIT: Once = Once::new();

/// Initializes the tracing subscriber for tests.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(std::env::var("TRACING").unwrap_or_else(|_| "info".to_string()))
            // Use with_test_writer to ensure logs are captured correctly by the test runner.
            .with_test_writer()
            .init();
    });
}

/// Serve `app` on an ephemeral localhost port and return its base URL.
pub async fn serve(app: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .map_err(|error| eprintln!("test server error: {error}"))
    });
    Url::parse(&format!("http://127.0.0.1:{}", addr.port())).unwrap()
}

/// Client whose service and directory both point at `base`.
pub fn client_for(base: &Url) -> HttpClient {
    HttpClient::builder()
        .service(base.clone())
        .plc_directory(base.clone())
        .build()
        .unwrap()
}
