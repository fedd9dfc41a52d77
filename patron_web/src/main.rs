mod routes;

use std::{error::Error, net::SocketAddr, sync::Arc};

use axum_server::tls_rustls::RustlsConfig;
use eventstore::ClientSettings;
use patron::{
    domain::{customer::CustomerRepository, IdGeneratorTask},
    infrastructure::{EventStoreCustomerRepository, InMemoryCustomerRepository},
    service::CustomerService,
    PatronConfig, StorageKind,
};
use snowflake::SnowflakeIdGenerator;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() {
    match PatronConfig::load() {
        Ok(config) => {
            tracing_subscriber::fmt()
                .with_max_level(Level::from(&config.logger.level))
                .init();
            if let Err(error) = serve(&config).await {
                error!("アプリケーションエラー: {}", error);
            }
        }
        Err(error) => {
            tracing_subscriber::fmt::init();
            error!("設定の読み込みに失敗しました: {}", error)
        }
    }
}

async fn serve(config: &PatronConfig) -> Result<(), Box<dyn Error>> {
    let ids = IdGeneratorTask::spawn(
        SnowflakeIdGenerator::new(config.snowflake.machine, config.snowflake.node).into(),
    );
    let repository: Arc<dyn CustomerRepository> = match config.storage.kind {
        StorageKind::Memory => {
            info!("インメモリリポジトリを使用します");
            Arc::new(InMemoryCustomerRepository::new(ids))
        }
        StorageKind::EventStore => {
            info!("EventStoreDBに接続します: {}", config.storage.url);
            let settings = config.storage.url.parse::<ClientSettings>()?;
            let client = eventstore::Client::new(settings)?;
            Arc::new(EventStoreCustomerRepository::new(client, ids))
        }
    };
    let app = routes::router(CustomerService::new(repository));

    let addr = config.server.address.parse::<SocketAddr>()?;
    match &config.server.tls {
        Some(tls) => {
            let rustls = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;
            info!("待ち受け開始: https://{}", addr);
            axum_server::bind_rustls(addr, rustls)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!("待ち受け開始: http://{}", addr);
            axum_server::bind(addr)
                .serve(app.into_make_service())
                .await?;
        }
    }
    Ok(())
}
