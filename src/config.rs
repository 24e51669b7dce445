use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub gateway: GatewayConfig,
}

/// Payment gateway credentials. Merchant id and secret may both be empty,
/// in which case the shop runs in free mode and orders complete without
/// an external payment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub merchant_id: String,
    pub secret_key: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let gateway = GatewayConfig {
            base_url: env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://gateway.example.com".to_string()),
            merchant_id: env::var("GATEWAY_MERCHANT_ID").unwrap_or_default(),
            secret_key: env::var("GATEWAY_SECRET_KEY").unwrap_or_default(),
        };
        Ok(Self {
            port,
            database_url,
            host,
            gateway,
        })
    }
}
